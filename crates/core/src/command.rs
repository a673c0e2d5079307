//! One external process invocation: command line, environment, deadline,
//! and combined stdout/stderr capture.

use std::collections::BTreeMap;
use std::io::{self, PipeReader, Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// How long to wait for the output pipe to close once the child is gone
pub const DEFAULT_OUTPUT_GRACE: Duration = Duration::from_secs(2);

/// Everything needed to launch one guest process. Owned by a single call.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    /// Overlay on top of the inherited environment, applied in order
    pub env: Vec<(String, String)>,
    pub working_dir: Option<PathBuf>,
    /// Written to the child's stdin, which is then closed
    pub stdin: Option<String>,
    pub output_grace: Duration,
}

/// How the process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    Exited(ExitStatus),
    /// Deadline fired; the process was killed and reaped
    TimedOut,
}

/// Why an [`Invocation`] produced no outcome
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to start {program}: {source}")]
    Spawn { program: String, source: io::Error },

    #[error("failed waiting for {program}: {source}")]
    Wait { program: String, source: io::Error },
}

impl ProcessError {
    /// True when the process never ran
    pub fn is_spawn(&self) -> bool {
        matches!(self, ProcessError::Spawn { .. })
    }

    pub fn io_error(&self) -> &io::Error {
        match self {
            ProcessError::Spawn { source, .. } | ProcessError::Wait { source, .. } => source,
        }
    }
}

/// Raw outcome of running an [`Invocation`]
#[derive(Debug)]
pub struct ProcessOutcome {
    pub exit: ExitKind,
    /// Interleaved stdout and stderr
    pub output: String,
    pub elapsed: Duration,
}

impl ProcessOutcome {
    pub fn timed_out(&self) -> bool {
        self.exit == ExitKind::TimedOut
    }

    pub fn success(&self) -> bool {
        matches!(self.exit, ExitKind::Exited(status) if status.success())
    }
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            working_dir: None,
            stdin: None,
            output_grace: DEFAULT_OUTPUT_GRACE,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_envs(mut self, vars: &BTreeMap<String, String>) -> Self {
        self.env
            .extend(vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn with_output_grace(mut self, grace: Duration) -> Self {
        self.output_grace = grace;
        self
    }

    /// Printable command line; arguments longer than a line are elided
    pub fn to_shell_command(&self) -> String {
        let mut cmd = self.program.clone();
        for arg in &self.args {
            cmd.push(' ');
            if arg.contains('\n') {
                cmd.push_str("'<script>'");
            } else if arg.contains(' ') || arg.contains('"') || arg.is_empty() {
                cmd.push_str(&format!("'{}'", arg.replace('\'', r"'\''")));
            } else {
                cmd.push_str(arg);
            }
        }
        if self.stdin.is_some() {
            cmd.push_str(" < <script>");
        }
        cmd
    }

    /// Spawn the process and wait for it, killing it once `deadline` passes.
    ///
    /// Returns `Err` only when the process could not be started or waited on.
    pub fn execute(&self, deadline: Option<Instant>) -> Result<ProcessOutcome, ProcessError> {
        let start = Instant::now();
        let (mut child, reader) = self.spawn().map_err(|source| ProcessError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        let output_rx = spawn_output_reader(reader);

        if let Some(input) = self.stdin.clone() {
            if let Some(mut stdin) = child.stdin.take() {
                // A child that exits without reading its stdin is not our failure
                thread::spawn(move || {
                    if let Err(err) = stdin.write_all(input.as_bytes()) {
                        debug!("Failed to write child stdin: {}", err);
                    }
                });
            }
        }

        let exit = match self.wait(&mut child, deadline, start) {
            Ok(exit) => exit,
            Err(source) => {
                let _ = child.kill();
                return Err(ProcessError::Wait {
                    program: self.program.clone(),
                    source,
                });
            }
        };

        let output = collect_output(output_rx, self.output_grace);
        let elapsed = start.elapsed();
        debug!("{} finished in {:?}: {:?}", self.program, elapsed, exit);

        Ok(ProcessOutcome {
            exit,
            output,
            elapsed,
        })
    }

    fn spawn(&self) -> io::Result<(Child, PipeReader)> {
        let (reader, writer) = io::pipe()?;

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdout(writer.try_clone()?)
            .stderr(writer)
            .stdin(if self.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });

        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        debug!("Spawning: {}", self.to_shell_command());
        let child = cmd.spawn()?;
        // `cmd` drops on return, closing our copies of the pipe's write end
        Ok((child, reader))
    }

    fn wait(
        &self,
        child: &mut Child,
        deadline: Option<Instant>,
        start: Instant,
    ) -> io::Result<ExitKind> {
        let Some(deadline) = deadline else {
            return Ok(ExitKind::Exited(child.wait()?));
        };

        let remaining = deadline.saturating_duration_since(Instant::now());
        if let Some(status) = child.wait_timeout(remaining)? {
            return Ok(ExitKind::Exited(status));
        }

        warn!(
            "Deadline reached after {:?}; killing {} (pid {})",
            start.elapsed(),
            self.program,
            child.id()
        );
        if let Err(err) = child.kill() {
            debug!("Kill failed, child likely already gone: {}", err);
        }
        child.wait()?;
        Ok(ExitKind::TimedOut)
    }
}

/// Read the combined pipe on a background thread. Chunks are forwarded as
/// they arrive so a grandchild holding the pipe open cannot hold up the call.
fn spawn_output_reader<R>(mut pipe: R) -> mpsc::Receiver<Vec<u8>>
where
    R: Read + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = [0u8; 8192];
        loop {
            match pipe.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    debug!("Output pipe read failed: {}", err);
                    break;
                }
            }
        }
    });
    rx
}

fn collect_output(rx: mpsc::Receiver<Vec<u8>>, grace: Duration) -> String {
    let give_up = Instant::now() + grace;
    let mut bytes = Vec::new();
    loop {
        let remaining = give_up.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(chunk) => bytes.extend_from_slice(&chunk),
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!("Output pipe still open after {:?}; abandoning the rest", grace);
                break;
            }
        }
    }
    String::from_utf8_lossy(&bytes).into_owned()
}
