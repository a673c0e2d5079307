//! The per-execution-unit dispatcher behind `run(entry, payloadOrOptions)`

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::{
    codec,
    command::{ExitKind, Invocation, ProcessOutcome},
    config::BridgeConfig,
    context::{ExecutionContext, HostState},
    duration::parse_duration,
    error::{Error, Result},
    guest,
    merge::{self, MetricCache, CHECKS_METRIC},
    metrics::{Metric, MetricKind, MetricRegistry, Sample, SampleSink, ValueType},
    options::CallRequest,
    runtime::{Runtime, ScriptDelivery},
};

pub const DURATION_METRIC: &str = "flow_duration";
pub const RUNS_METRIC: &str = "flow_runs";
pub const FAILURES_METRIC: &str = "flow_failures";

/// A request with its runtime and deadline settled, ready to spawn
#[derive(Debug, Clone)]
pub struct PreparedCall {
    pub entry: String,
    pub runtime: Runtime,
    /// Timeout as the caller wrote it, for messages
    pub timeout_label: Option<String>,
    pub timeout: Option<Duration>,
    pub invocation: Invocation,
}

/// The deadline a call runs under, described for timeout messages
#[derive(Debug, Clone, PartialEq, Eq)]
struct CallDeadline {
    at: Instant,
    label: String,
}

struct BuiltinMetrics {
    duration: Arc<Metric>,
    runs: Arc<Metric>,
    failures: Arc<Metric>,
    checks: Arc<Metric>,
}

/// Dispatches calls for one execution unit.
///
/// The external process has the same privileges as the host process; nothing
/// here isolates it.
pub struct Bridge {
    host: Arc<dyn HostState>,
    registry: Arc<dyn MetricRegistry>,
    sink: Arc<dyn SampleSink>,
    config: BridgeConfig,
    cache: MetricCache,
    builtin: BuiltinMetrics,
}

impl Bridge {
    pub fn new(
        host: Arc<dyn HostState>,
        registry: Arc<dyn MetricRegistry>,
        sink: Arc<dyn SampleSink>,
    ) -> Result<Self> {
        Self::with_config(host, registry, sink, BridgeConfig::default())
    }

    pub fn with_config(
        host: Arc<dyn HostState>,
        registry: Arc<dyn MetricRegistry>,
        sink: Arc<dyn SampleSink>,
        config: BridgeConfig,
    ) -> Result<Self> {
        config.validate()?;
        let builtin = BuiltinMetrics {
            duration: registry.register(DURATION_METRIC, MetricKind::Trend, ValueType::Time)?,
            runs: registry.register(RUNS_METRIC, MetricKind::Counter, ValueType::Default)?,
            failures: registry.register(FAILURES_METRIC, MetricKind::Counter, ValueType::Default)?,
            checks: registry.register(CHECKS_METRIC, MetricKind::Rate, ValueType::Default)?,
        };

        Ok(Self {
            host,
            registry,
            sink,
            config,
            cache: MetricCache::new(),
            builtin,
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Run the flow at `entry` and return its result with telemetry stripped.
    pub fn run(&self, entry: &str, payload_or_options: Value) -> Result<Map<String, Value>> {
        let prepared = self.prepare(entry, payload_or_options)?;
        let deadline = self.deadline_for(&prepared);

        info!(
            "Running {} flow {} (timeout: {})",
            prepared.runtime,
            prepared.entry,
            prepared.timeout_label.as_deref().unwrap_or("none")
        );

        let outcome = match prepared.invocation.execute(deadline.as_ref().map(|d| d.at)) {
            Ok(outcome) => outcome,
            Err(err) => {
                let error = Error::Execution {
                    runtime: prepared.runtime,
                    entry: prepared.entry.clone(),
                    reason: err.to_string(),
                    output: String::new(),
                };
                self.record_failure(&prepared, &error);
                return Err(error);
            }
        };

        let deadline_label = deadline.as_ref().map(|d| d.label.as_str());
        let mut result = match classify(&prepared, outcome, deadline_label) {
            Ok((result, elapsed)) => {
                self.record_success(&prepared, elapsed);
                result
            }
            Err(error) => {
                self.record_failure(&prepared, &error);
                return Err(error);
            }
        };

        let telemetry = codec::take_telemetry(&mut result);
        if !telemetry.is_empty() {
            let report = merge::merge_telemetry(
                &telemetry,
                &self.cache,
                self.registry.as_ref(),
                &self.builtin.checks,
                self.sink.as_ref(),
                &self.call_tags(&prepared),
            );
            debug!(
                "Merged telemetry from {}: {} samples, {} dropped",
                prepared.entry, report.samples, report.dropped
            );
        }

        Ok(result)
    }

    /// Everything `run` does before spawning: interpret the arguments, select
    /// the runtime, parse the timeout and build the command line.
    pub fn prepare(&self, entry: &str, payload_or_options: Value) -> Result<PreparedCall> {
        let request = CallRequest::from_args(entry, payload_or_options)?;
        let runtime = Runtime::select(
            request.runtime.as_deref(),
            &request.entry,
            self.config.fallback_runtime(),
        )?;

        let payload = serde_json::to_string(&request.payload)?;
        let context = serde_json::to_string(&ExecutionContext::capture(self.host.as_ref()))?;

        let timeout_label = request
            .timeout
            .clone()
            .or_else(|| self.config.default_timeout.clone());
        let timeout = timeout_label.as_deref().map(parse_duration).transpose()?;

        let invocation = self.build_invocation(runtime, &request, payload, context);
        debug!("Prepared {}", invocation.to_shell_command());

        Ok(PreparedCall {
            entry: request.entry,
            runtime,
            timeout_label,
            timeout,
            invocation,
        })
    }

    fn build_invocation(
        &self,
        runtime: Runtime,
        request: &CallRequest,
        payload: String,
        context: String,
    ) -> Invocation {
        let mut invocation = Invocation::new(self.config.program_for(runtime))
            .args(self.config.extra_args_for(runtime).iter().cloned())
            .args(runtime.launch_args(guest::RUNNER_SCRIPT))
            .args([request.entry.clone(), payload.clone(), context.clone()])
            .with_envs(&self.config.env)
            .with_envs(&request.env)
            .with_env(guest::ENV_RESOLUTION, runtime.module_resolution().as_str())
            .with_output_grace(self.config.output_grace());

        if runtime.needs_env_channel() {
            invocation = invocation
                .with_env(guest::ENV_ENTRY, request.entry.clone())
                .with_env(guest::ENV_PAYLOAD, payload)
                .with_env(guest::ENV_CONTEXT, context);
        }
        if runtime.script_delivery() == ScriptDelivery::Stdin {
            invocation = invocation.with_stdin(guest::RUNNER_SCRIPT);
        }
        if let Some(ref dir) = self.config.working_dir {
            invocation = invocation.with_working_dir(dir.clone());
        }
        invocation
    }

    /// Earlier of the call's own timeout and the host's ambient deadline
    fn deadline_for(&self, prepared: &PreparedCall) -> Option<CallDeadline> {
        let now = Instant::now();
        let own = prepared.timeout.map(|timeout| CallDeadline {
            at: now + timeout,
            label: prepared
                .timeout_label
                .clone()
                .unwrap_or_else(|| format!("{timeout:?}")),
        });
        let host = self.host.deadline().map(|at| CallDeadline {
            at,
            label: format!("host deadline ({:?})", at.saturating_duration_since(now)),
        });

        match (own, host) {
            (Some(own), Some(host)) if host.at < own.at => Some(host),
            (Some(own), _) => Some(own),
            (None, host) => host,
        }
    }

    fn call_tags(&self, prepared: &PreparedCall) -> BTreeMap<String, String> {
        let call = BTreeMap::from([
            ("flow".to_string(), prepared.entry.clone()),
            ("runtime".to_string(), prepared.runtime.to_string()),
        ]);
        merge::merge_tags(&call, &self.host.tags())
    }

    fn record_success(&self, prepared: &PreparedCall, elapsed: Duration) {
        let tags = self.call_tags(prepared);
        self.sink.push(Sample::new(
            Arc::clone(&self.builtin.duration),
            tags.clone(),
            elapsed.as_secs_f64() * 1000.0,
        ));
        self.sink
            .push(Sample::new(Arc::clone(&self.builtin.runs), tags, 1.0));
    }

    fn record_failure(&self, prepared: &PreparedCall, error: &Error) {
        let mut tags = self.call_tags(prepared);
        tags.insert("failure".to_string(), error.kind().as_str().to_string());
        self.sink
            .push(Sample::new(Arc::clone(&self.builtin.failures), tags, 1.0));
    }
}

/// Turn a finished process into a result or a classified failure
fn classify(
    prepared: &PreparedCall,
    outcome: ProcessOutcome,
    deadline_label: Option<&str>,
) -> Result<(Map<String, Value>, Duration)> {
    let ProcessOutcome {
        exit,
        output,
        elapsed,
    } = outcome;

    match exit {
        ExitKind::TimedOut => {
            warn!("{} flow {} timed out", prepared.runtime, prepared.entry);
            let timeout = deadline_label
                .map(str::to_string)
                .unwrap_or_else(|| format!("{elapsed:?}"));
            Err(Error::Timeout {
                runtime: prepared.runtime,
                entry: prepared.entry.clone(),
                timeout,
                output,
            })
        }
        ExitKind::Exited(status) if !status.success() => Err(Error::Execution {
            runtime: prepared.runtime,
            entry: prepared.entry.clone(),
            reason: status.to_string(),
            output,
        }),
        ExitKind::Exited(_) => match codec::extract_result(&output) {
            Ok(result) => Ok((result, elapsed)),
            Err(err) => Err(Error::Protocol {
                runtime: prepared.runtime,
                entry: prepared.entry.clone(),
                reason: err.to_string(),
                output,
            }),
        },
    }
}
