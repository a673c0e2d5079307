use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::commands::{init_command, run_command, runner_script_command, RunArgs};

#[derive(Parser, Debug)]
#[command(name = "flowbridge")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    RUST_LOG=debug    Enable debug logging")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one flow and print its result as JSON
    #[command(visible_alias = "r")]
    Run {
        /// Path to the flow module (e.g. flows/login.js, flows/cart.deno.ts)
        entry: String,

        /// Payload or options object as JSON (defaults to `{}`)
        arg: Option<String>,

        /// Runtime to use: node, deno or bun
        #[arg(short, long)]
        runtime: Option<String>,

        /// Deadline for the call, e.g. 5s or 1m30s
        #[arg(short, long)]
        timeout: Option<String>,

        /// Extra environment variable for the flow (repeatable)
        #[arg(short, long = "env", value_name = "KEY=VALUE")]
        env: Vec<String>,

        /// Config file (defaults to the nearest .flowbridge.json)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Print the command without executing it
        #[arg(short, long)]
        dry_run: bool,

        /// Print recorded metric samples to stderr
        #[arg(short, long)]
        metrics: bool,
    },
    /// Print the embedded guest runner script
    RunnerScript,
    /// Write a starter .flowbridge.json
    Init {
        /// Directory to write into (defaults to current directory)
        #[arg(long)]
        cwd: Option<PathBuf>,

        /// Overwrite an existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Commands {
    pub fn execute(self) -> Result<()> {
        match self {
            Commands::Run {
                entry,
                arg,
                runtime,
                timeout,
                env,
                config,
                dry_run,
                metrics,
            } => run_command(RunArgs {
                entry,
                arg,
                runtime,
                timeout,
                env,
                config,
                dry_run,
                metrics,
            }),
            Commands::RunnerScript => runner_script_command(),
            Commands::Init { cwd, force } => init_command(cwd.as_deref(), force),
        }
    }
}
