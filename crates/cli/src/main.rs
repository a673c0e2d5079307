use anyhow::Result;
use clap::Parser;
use flowbridge::Cli;

fn main() -> Result<()> {
    // Logs go to stderr; stdout carries the flow result.
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    Cli::parse().command.execute()
}
