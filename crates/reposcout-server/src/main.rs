//! reposcout - serve GitHub repositories by topic
//!
//! Resolves configuration, installs logging and runs the service until it is
//! asked to stop.

use anyhow::Result;
use clap::Parser;
use reposcout_server::Cli;
use reposcout_server::logging::initialize_logging;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    initialize_logging(&cli)?;

    let config = cli.resolve_config()?;
    reposcout_server::run(config).await
}
