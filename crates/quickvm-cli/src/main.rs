//! # qvm — QuickVM CLI
//!
//! Watches the virtual machines on a host, reports their state changes,
//! and drives them through start, stop, save, pause and reset.

mod commands;
mod output;
mod session;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::commands::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.global.load_config()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    commands::execute(cli, config).await
}
