//! `qvm serve` — Run the engine as a background service.

use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use quickvm_common::config::EngineConfig;
use quickvm_engine::ipc::server;
use tokio::sync::watch;

use crate::commands::GlobalArgs;
use crate::session;

/// Arguments for the `serve` command.
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to listen on. Defaults to `service.listen` from the
    /// configuration.
    #[arg(long)]
    pub listen: Option<String>,
}

/// Executes the `serve` command.
///
/// Front-ends connect with `--service <addr>` and share one engine.
///
/// # Errors
///
/// Returns an error if the engine does not start, the address cannot be
/// bound, or the Ctrl+C handler cannot be installed.
pub async fn execute(args: ServeArgs, global: &GlobalArgs, config: EngineConfig) -> anyhow::Result<()> {
    if global.service.is_some() {
        return Err(anyhow::anyhow!("--service cannot be combined with serve"));
    }
    let listen = args.listen.unwrap_or_else(|| config.service.listen.clone());
    let manager = Arc::new(session::start_local(global, config)?);
    let listener = server::bind(&listen).await.context("service failed to start")?;

    let (stop_tx, stop_rx) = watch::channel(false);
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(true);
    })
    .map_err(|e| anyhow::anyhow!("failed to set Ctrl+C handler: {e}"))?;

    eprintln!("QuickVM service listening on {listen}. Press Ctrl+C to stop.");
    server::serve(listener, Arc::clone(&manager), stop_rx).await?;
    manager.stop();
    eprintln!("QuickVM service stopped.");
    Ok(())
}
