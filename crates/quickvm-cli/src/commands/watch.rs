//! `qvm watch` — Print state changes as they happen.

use clap::Args;
use quickvm_common::config::EngineConfig;
use tokio::sync::watch;

use crate::commands::GlobalArgs;
use crate::output;
use crate::session::Session;

/// Arguments for the `watch` command.
#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Print each event as a JSON line.
    #[arg(long)]
    pub json: bool,
}

/// Executes the `watch` command.
///
/// Runs until Ctrl+C or until the engine goes away.
///
/// # Errors
///
/// Returns an error if the engine cannot be reached or the Ctrl+C handler
/// cannot be installed.
pub async fn execute(args: WatchArgs, global: &GlobalArgs, config: EngineConfig) -> anyhow::Result<()> {
    let session = Session::open(global, config).await?;
    let mut events = session.subscribe().await?;

    let (stop_tx, mut stop_rx) = watch::channel(false);
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(true);
    })
    .map_err(|e| anyhow::anyhow!("failed to set Ctrl+C handler: {e}"))?;

    eprintln!("Watching for state changes. Press Ctrl+C to stop.");
    loop {
        tokio::select! {
            _ = stop_rx.changed() => break,
            event = events.recv() => {
                let Some(event) = event else {
                    eprintln!("Engine connection closed.");
                    break;
                };
                if args.json {
                    println!("{}", serde_json::to_string(&event)?);
                } else if let Some(line) = output::notice_line(&event) {
                    println!("{line}");
                }
            }
        }
    }
    Ok(())
}
