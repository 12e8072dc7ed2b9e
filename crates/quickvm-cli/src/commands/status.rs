//! `qvm status` — Summarise the host.

use clap::Args;
use quickvm_common::config::EngineConfig;
use quickvm_core::summary::{HostSummary, Overlay};
use serde::Serialize;

use crate::commands::GlobalArgs;
use crate::output;
use crate::session::Session;

/// Arguments for the `status` command.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Print JSON instead of text.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct StatusView {
    #[serde(flatten)]
    summary: HostSummary,
    overlay: Overlay,
}

/// Executes the `status` command.
///
/// # Errors
///
/// Returns an error if the engine cannot be reached.
pub async fn execute(args: StatusArgs, global: &GlobalArgs, config: EngineConfig) -> anyhow::Result<()> {
    let session = Session::open(global, config).await?;
    let summary = session.summary().await?;
    if args.json {
        let view = StatusView {
            overlay: summary.overlay(),
            summary,
        };
        println!("{}", serde_json::to_string_pretty(&view)?);
    } else {
        print!("{}", output::summary(&summary));
    }
    Ok(())
}
