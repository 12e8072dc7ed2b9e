//! `qvm all` — Run an action on every machine it applies to.

use clap::Args;
use quickvm_common::config::EngineConfig;
use quickvm_core::actions::Action;

use crate::commands::GlobalArgs;
use crate::output;
use crate::session::Session;

/// Arguments for the `all` command.
#[derive(Args, Debug)]
pub struct AllArgs {
    /// One of: start, turn-off, shut-down, save, pause, resume, reset.
    pub action: Action,
}

/// Executes the `all` command.
///
/// # Errors
///
/// Returns an error if the engine cannot be reached or any machine's
/// command is refused. The other machines are still attempted.
pub async fn execute(args: AllArgs, global: &GlobalArgs, config: EngineConfig) -> anyhow::Result<()> {
    let session = Session::open(global, config).await?;
    let report = session.run_bulk(args.action).await?;
    print!("{}", output::bulk_report(&report));
    if report.failed > 0 {
        return Err(anyhow::anyhow!(
            "{} of {} machines failed",
            report.failed,
            report.attempted
        ));
    }
    Ok(())
}
