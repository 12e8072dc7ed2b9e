//! `qvm act` — Run an action on one machine.

use clap::Args;
use quickvm_common::config::EngineConfig;
use quickvm_common::types::VmId;
use quickvm_core::actions::Action;

use crate::commands::GlobalArgs;
use crate::output;
use crate::session::Session;

/// Arguments for the `act` command.
#[derive(Args, Debug)]
pub struct ActArgs {
    /// One of: connect, start, turn-off, shut-down, save, pause, resume,
    /// reset.
    pub action: Action,

    /// Target machine.
    pub name: String,
}

/// Executes the `act` command.
///
/// The outcome reports whether the hypervisor accepted the request; the
/// new state shows up later in `qvm watch`.
///
/// # Errors
///
/// Returns an error if the engine cannot be reached or the command is
/// refused.
pub async fn execute(args: ActArgs, global: &GlobalArgs, config: EngineConfig) -> anyhow::Result<()> {
    let session = Session::open(global, config).await?;
    let vm = VmId::new(args.name);
    let outcome = session.perform(&vm, args.action).await?;
    println!("{}", output::outcome_line(&vm, outcome));
    if outcome.is_accepted() {
        Ok(())
    } else {
        Err(anyhow::anyhow!("{} {vm}: {outcome}", args.action))
    }
}
