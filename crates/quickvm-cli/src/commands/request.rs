//! `qvm request` — Send a raw requested-state code.

use clap::Args;
use quickvm_common::config::EngineConfig;
use quickvm_common::types::{CommandRequest, RequestedState};

use crate::commands::GlobalArgs;
use crate::output;
use crate::session::Session;

/// Arguments for the `request` command.
#[derive(Args, Debug)]
pub struct RequestArgs {
    /// Target machine.
    pub name: String,

    /// Requested-state code: 2 running, 3 off, 6 or 32769 saved, 9 or
    /// 32768 paused, 11 reset.
    pub code: u16,
}

/// Executes the `request` command.
///
/// # Errors
///
/// Returns an error if the engine cannot be reached or the request is
/// refused.
pub async fn execute(args: RequestArgs, global: &GlobalArgs, config: EngineConfig) -> anyhow::Result<()> {
    let session = Session::open(global, config).await?;
    let request = CommandRequest::new(args.name, RequestedState::new(args.code));
    let outcome = session.request(&request).await?;
    println!("{}", output::outcome_line(&request.vm, outcome));
    if outcome.is_accepted() {
        Ok(())
    } else {
        Err(anyhow::anyhow!("request {} for {}: {outcome}", args.code, request.vm))
    }
}
