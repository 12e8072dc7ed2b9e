//! `qvm actions` — Show which actions apply.

use clap::Args;
use quickvm_common::config::EngineConfig;
use quickvm_common::types::VmId;

use crate::commands::GlobalArgs;
use crate::output;
use crate::session::Session;

/// Arguments for the `actions` command.
#[derive(Args, Debug)]
pub struct ActionsArgs {
    /// Machine to inspect. Without it, the actions offered for all
    /// machines together are shown.
    pub name: Option<String>,
}

/// Executes the `actions` command.
///
/// # Errors
///
/// Returns an error if the engine cannot be reached or the machine does
/// not exist.
pub async fn execute(args: ActionsArgs, global: &GlobalArgs, config: EngineConfig) -> anyhow::Result<()> {
    let session = Session::open(global, config).await?;
    let actions = match args.name {
        Some(name) => {
            let vm = VmId::new(name);
            session
                .available_actions(&vm)
                .await?
                .ok_or_else(|| anyhow::anyhow!("virtual machine not found: {vm}"))?
        }
        None => session.bulk_actions().await?,
    };
    println!("{}", output::action_list(actions));
    Ok(())
}
