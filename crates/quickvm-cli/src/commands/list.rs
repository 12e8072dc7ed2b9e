//! `qvm list` — List virtual machines and their state.

use clap::Args;
use quickvm_common::config::EngineConfig;
use quickvm_common::types::VmId;

use crate::commands::GlobalArgs;
use crate::output;
use crate::session::Session;

/// Arguments for the `list` command.
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Only show this machine.
    pub name: Option<String>,

    /// Print JSON instead of a table.
    #[arg(long)]
    pub json: bool,
}

/// Executes the `list` command.
///
/// # Errors
///
/// Returns an error if the engine cannot be reached.
pub async fn execute(args: ListArgs, global: &GlobalArgs, config: EngineConfig) -> anyhow::Result<()> {
    let session = Session::open(global, config).await?;
    let filter = args.name.map(VmId::new);
    let vms = session.get_vm(filter.as_ref()).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&vms)?);
        return Ok(());
    }
    if vms.is_empty() {
        println!("No virtual machines found.");
        return Ok(());
    }
    print!("{}", output::status_table(&vms));
    Ok(())
}
