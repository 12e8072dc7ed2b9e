//! CLI command definitions and dispatch.

pub mod act;
pub mod actions;
pub mod all;
pub mod list;
pub mod request;
pub mod serve;
pub mod status;
pub mod watch;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use quickvm_common::config::EngineConfig;
use quickvm_common::constants::BIN_NAME;

/// QuickVM — virtual machine state at a glance.
#[derive(Parser, Debug)]
#[command(name = BIN_NAME, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Options shared by every subcommand.
    #[command(flatten)]
    pub global: GlobalArgs,
}

/// Options shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Engine configuration file (YAML).
    #[arg(long, global = true, env = "QVM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Machines of the simulated host (YAML). A small demo host is used
    /// when omitted.
    #[arg(long, global = true, env = "QVM_INVENTORY")]
    pub inventory: Option<PathBuf>,

    /// Address of a running `qvm serve`. When set, commands go to the
    /// service instead of a private engine.
    #[arg(long, global = true, env = "QVM_SERVICE")]
    pub service: Option<String>,
}

impl GlobalArgs {
    /// Loads the configuration file, or the defaults when none is given.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is invalid.
    pub fn load_config(&self) -> anyhow::Result<EngineConfig> {
        match &self.config {
            Some(path) => EngineConfig::load(path)
                .with_context(|| format!("failed to load config {}", path.display())),
            None => Ok(EngineConfig::default()),
        }
    }
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// List virtual machines and their state.
    List(list::ListArgs),
    /// Show which actions apply to a machine, or to all machines.
    Actions(actions::ActionsArgs),
    /// Run an action on one machine.
    Act(act::ActArgs),
    /// Run an action on every machine it applies to.
    All(all::AllArgs),
    /// Send a raw requested-state code to one machine.
    Request(request::RequestArgs),
    /// Summarise the host.
    Status(status::StatusArgs),
    /// Print state changes as they happen.
    Watch(watch::WatchArgs),
    /// Run the engine as a background service.
    Serve(serve::ServeArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the engine cannot be reached or the command fails.
pub async fn execute(cli: Cli, config: EngineConfig) -> anyhow::Result<()> {
    let global = &cli.global;
    match cli.command {
        Command::List(args) => list::execute(args, global, config).await,
        Command::Actions(args) => actions::execute(args, global, config).await,
        Command::Act(args) => act::execute(args, global, config).await,
        Command::All(args) => all::execute(args, global, config).await,
        Command::Request(args) => request::execute(args, global, config).await,
        Command::Status(args) => status::execute(args, global, config).await,
        Command::Watch(args) => watch::execute(args, global, config).await,
        Command::Serve(args) => serve::execute(args, global, config).await,
    }
}
