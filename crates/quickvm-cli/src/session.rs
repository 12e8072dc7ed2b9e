//! Where commands are carried out: a private engine on a simulated host,
//! or a running service.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use quickvm_common::config::EngineConfig;
use quickvm_common::error::QuickVmError;
use quickvm_common::types::{
    CommandOutcome, CommandRequest, FailureReason, StateChangeEvent, VmId, VmStatus,
};
use quickvm_core::actions::{self, Action, ActionSet, Command};
use quickvm_core::summary::HostSummary;
use quickvm_engine::bulk::{self, BulkReport};
use quickvm_engine::ipc::client::ServiceClient;
use quickvm_engine::manager::VmManager;
use quickvm_engine::registry::ChannelSubscriber;
use quickvm_hypervisor::simulated::{Inventory, SimulatedHypervisor};
use tokio::sync::mpsc;

use crate::commands::GlobalArgs;

/// Host used when no inventory is given.
const DEMO_INVENTORY: &str = r"
machines:
  - name: web
    state: 2
  - name: db
    state: 3
  - name: build
    state: 6
  - name: legacy
    state: 32768
";

/// How long simulated transitions take to settle.
const SIMULATED_TRANSITION: Duration = Duration::from_secs(2);

/// A connection to an engine.
pub enum Session {
    /// Engine running in this process.
    Local(Arc<VmManager<SimulatedHypervisor>>),
    /// Engine behind `qvm serve`.
    Remote(ServiceClient),
}

impl Session {
    /// Connects to the service named in `global`, or starts a private
    /// engine.
    ///
    /// # Errors
    ///
    /// Returns an error if the service is unreachable or the engine fails
    /// to start.
    pub async fn open(global: &GlobalArgs, config: EngineConfig) -> anyhow::Result<Self> {
        match &global.service {
            Some(addr) => {
                let client = ServiceClient::connect(addr)
                    .await
                    .with_context(|| format!("no QuickVM service at {addr}"))?;
                Ok(Self::Remote(client))
            }
            None => Ok(Self::Local(Arc::new(start_local(global, config)?))),
        }
    }

    /// Current machines, optionally restricted to one name.
    pub async fn get_vm(&self, filter: Option<&VmId>) -> anyhow::Result<Vec<VmStatus>> {
        match self {
            Self::Local(manager) => Ok(manager.get_vm(filter)),
            Self::Remote(client) => Ok(client.get_vm(filter).await?),
        }
    }

    /// Sends a raw state-change request.
    pub async fn request(&self, request: &CommandRequest) -> anyhow::Result<CommandOutcome> {
        match self {
            Self::Local(manager) => Ok(manager.request_vm_state_change(request)),
            Self::Remote(client) => Ok(client.request_vm_state_change(request).await?),
        }
    }

    /// Runs one action on one machine, checked against its current state.
    pub async fn perform(&self, vm: &VmId, action: Action) -> anyhow::Result<CommandOutcome> {
        let client = match self {
            Self::Local(manager) => return Ok(manager.perform(vm, action)),
            Self::Remote(client) => client,
        };
        let Some(command) = action.command() else {
            return Ok(CommandOutcome::Failed(FailureReason::NotSupported));
        };
        let status = client
            .get_vm(Some(vm))
            .await?
            .into_iter()
            .find(|s| &s.id == vm);
        let Some(status) = status else {
            return Ok(CommandOutcome::Failed(FailureReason::SystemNotAvailable));
        };
        if !action.qualifies(status.state) {
            return Ok(CommandOutcome::Failed(
                FailureReason::InvalidStateForOperation,
            ));
        }
        Ok(execute_remote(client, vm, command).await?)
    }

    /// Runs one action on every machine it applies to.
    pub async fn run_bulk(&self, action: Action) -> anyhow::Result<BulkReport> {
        let client = match self {
            Self::Local(manager) => return Ok(manager.run_bulk(action)),
            Self::Remote(client) => client,
        };
        let statuses = client.get_vm(None).await?;
        let (targets, skipped) = bulk::plan(&statuses, action);
        let mut report = BulkReport::new(action);
        report.skipped = skipped;
        if let Some(command) = action.command() {
            for vm in targets {
                let outcome = match execute_remote(client, &vm, command).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        tracing::warn!(vm = %vm, %action, error = %e, "bulk command failed");
                        transport_failure(&e)
                    }
                };
                report.record(vm, outcome);
            }
        }
        Ok(report)
    }

    /// Actions offered for one machine, or `None` if it does not exist.
    pub async fn available_actions(&self, vm: &VmId) -> anyhow::Result<Option<ActionSet>> {
        Ok(self
            .get_vm(Some(vm))
            .await?
            .into_iter()
            .find(|s| &s.id == vm)
            .map(|s| actions::available_actions(s.state)))
    }

    /// Actions offered for all machines together.
    pub async fn bulk_actions(&self) -> anyhow::Result<ActionSet> {
        let statuses = self.get_vm(None).await?;
        Ok(actions::bulk_actions(statuses.iter().map(|s| s.state)))
    }

    /// Counts per category.
    pub async fn summary(&self) -> anyhow::Result<HostSummary> {
        Ok(HostSummary::from_statuses(&self.get_vm(None).await?))
    }

    /// Subscribes to state changes.
    pub async fn subscribe(&self) -> anyhow::Result<mpsc::Receiver<StateChangeEvent>> {
        match self {
            Self::Local(manager) => {
                let capacity = manager.config().service.queue_capacity;
                let (subscriber, events) = ChannelSubscriber::channel(capacity);
                let _ = manager.subscribe(Arc::new(subscriber));
                Ok(events)
            }
            Self::Remote(client) => {
                let events = client
                    .events()
                    .context("this session is already subscribed")?;
                client.subscribe().await?;
                Ok(events)
            }
        }
    }
}

/// Starts an engine on a simulated host.
///
/// # Errors
///
/// Returns an error if the inventory is invalid or the engine does not
/// start.
pub fn start_local(
    global: &GlobalArgs,
    config: EngineConfig,
) -> anyhow::Result<VmManager<SimulatedHypervisor>> {
    let inventory = match &global.inventory {
        Some(path) => Inventory::load(path)
            .with_context(|| format!("failed to load inventory {}", path.display()))?,
        None => Inventory {
            provider: config.provider,
            ..Inventory::from_yaml(DEMO_INVENTORY)?
        },
    };
    tracing::debug!(machines = inventory.machines.len(), "simulated host ready");
    let host =
        SimulatedHypervisor::from_inventory(&inventory).with_transition_delay(SIMULATED_TRANSITION);
    VmManager::start(config, Arc::new(host)).context("engine failed to start")
}

async fn execute_remote(
    client: &ServiceClient,
    vm: &VmId,
    command: Command,
) -> quickvm_common::error::Result<CommandOutcome> {
    match command {
        Command::SetState(desired) => {
            client
                .request_vm_state_change(&CommandRequest::to(vm.clone(), desired))
                .await
        }
        Command::Shutdown => client.shutdown_vm(vm).await,
    }
}

/// Outcome recorded for a machine whose call never got an answer.
const fn transport_failure(error: &QuickVmError) -> CommandOutcome {
    match error {
        QuickVmError::Connection { .. } => CommandOutcome::Failed(FailureReason::SystemNotAvailable),
        _ => CommandOutcome::Failed(FailureReason::Unknown),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use quickvm_common::types::{ClassifiedState, RawState};
    use quickvm_engine::ipc::protocol::{
        Call, ClientFrame, Reply, ServerFrame, encode_frame, read_next_valid_frame,
    };
    use tokio::io::{AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    use super::*;

    fn local() -> Session {
        let global = GlobalArgs {
            config: None,
            inventory: None,
            service: None,
        };
        Session::Local(Arc::new(start_local(&global, EngineConfig::default()).unwrap()))
    }

    #[tokio::test]
    async fn demo_host_has_every_stable_state() {
        let session = local();
        let vms = session.get_vm(None).await.unwrap();
        let states: Vec<ClassifiedState> = vms.iter().map(|s| s.state).collect();
        assert_eq!(vms.len(), 4);
        for expected in [
            ClassifiedState::Running,
            ClassifiedState::Off,
            ClassifiedState::Saved,
            ClassifiedState::Paused,
        ] {
            assert!(states.contains(&expected));
        }
    }

    #[tokio::test]
    async fn perform_checks_state_first() {
        let session = local();
        let outcome = session.perform(&VmId::new("db"), Action::Pause).await.unwrap();
        assert_eq!(
            outcome,
            CommandOutcome::Failed(FailureReason::InvalidStateForOperation)
        );
        let outcome = session.perform(&VmId::new("db"), Action::Start).await.unwrap();
        assert_eq!(outcome, CommandOutcome::TransitionStarted);
    }

    #[tokio::test]
    async fn bulk_actions_never_include_connect() {
        let session = local();
        let set = session.bulk_actions().await.unwrap();
        assert!(!set.contains(Action::Connect));
        assert!(set.contains(Action::Start));
        assert!(session
            .available_actions(&VmId::new("web"))
            .await
            .unwrap()
            .unwrap()
            .contains(Action::Connect));
    }

    fn running(name: &str) -> VmStatus {
        VmStatus {
            id: VmId::new(name),
            state: ClassifiedState::Running,
            critical: false,
            raw: RawState::new(2),
        }
    }

    /// A service with two running machines that errors every command for
    /// `broken`. Returns its address and the machines commands were sent to.
    async fn scripted_service(broken: &'static str) -> (String, Arc<Mutex<Vec<VmId>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let commanded = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&commanded);
        let _ = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (reader_half, mut writer) = stream.into_split();
            let mut reader = BufReader::new(reader_half);
            while let Some(frame) = read_next_valid_frame::<ClientFrame, _>(&mut reader).await {
                let reply = match frame.call {
                    Call::GetVm { .. } => Reply::Vms(vec![running("a"), running("b")]),
                    Call::RequestVmStateChange { name, .. } => {
                        let refused = name.as_str() == broken;
                        seen.lock().unwrap().push(name);
                        if refused {
                            Reply::Error("internal error".to_string())
                        } else {
                            Reply::Outcome(CommandOutcome::TransitionStarted)
                        }
                    }
                    _ => Reply::Pong,
                };
                let bytes = encode_frame(&ServerFrame::Response { id: frame.id, reply }).unwrap();
                writer.write_all(&bytes).await.unwrap();
            }
        });
        (addr, commanded)
    }

    #[tokio::test]
    async fn remote_bulk_continues_after_a_failed_call() {
        let (addr, commanded) = scripted_service("a").await;
        let session = Session::Remote(ServiceClient::connect(&addr).await.unwrap());

        let report = session.run_bulk(Action::TurnOff).await.unwrap();

        assert_eq!(*commanded.lock().unwrap(), vec![VmId::new("a"), VmId::new("b")]);
        assert_eq!(report.attempted, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(
            report.results,
            vec![
                (VmId::new("a"), CommandOutcome::Failed(FailureReason::Unknown)),
                (VmId::new("b"), CommandOutcome::TransitionStarted),
            ]
        );
    }
}
