//! Validation and execution of state-change commands.

use std::sync::Arc;

use quickvm_common::config::EngineConfig;
use quickvm_common::types::{
    CommandOutcome, CommandRequest, DesiredState, FailureReason, ProviderVersion, VmId,
};
use quickvm_core::actions::{Action, Command};
use quickvm_core::classifier::StateClassifier;
use quickvm_core::outcome;
use quickvm_hypervisor::error::HypervisorError;
use quickvm_hypervisor::hypervisor::{Hypervisor, MachineRecord};

/// Turns requests into hypervisor calls and their results into outcomes.
///
/// Every outcome is reported exactly once and nothing is retried.
pub struct CommandDispatcher<H> {
    hypervisor: Arc<H>,
    classifier: StateClassifier,
    provider: ProviderVersion,
    shutdown_reason: String,
}

impl<H: Hypervisor> CommandDispatcher<H> {
    /// Creates a dispatcher for the provider named in `config`.
    #[must_use]
    pub fn new(hypervisor: Arc<H>, classifier: StateClassifier, config: &EngineConfig) -> Self {
        Self {
            hypervisor,
            classifier,
            provider: config.provider,
            shutdown_reason: config.shutdown_reason.clone(),
        }
    }

    /// Executes a raw state-change request.
    ///
    /// Requested states outside the whitelist fail with
    /// [`FailureReason::InvalidParameter`] before the hypervisor is
    /// contacted. A machine that cannot be found fails with
    /// [`FailureReason::SystemNotAvailable`].
    pub fn dispatch(&self, request: &CommandRequest) -> CommandOutcome {
        let Some(desired) = DesiredState::from_requested(request.requested) else {
            tracing::warn!(
                vm = %request.vm,
                requested = %request.requested,
                "requested state not allowed"
            );
            return CommandOutcome::Failed(FailureReason::InvalidParameter);
        };
        match self.lookup(&request.vm) {
            Ok(_) => self.set_state(&request.vm, desired),
            Err(outcome) => outcome,
        }
    }

    /// Asks the guest to shut itself down.
    pub fn shutdown(&self, vm: &VmId) -> CommandOutcome {
        match self.lookup(vm) {
            Ok(_) => self.initiate_shutdown(vm),
            Err(outcome) => outcome,
        }
    }

    /// Runs a menu action after checking it against the machine's current
    /// state.
    ///
    /// An action that does not apply fails with
    /// [`FailureReason::InvalidStateForOperation`] without contacting the
    /// hypervisor. Connect has no hypervisor command and fails with
    /// [`FailureReason::NotSupported`]; front-ends launch the console
    /// themselves.
    pub fn perform(&self, vm: &VmId, action: Action) -> CommandOutcome {
        let Some(command) = action.command() else {
            return CommandOutcome::Failed(FailureReason::NotSupported);
        };
        let record = match self.lookup(vm) {
            Ok(record) => record,
            Err(outcome) => return outcome,
        };
        let state = self.classifier.category(record.raw);
        if !action.qualifies(state) {
            tracing::info!(vm = %vm, %action, %state, "action does not apply to current state");
            return CommandOutcome::Failed(FailureReason::InvalidStateForOperation);
        }
        self.execute(vm, command)
    }

    /// Issues a command without looking the machine up first.
    ///
    /// Used when the caller has just enumerated the machine.
    pub fn execute(&self, vm: &VmId, command: Command) -> CommandOutcome {
        match command {
            Command::SetState(desired) => self.set_state(vm, desired),
            Command::Shutdown => self.initiate_shutdown(vm),
        }
    }

    fn set_state(&self, vm: &VmId, desired: DesiredState) -> CommandOutcome {
        let code = desired.provider_code(self.provider);
        tracing::info!(vm = %vm, %desired, code, "requesting state change");
        let outcome = match self.hypervisor.request_state_change(vm, code) {
            Ok(rc) => outcome::from_return_code(rc),
            Err(e) => transport_failure(vm, &e),
        };
        log_outcome(vm, outcome);
        outcome
    }

    fn initiate_shutdown(&self, vm: &VmId) -> CommandOutcome {
        tracing::info!(vm = %vm, reason = %self.shutdown_reason, "requesting guest shutdown");
        let outcome = match self
            .hypervisor
            .initiate_shutdown(vm, true, &self.shutdown_reason)
        {
            Ok(rc) => outcome::from_return_code(rc),
            Err(e) => transport_failure(vm, &e),
        };
        log_outcome(vm, outcome);
        outcome
    }

    fn lookup(&self, vm: &VmId) -> Result<MachineRecord, CommandOutcome> {
        match self.hypervisor.machines(Some(vm)) {
            Ok(records) => records.into_iter().find(|r| &r.id == vm).ok_or_else(|| {
                tracing::warn!(vm = %vm, "virtual machine not found");
                CommandOutcome::Failed(FailureReason::SystemNotAvailable)
            }),
            Err(e) => Err(transport_failure(vm, &e)),
        }
    }
}

fn transport_failure(vm: &VmId, err: &HypervisorError) -> CommandOutcome {
    tracing::warn!(vm = %vm, error = %err, "hypervisor call failed");
    CommandOutcome::Failed(match err {
        HypervisorError::Unreachable { .. } | HypervisorError::NotFound { .. } => {
            FailureReason::SystemNotAvailable
        }
        HypervisorError::AccessDenied { .. } => FailureReason::AccessDenied,
        HypervisorError::Unsupported { .. } => FailureReason::NotSupported,
        HypervisorError::Query { .. } => FailureReason::Unknown,
    })
}

fn log_outcome(vm: &VmId, outcome: CommandOutcome) {
    if outcome.is_accepted() {
        tracing::info!(vm = %vm, outcome = ?outcome, "command accepted");
    } else {
        tracing::warn!(vm = %vm, outcome = ?outcome, "command failed");
    }
}
