//! "All virtual machines" operations.

use quickvm_common::types::{CommandOutcome, VmId, VmStatus};
use quickvm_core::actions::{Action, Command};
use serde::{Deserialize, Serialize};

/// What a bulk operation did to each machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkReport {
    /// The action that was applied.
    pub action: Action,
    /// Machines a command was issued to.
    pub attempted: usize,
    /// Machines left alone because the action does not apply to them.
    pub skipped: usize,
    /// Attempted machines whose command was not accepted.
    pub failed: usize,
    /// Outcome per attempted machine, in enumeration order.
    pub results: Vec<(VmId, CommandOutcome)>,
}

impl BulkReport {
    /// An empty report for `action`.
    #[must_use]
    pub const fn new(action: Action) -> Self {
        Self {
            action,
            attempted: 0,
            skipped: 0,
            failed: 0,
            results: Vec::new(),
        }
    }

    /// Records the outcome for one attempted machine.
    pub fn record(&mut self, vm: VmId, outcome: CommandOutcome) {
        self.attempted += 1;
        if !outcome.is_accepted() {
            self.failed += 1;
        }
        self.results.push((vm, outcome));
    }
}

/// Machines from `statuses` that `action` applies to, and how many were
/// left out. Nothing applies for actions with no hypervisor command.
#[must_use]
pub fn plan(statuses: &[VmStatus], action: Action) -> (Vec<VmId>, usize) {
    if action.command().is_none() {
        return (Vec::new(), statuses.len());
    }
    let targets: Vec<VmId> = statuses
        .iter()
        .filter(|s| action.qualifies(s.state))
        .map(|s| s.id.clone())
        .collect();
    let skipped = statuses.len() - targets.len();
    (targets, skipped)
}

/// Applies `action` to every qualifying machine, independently.
///
/// `execute` is called once per qualifying machine; one machine failing
/// does not stop the others.
pub fn run_bulk<F>(statuses: &[VmStatus], action: Action, mut execute: F) -> BulkReport
where
    F: FnMut(&VmId, Command) -> CommandOutcome,
{
    let mut report = BulkReport::new(action);
    let (targets, skipped) = plan(statuses, action);
    report.skipped = skipped;
    if let Some(command) = action.command() {
        for vm in targets {
            let outcome = execute(&vm, command);
            report.record(vm, outcome);
        }
    }
    tracing::info!(
        %action,
        attempted = report.attempted,
        skipped = report.skipped,
        failed = report.failed,
        "bulk operation finished"
    );
    report
}
