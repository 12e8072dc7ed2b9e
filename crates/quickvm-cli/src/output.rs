//! Formatted output helpers for CLI commands.
//!
//! Provides consistent table formatting for machine lists and one-line
//! renderings of outcomes, notices and host summaries.

use std::fmt::Write;

use quickvm_common::types::{CommandOutcome, StateChangeEvent, VmId, VmStatus};
use quickvm_core::actions::ActionSet;
use quickvm_core::summary::{HostSummary, Notice, Overlay, Severity};
use quickvm_engine::bulk::BulkReport;

/// Renders machines as an aligned table with a header row.
#[must_use]
pub fn status_table(statuses: &[VmStatus]) -> String {
    let mut table = format!("{:<24} {:<10} {:<9} {:>6}\n", "NAME", "STATE", "CRITICAL", "RAW");
    for status in statuses {
        let _ = writeln!(
            table,
            "{:<24} {:<10} {:<9} {:>6}",
            status.id.as_str(),
            status.state.label(),
            if status.critical { "yes" } else { "-" },
            status.raw.code()
        );
    }
    table
}

/// One line describing the result of a command.
#[must_use]
pub fn outcome_line(vm: &VmId, outcome: CommandOutcome) -> String {
    let mark = if outcome.is_accepted() { "ok" } else { "FAILED" };
    format!("{vm}: {outcome} [{mark}]")
}

/// Action names separated by commas, or `(none)`.
#[must_use]
pub fn action_list(actions: ActionSet) -> String {
    if actions.is_empty() {
        return "(none)".to_string();
    }
    actions
        .iter()
        .map(|a| a.name())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Per-machine lines followed by totals.
#[must_use]
pub fn bulk_report(report: &BulkReport) -> String {
    let mut out = String::new();
    for (vm, outcome) in &report.results {
        let _ = writeln!(out, "{}", outcome_line(vm, *outcome));
    }
    let _ = writeln!(
        out,
        "{}: {} attempted, {} skipped, {} failed",
        report.action, report.attempted, report.skipped, report.failed
    );
    out
}

/// Multi-line host summary.
#[must_use]
pub fn summary(summary: &HostSummary) -> String {
    let overlay = match summary.overlay() {
        Overlay::None => "idle",
        Overlay::Paused => "paused",
        Overlay::Running => "running",
        Overlay::Critical => "CRITICAL",
    };
    format!(
        "machines:      {}\nrunning:       {}\npaused:        {}\nstopped:       {}\ntransitioning: {}\nunknown:       {}\ncritical:      {}\nstatus:        {overlay}\n",
        summary.total,
        summary.running,
        summary.paused,
        summary.stopped,
        summary.transitioning,
        summary.unknown,
        summary.critical,
    )
}

/// Notification line for an event, or `None` when it is not worth
/// showing.
#[must_use]
pub fn notice_line(event: &StateChangeEvent) -> Option<String> {
    let notice = Notice::for_event(event)?;
    let level = match notice.severity {
        Severity::Info => "info ",
        Severity::Error => "ERROR",
    };
    Some(format!(
        "{} {level} {}: {}",
        event.timestamp.format("%H:%M:%S"),
        notice.title,
        notice.message
    ))
}
