//! Host-wide summaries and per-event notices for front-ends.
//!
//! Rendering is the front-end's job; these types only decide what there is
//! to show.

use quickvm_common::types::{ClassifiedState, StateChangeEvent, VmStatus};
use serde::{Deserialize, Serialize};

/// Status badge drawn over the tray icon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Overlay {
    /// No machine is active.
    None,
    /// At least one machine is paused and none is running.
    Paused,
    /// At least one machine is running.
    Running,
    /// At least one machine is in a critical state.
    Critical,
}

/// Counts of machines per category on one host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSummary {
    /// Total machines enumerated.
    pub total: usize,
    /// Machines running.
    pub running: usize,
    /// Machines paused.
    pub paused: usize,
    /// Machines off or saved.
    pub stopped: usize,
    /// Machines in a transitional state.
    pub transitioning: usize,
    /// Machines whose state could not be classified.
    pub unknown: usize,
    /// Machines flagged critical, in any category.
    pub critical: usize,
}

impl HostSummary {
    /// Summarises an enumeration.
    #[must_use]
    pub fn from_statuses(statuses: &[VmStatus]) -> Self {
        let mut summary = Self {
            total: statuses.len(),
            ..Self::default()
        };
        for status in statuses {
            match status.state {
                ClassifiedState::Running => summary.running += 1,
                ClassifiedState::Paused => summary.paused += 1,
                ClassifiedState::Off | ClassifiedState::Saved => summary.stopped += 1,
                ClassifiedState::Unknown => summary.unknown += 1,
                _ => summary.transitioning += 1,
            }
            if status.critical {
                summary.critical += 1;
            }
        }
        summary
    }

    /// Badge to draw, in priority order critical, running, paused.
    #[must_use]
    pub const fn overlay(&self) -> Overlay {
        if self.critical > 0 {
            Overlay::Critical
        } else if self.running > 0 {
            Overlay::Running
        } else if self.paused > 0 {
            Overlay::Paused
        } else {
            Overlay::None
        }
    }
}

/// How prominently a notice should be shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Ordinary state change.
    Info,
    /// The machine entered a critical state.
    Error,
}

/// Text of a balloon notification for one state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    /// Short title.
    pub title: String,
    /// Message body.
    pub message: String,
    /// Severity.
    pub severity: Severity,
}

impl Notice {
    /// Builds the notice for an event, or `None` when the new state is
    /// unknown and not worth interrupting the user for.
    #[must_use]
    pub fn for_event(event: &StateChangeEvent) -> Option<Self> {
        if event.state == ClassifiedState::Unknown {
            return None;
        }
        let label = event.state.label();
        let mut message = format!(
            "Virtual machine '{}' is now {}",
            event.vm,
            label.to_lowercase()
        );
        let severity = if event.critical {
            message.push_str(" and in a critical state");
            Severity::Error
        } else {
            Severity::Info
        };
        message.push('.');
        Some(Self {
            title: format!("Virtual machine {label}"),
            message,
            severity,
        })
    }
}

/// Menu label for a machine, e.g. `web (Running) [CRITICAL]`.
#[must_use]
pub fn menu_label(status: &VmStatus) -> String {
    let mut label = format!("{} ({})", status.id, status.state);
    if status.critical {
        label.push_str(" [CRITICAL]");
    }
    label
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use quickvm_common::types::{RawState, VmId};

    use super::*;

    fn status(name: &str, state: ClassifiedState, critical: bool) -> VmStatus {
        VmStatus {
            id: VmId::new(name),
            state,
            critical,
            raw: RawState::new(0),
        }
    }

    fn event(state: ClassifiedState, critical: bool) -> StateChangeEvent {
        StateChangeEvent {
            vm: VmId::new("Test1"),
            state,
            critical,
            raw: RawState::new(0),
            sequence: 1,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn empty_host_has_no_overlay() {
        let summary = HostSummary::from_statuses(&[]);
        assert_eq!(summary.total, 0);
        assert_eq!(summary.overlay(), Overlay::None);
    }

    #[test]
    fn critical_wins_over_running() {
        let summary = HostSummary::from_statuses(&[
            status("a", ClassifiedState::Running, false),
            status("b", ClassifiedState::Off, true),
        ]);
        assert_eq!(summary.overlay(), Overlay::Critical);
        assert_eq!(summary.running, 1);
        assert_eq!(summary.stopped, 1);
        assert_eq!(summary.critical, 1);
    }

    #[test]
    fn paused_only_when_nothing_runs() {
        let summary = HostSummary::from_statuses(&[
            status("a", ClassifiedState::Paused, false),
            status("b", ClassifiedState::Saving, false),
        ]);
        assert_eq!(summary.overlay(), Overlay::Paused);
        assert_eq!(summary.transitioning, 1);
    }

    #[test]
    fn unknown_event_has_no_notice() {
        assert!(Notice::for_event(&event(ClassifiedState::Unknown, false)).is_none());
    }

    #[test]
    fn critical_event_notice_is_error() {
        let notice = Notice::for_event(&event(ClassifiedState::Running, true)).unwrap();
        assert_eq!(notice.severity, Severity::Error);
        assert_eq!(notice.title, "Virtual machine Running");
        assert_eq!(
            notice.message,
            "Virtual machine 'Test1' is now running and in a critical state."
        );
    }

    #[test]
    fn menu_label_marks_critical() {
        assert_eq!(
            menu_label(&status("web", ClassifiedState::Running, true)),
            "web (Running) [CRITICAL]"
        );
        assert_eq!(menu_label(&status("db", ClassifiedState::Off, false)), "db (Off)");
    }
}
