//! Live view of machine state: enumeration plus a transition feed.
//!
//! The feed is produced by a single background thread that polls the
//! hypervisor at a fixed interval and compares each snapshot with the
//! previous one. Events therefore leave in the order they were observed,
//! which keeps them causally ordered per machine.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::Utc;
use quickvm_common::types::{RawState, StateChangeEvent, VmId, VmStatus};
use quickvm_core::classifier::StateClassifier;

use crate::error::StartupError;
use crate::hypervisor::{Hypervisor, MachineRecord};

/// Receiver of state-change events.
pub trait EventSink: Send + Sync {
    /// Accepts one event. Must return promptly.
    fn emit(&self, event: StateChangeEvent);
}

impl<F> EventSink for F
where
    F: Fn(StateChangeEvent) + Send + Sync,
{
    fn emit(&self, event: StateChangeEvent) {
        self(event);
    }
}

/// Abstraction over the hypervisor's live state.
pub trait StateSource: Send + Sync {
    /// Enumerates machines, optionally restricted to one name.
    ///
    /// Best effort: if the hypervisor cannot be queried the result is empty.
    fn list_vms(&self, filter: Option<&VmId>) -> Vec<VmStatus>;

    /// Starts delivering transitions to `sink` until the handle is stopped.
    ///
    /// # Errors
    ///
    /// Returns an error if the feed cannot be opened.
    fn watch(&self, sink: Arc<dyn EventSink>) -> Result<WatchHandle, StartupError>;
}

/// Running feed. Stops the background thread when stopped or dropped.
#[derive(Debug)]
pub struct WatchHandle {
    stop: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl WatchHandle {
    /// Stops the feed and waits for the background thread to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        drop(self.stop.take());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("state watcher thread panicked");
            }
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// [`StateSource`] that polls a [`Hypervisor`].
pub struct PollingStateSource<H> {
    hypervisor: Arc<H>,
    classifier: StateClassifier,
    interval: Duration,
    sequence: Arc<AtomicU64>,
}

impl<H: Hypervisor + 'static> PollingStateSource<H> {
    /// Creates a source polling every `interval`.
    #[must_use]
    pub fn new(hypervisor: Arc<H>, classifier: StateClassifier, interval: Duration) -> Self {
        Self {
            hypervisor,
            classifier,
            interval,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// The classifier this source uses.
    #[must_use]
    pub const fn classifier(&self) -> &StateClassifier {
        &self.classifier
    }
}

impl<H: Hypervisor + 'static> StateSource for PollingStateSource<H> {
    fn list_vms(&self, filter: Option<&VmId>) -> Vec<VmStatus> {
        match self.hypervisor.machines(filter) {
            Ok(records) => records
                .into_iter()
                .map(|record| status(&self.classifier, record))
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, "machine enumeration failed, reporting none");
                Vec::new()
            }
        }
    }

    fn watch(&self, sink: Arc<dyn EventSink>) -> Result<WatchHandle, StartupError> {
        let initial = self.hypervisor.machines(None)?;
        let mut poller = Poller {
            hypervisor: Arc::clone(&self.hypervisor),
            classifier: self.classifier.clone(),
            sequence: Arc::clone(&self.sequence),
            previous: snapshot(&initial),
            sink,
        };
        let interval = self.interval;
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("quickvm-watch".to_string())
            .spawn(move || {
                tracing::info!(interval_ms = interval.as_millis(), "state watcher started");
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => poller.poll_once(),
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                tracing::info!("state watcher stopped");
            })
            .map_err(|e| StartupError::FeedUnavailable {
                message: format!("failed to spawn watcher thread: {e}"),
            })?;

        Ok(WatchHandle {
            stop: Some(stop_tx),
            thread: Some(thread),
        })
    }
}

fn status(classifier: &StateClassifier, record: MachineRecord) -> VmStatus {
    let (state, critical) = classifier.classify(record.raw);
    VmStatus {
        id: record.id,
        state,
        critical,
        raw: record.raw,
    }
}

fn snapshot(records: &[MachineRecord]) -> HashMap<VmId, RawState> {
    records.iter().map(|r| (r.id.clone(), r.raw)).collect()
}

/// State owned by the watcher thread.
struct Poller<H> {
    hypervisor: Arc<H>,
    classifier: StateClassifier,
    sequence: Arc<AtomicU64>,
    previous: HashMap<VmId, RawState>,
    sink: Arc<dyn EventSink>,
}

impl<H: Hypervisor> Poller<H> {
    fn poll_once(&mut self) {
        let records = match self.hypervisor.machines(None) {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(error = %e, "state poll failed, keeping previous snapshot");
                return;
            }
        };
        for event in self.diff(&records) {
            tracing::debug!(vm = %event.vm, state = %event.state, critical = event.critical, "state changed");
            self.sink.emit(event);
        }
        self.previous = snapshot(&records);
    }

    /// Events for machines present in both snapshots whose code changed.
    fn diff(&self, records: &[MachineRecord]) -> Vec<StateChangeEvent> {
        records
            .iter()
            .filter(|r| self.previous.get(&r.id).is_some_and(|old| *old != r.raw))
            .map(|r| {
                let (state, critical) = self.classifier.classify(r.raw);
                StateChangeEvent {
                    vm: r.id.clone(),
                    state,
                    critical,
                    raw: r.raw,
                    sequence: self.sequence.fetch_add(1, Ordering::SeqCst) + 1,
                    timestamp: Utc::now(),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Instant;

    use quickvm_common::types::{ClassifiedState, ProviderVersion};

    use super::*;
    use crate::simulated::SimulatedHypervisor;

    fn host() -> Arc<SimulatedHypervisor> {
        let sim = SimulatedHypervisor::new(ProviderVersion::V2);
        sim.add_machine("Test1", 3);
        sim.add_machine("Test2", 2);
        Arc::new(sim)
    }

    fn source(sim: &Arc<SimulatedHypervisor>) -> PollingStateSource<SimulatedHypervisor> {
        PollingStateSource::new(
            Arc::clone(sim),
            StateClassifier::new(),
            Duration::from_millis(10),
        )
    }

    fn wait_for(events: &Mutex<Vec<StateChangeEvent>>, count: usize) -> Vec<StateChangeEvent> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let seen = events.lock().unwrap().clone();
            if seen.len() >= count || Instant::now() > deadline {
                return seen;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn list_vms_classifies() {
        let sim = host();
        sim.set_state(&VmId::new("Test1"), 32_781);
        let vms = source(&sim).list_vms(Some(&VmId::new("Test1")));
        assert_eq!(vms.len(), 1);
        assert_eq!(vms[0].state, ClassifiedState::Running);
        assert!(vms[0].critical);
    }

    #[test]
    fn list_vms_degrades_to_empty() {
        let sim = host();
        sim.set_reachable(false);
        assert!(source(&sim).list_vms(None).is_empty());
    }

    #[test]
    fn watch_fails_when_feed_unavailable() {
        let sim = host();
        sim.deny_access(true);
        let sink: Arc<dyn EventSink> = Arc::new(|_event: StateChangeEvent| {});
        let err = source(&sim).watch(sink).unwrap_err();
        assert!(matches!(err, StartupError::InsufficientPrivilege { .. }));
    }

    #[test]
    fn watch_emits_transitions_in_order() {
        let sim = host();
        let events = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&events);
        let sink: Arc<dyn EventSink> =
            Arc::new(move |event: StateChangeEvent| recorder.lock().unwrap().push(event));
        let handle = source(&sim).watch(sink).unwrap();

        let test1 = VmId::new("Test1");
        let _ = sim.request_state_change(&test1, 2).unwrap();
        let seen = wait_for(&events, 1);
        assert_eq!(seen[0].state, ClassifiedState::Starting);

        let _ = sim.advance();
        let seen = wait_for(&events, 2);
        handle.stop();

        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].vm, test1);
        assert_eq!(seen[1].state, ClassifiedState::Running);
        assert!(seen[0].sequence < seen[1].sequence);
    }

    #[test]
    fn new_and_removed_machines_are_not_transitions() {
        let sim = host();
        let source = source(&sim);
        let poller = Poller {
            hypervisor: Arc::clone(&sim),
            classifier: StateClassifier::new(),
            sequence: Arc::new(AtomicU64::new(0)),
            previous: snapshot(&sim.machines(None).unwrap()),
            sink: Arc::new(|_event: StateChangeEvent| {}),
        };
        sim.add_machine("Test3", 2);
        sim.remove_machine(&VmId::new("Test2"));
        assert!(poller.diff(&sim.machines(None).unwrap()).is_empty());
        assert_eq!(source.list_vms(None).len(), 2);
    }

    #[test]
    fn poll_failure_keeps_previous_snapshot() {
        let sim = host();
        let events = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&events);
        let mut poller = Poller {
            hypervisor: Arc::clone(&sim),
            classifier: StateClassifier::new(),
            sequence: Arc::new(AtomicU64::new(0)),
            previous: snapshot(&sim.machines(None).unwrap()),
            sink: Arc::new(move |event: StateChangeEvent| recorder.lock().unwrap().push(event)),
        };
        sim.set_state(&VmId::new("Test1"), 2);
        sim.set_reachable(false);
        poller.poll_once();
        sim.set_reachable(true);
        poller.poll_once();
        let seen = events.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].sequence, 1);
    }
}
