//! In-memory hypervisor for development hosts and tests.
//!
//! Behaves like the management provider from the engine's point of view:
//! accepted requests return `4096` and move the machine through a
//! transitional state, requests that make no sense for the current state
//! return `32775`, and unknown requested codes return `32773`. Transitions
//! settle either on [`SimulatedHypervisor::advance`] or, when a delay is
//! configured, lazily once the delay has elapsed.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use quickvm_common::error::{QuickVmError, Result};
use quickvm_common::types::{ClassifiedState, ProviderVersion, RawState, VmId};
use quickvm_core::classifier;
use quickvm_core::outcome::TRANSITION_STARTED;
use serde::{Deserialize, Serialize};

use crate::error::HypervisorError;
use crate::hypervisor::{Hypervisor, MachineRecord};

const GENERIC_FAILURE: u32 = 32_768;
const INVALID_PARAMETER: u32 = 32_773;
const INVALID_STATE: u32 = 32_775;

const RUNNING: u16 = 2;
const OFF: u16 = 3;
const RESETTING: u16 = 11;
const STARTING: u16 = 32_770;
const SAVING: u16 = 32_773;
const STOPPING: u16 = 32_774;
const PAUSING: u16 = 32_776;
const RESUMING: u16 = 32_777;

/// Machines to populate a simulated host with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    /// Provider version the host pretends to run.
    #[serde(default)]
    pub provider: ProviderVersion,
    /// Machines on the host.
    #[serde(default)]
    pub machines: Vec<InventoryMachine>,
}

/// One machine of an [`Inventory`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryMachine {
    /// Machine name.
    pub name: String,
    /// Initial raw state code.
    pub state: u16,
    /// Whether the guest exposes a shutdown component.
    #[serde(default = "default_true")]
    pub shutdown_component: bool,
}

const fn default_true() -> bool {
    true
}

impl Inventory {
    /// Loads an inventory from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| QuickVmError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_yaml(&content)
    }

    /// Parses an inventory from YAML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a valid inventory.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let inventory: Self = serde_yaml::from_str(content)?;
        let mut seen = std::collections::HashSet::new();
        for machine in &inventory.machines {
            if !seen.insert(machine.name.as_str()) {
                return Err(QuickVmError::Config {
                    message: format!("duplicate machine name in inventory: {}", machine.name),
                });
            }
        }
        Ok(inventory)
    }
}

/// A call received by the simulated host, recorded for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimCall {
    /// `request_state_change` was invoked.
    StateChange {
        /// Target machine.
        vm: VmId,
        /// Requested code as received.
        requested: u16,
    },
    /// `initiate_shutdown` was invoked.
    Shutdown {
        /// Target machine.
        vm: VmId,
        /// Force flag as received.
        force: bool,
        /// Reason string as received.
        reason: String,
    },
}

#[derive(Debug)]
struct SimMachine {
    raw: u16,
    pending: Option<Pending>,
    shutdown_component: bool,
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    target: u16,
    since: Instant,
}

#[derive(Debug)]
struct SimState {
    provider: ProviderVersion,
    machines: BTreeMap<VmId, SimMachine>,
    reachable: bool,
    access_denied: bool,
    forced: HashMap<VmId, u32>,
    calls: Vec<SimCall>,
}

/// Simulated host.
#[derive(Debug)]
pub struct SimulatedHypervisor {
    state: Mutex<SimState>,
    transition_delay: Option<Duration>,
}

impl SimulatedHypervisor {
    /// Creates an empty host.
    #[must_use]
    pub fn new(provider: ProviderVersion) -> Self {
        Self {
            state: Mutex::new(SimState {
                provider,
                machines: BTreeMap::new(),
                reachable: true,
                access_denied: false,
                forced: HashMap::new(),
                calls: Vec::new(),
            }),
            transition_delay: None,
        }
    }

    /// Creates a host populated from an inventory.
    #[must_use]
    pub fn from_inventory(inventory: &Inventory) -> Self {
        let sim = Self::new(inventory.provider);
        {
            let mut state = sim.lock();
            for machine in &inventory.machines {
                let _ = state.machines.insert(
                    VmId::new(machine.name.clone()),
                    SimMachine {
                        raw: machine.state,
                        pending: None,
                        shutdown_component: machine.shutdown_component,
                    },
                );
            }
        }
        sim
    }

    /// Settles transitions automatically once `delay` has elapsed.
    #[must_use]
    pub const fn with_transition_delay(mut self, delay: Duration) -> Self {
        self.transition_delay = Some(delay);
        self
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds or replaces a machine.
    pub fn add_machine(&self, name: impl Into<VmId>, raw: u16) {
        let _ = self.lock().machines.insert(
            name.into(),
            SimMachine {
                raw,
                pending: None,
                shutdown_component: true,
            },
        );
    }

    /// Removes a machine.
    pub fn remove_machine(&self, name: &VmId) {
        let _ = self.lock().machines.remove(name);
    }

    /// Overwrites a machine's raw state, discarding any pending transition.
    pub fn set_state(&self, name: &VmId, raw: u16) {
        if let Some(machine) = self.lock().machines.get_mut(name) {
            machine.raw = raw;
            machine.pending = None;
        }
    }

    /// Toggles whether a machine's guest exposes a shutdown component.
    pub fn set_shutdown_component(&self, name: &VmId, present: bool) {
        if let Some(machine) = self.lock().machines.get_mut(name) {
            machine.shutdown_component = present;
        }
    }

    /// Makes every call fail as if the management service were down.
    pub fn set_reachable(&self, reachable: bool) {
        self.lock().reachable = reachable;
    }

    /// Makes every call fail with an access-denied error.
    pub fn deny_access(&self, denied: bool) {
        self.lock().access_denied = denied;
    }

    /// Makes every request for `name` return `code` without side effects.
    pub fn force_result(&self, name: impl Into<VmId>, code: u32) {
        let _ = self.lock().forced.insert(name.into(), code);
    }

    /// Removes all forced results.
    pub fn clear_forced(&self) {
        self.lock().forced.clear();
    }

    /// Calls received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<SimCall> {
        self.lock().calls.clone()
    }

    /// Current raw state of a machine.
    #[must_use]
    pub fn raw_state(&self, name: &VmId) -> Option<u16> {
        self.lock().machines.get(name).map(|m| m.raw)
    }

    /// Completes every pending transition. Returns how many settled.
    pub fn advance(&self) -> usize {
        let mut state = self.lock();
        let mut settled = 0;
        for machine in state.machines.values_mut() {
            if let Some(pending) = machine.pending.take() {
                machine.raw = pending.target;
                settled += 1;
            }
        }
        settled
    }

    fn settle_due(&self, state: &mut SimState) {
        let Some(delay) = self.transition_delay else {
            return;
        };
        for machine in state.machines.values_mut() {
            if let Some(pending) = machine.pending {
                if pending.since.elapsed() >= delay {
                    machine.raw = pending.target;
                    machine.pending = None;
                }
            }
        }
    }

    /// Locks the host and checks reachability and access.
    fn session(&self) -> std::result::Result<MutexGuard<'_, SimState>, HypervisorError> {
        let mut state = self.lock();
        if state.access_denied {
            return Err(HypervisorError::AccessDenied {
                message: "simulated host denies access".to_string(),
            });
        }
        if !state.reachable {
            return Err(HypervisorError::Unreachable {
                message: "simulated host is offline".to_string(),
            });
        }
        self.settle_due(&mut state);
        Ok(state)
    }
}

/// Transitional and final codes for a request, or the failure code.
fn plan(current: u16, requested: u16, provider: ProviderVersion) -> std::result::Result<(u16, u16), u32> {
    use ClassifiedState::{Off, Paused, Running, Saved};

    let (category, _) = classifier::classify(RawState::new(current));
    let (saved, paused) = match provider {
        ProviderVersion::V1 => (32_769, 32_768),
        ProviderVersion::V2 => (6, 9),
    };
    match (requested, category) {
        (RUNNING, Off | Saved) => Ok((STARTING, RUNNING)),
        (RUNNING, Paused) => Ok((RESUMING, RUNNING)),
        (OFF, Running | Paused) => Ok((STOPPING, OFF)),
        (6 | 32_769, Running | Paused) => Ok((SAVING, saved)),
        (9 | 32_768, Running) => Ok((PAUSING, paused)),
        (RESETTING, Running | Paused) => Ok((RESETTING, RUNNING)),
        (RUNNING | OFF | RESETTING | 6 | 9 | 32_768 | 32_769, _) => Err(INVALID_STATE),
        _ => Err(INVALID_PARAMETER),
    }
}

impl Hypervisor for SimulatedHypervisor {
    fn connect(&self) -> std::result::Result<(), HypervisorError> {
        let _state = self.session()?;
        Ok(())
    }

    fn machines(
        &self,
        filter: Option<&VmId>,
    ) -> std::result::Result<Vec<MachineRecord>, HypervisorError> {
        let state = self.session()?;
        Ok(state
            .machines
            .iter()
            .filter(|(id, _)| filter.is_none_or(|f| f == *id))
            .map(|(id, m)| MachineRecord {
                id: id.clone(),
                raw: RawState::new(m.raw),
            })
            .collect())
    }

    fn request_state_change(
        &self,
        vm: &VmId,
        requested: u16,
    ) -> std::result::Result<u32, HypervisorError> {
        let mut state = self.session()?;
        state.calls.push(SimCall::StateChange {
            vm: vm.clone(),
            requested,
        });
        if let Some(&code) = state.forced.get(vm) {
            return Ok(code);
        }
        let provider = state.provider;
        let machine = state
            .machines
            .get_mut(vm)
            .ok_or_else(|| HypervisorError::NotFound {
                name: vm.to_string(),
            })?;
        match plan(machine.raw, requested, provider) {
            Ok((transitional, target)) => {
                tracing::debug!(vm = %vm, from = machine.raw, to = target, "simulated transition");
                machine.raw = transitional;
                machine.pending = Some(Pending {
                    target,
                    since: Instant::now(),
                });
                Ok(TRANSITION_STARTED)
            }
            Err(code) => Ok(code),
        }
    }

    fn initiate_shutdown(
        &self,
        vm: &VmId,
        force: bool,
        reason: &str,
    ) -> std::result::Result<u32, HypervisorError> {
        let mut state = self.session()?;
        state.calls.push(SimCall::Shutdown {
            vm: vm.clone(),
            force,
            reason: reason.to_string(),
        });
        if let Some(&code) = state.forced.get(vm) {
            return Ok(code);
        }
        let machine = state
            .machines
            .get_mut(vm)
            .ok_or_else(|| HypervisorError::NotFound {
                name: vm.to_string(),
            })?;
        if !machine.shutdown_component {
            return Ok(GENERIC_FAILURE);
        }
        if classifier::classify(RawState::new(machine.raw)).0 != ClassifiedState::Running {
            return Ok(INVALID_STATE);
        }
        machine.raw = STOPPING;
        machine.pending = Some(Pending {
            target: OFF,
            since: Instant::now(),
        });
        Ok(TRANSITION_STARTED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> SimulatedHypervisor {
        let sim = SimulatedHypervisor::new(ProviderVersion::V2);
        sim.add_machine("web", RUNNING);
        sim.add_machine("db", OFF);
        sim
    }

    #[test]
    fn start_goes_through_starting() {
        let sim = host();
        let db = VmId::new("db");
        assert_eq!(sim.request_state_change(&db, RUNNING).unwrap(), TRANSITION_STARTED);
        assert_eq!(sim.raw_state(&db), Some(STARTING));
        assert_eq!(sim.advance(), 1);
        assert_eq!(sim.raw_state(&db), Some(RUNNING));
    }

    #[test]
    fn v2_pause_settles_on_quiesce() {
        let sim = host();
        let web = VmId::new("web");
        assert_eq!(sim.request_state_change(&web, 9).unwrap(), TRANSITION_STARTED);
        let _ = sim.advance();
        assert_eq!(sim.raw_state(&web), Some(9));
    }

    #[test]
    fn v1_save_settles_on_suspended() {
        let sim = SimulatedHypervisor::new(ProviderVersion::V1);
        sim.add_machine("web", RUNNING);
        let web = VmId::new("web");
        assert_eq!(sim.request_state_change(&web, 32_769).unwrap(), TRANSITION_STARTED);
        let _ = sim.advance();
        assert_eq!(sim.raw_state(&web), Some(32_769));
    }

    #[test]
    fn invalid_transition_is_refused() {
        let sim = host();
        let db = VmId::new("db");
        assert_eq!(sim.request_state_change(&db, 9).unwrap(), INVALID_STATE);
        assert_eq!(sim.raw_state(&db), Some(OFF));
    }

    #[test]
    fn unknown_requested_code_is_invalid_parameter() {
        let sim = host();
        assert_eq!(
            sim.request_state_change(&VmId::new("web"), 4).unwrap(),
            INVALID_PARAMETER
        );
    }

    #[test]
    fn shutdown_requires_running_and_component() {
        let sim = host();
        let web = VmId::new("web");
        assert_eq!(
            sim.initiate_shutdown(&VmId::new("db"), true, "test").unwrap(),
            INVALID_STATE
        );
        sim.set_shutdown_component(&web, false);
        assert_eq!(sim.initiate_shutdown(&web, true, "test").unwrap(), GENERIC_FAILURE);
        sim.set_shutdown_component(&web, true);
        assert_eq!(sim.initiate_shutdown(&web, true, "test").unwrap(), TRANSITION_STARTED);
        assert_eq!(sim.raw_state(&web), Some(STOPPING));
    }

    #[test]
    fn forced_result_bypasses_state_machine() {
        let sim = host();
        sim.force_result("web", 32_774);
        assert_eq!(sim.request_state_change(&VmId::new("web"), OFF).unwrap(), 32_774);
        assert_eq!(sim.raw_state(&VmId::new("web")), Some(RUNNING));
        assert_eq!(sim.calls().len(), 1);
    }

    #[test]
    fn offline_host_errors() {
        let sim = host();
        sim.set_reachable(false);
        assert!(matches!(sim.connect(), Err(HypervisorError::Unreachable { .. })));
        assert!(sim.machines(None).is_err());
        sim.deny_access(true);
        assert!(matches!(sim.connect(), Err(HypervisorError::AccessDenied { .. })));
    }

    #[test]
    fn machines_filters_by_name() {
        let sim = host();
        let records = sim.machines(Some(&VmId::new("db"))).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].raw, RawState::new(OFF));
        assert!(sim.machines(Some(&VmId::new("nope"))).unwrap().is_empty());
    }

    #[test]
    fn delayed_transitions_settle_lazily() {
        let sim = host().with_transition_delay(Duration::ZERO);
        let db = VmId::new("db");
        let _ = sim.request_state_change(&db, RUNNING).unwrap();
        let records = sim.machines(Some(&db)).unwrap();
        assert_eq!(records[0].raw, RawState::new(RUNNING));
    }

    #[test]
    fn inventory_parses_and_rejects_duplicates() {
        let yaml = "provider: v1\nmachines:\n  - name: web\n    state: 2\n  - name: db\n    state: 3\n    shutdown_component: false\n";
        let inventory = Inventory::from_yaml(yaml).unwrap();
        assert_eq!(inventory.provider, ProviderVersion::V1);
        assert!(inventory.machines[0].shutdown_component);
        assert!(!inventory.machines[1].shutdown_component);
        let sim = SimulatedHypervisor::from_inventory(&inventory);
        assert_eq!(sim.machines(None).unwrap().len(), 2);

        let dup = "machines:\n  - name: a\n    state: 2\n  - name: a\n    state: 3\n";
        assert!(Inventory::from_yaml(dup).is_err());
    }

    #[test]
    fn inventory_loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts.yaml");
        std::fs::write(&path, "machines:\n  - name: lab\n    state: 32781\n").unwrap();
        let inventory = Inventory::load(&path).unwrap();
        assert_eq!(inventory.machines[0].state, 32_781);
    }
}
