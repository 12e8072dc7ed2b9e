//! The hypervisor management interface.

use quickvm_common::types::{RawState, VmId};

use crate::error::HypervisorError;

/// One machine as reported by the hypervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineRecord {
    /// Machine name.
    pub id: VmId,
    /// Current `EnabledState` code.
    pub raw: RawState,
}

/// Host facility for enumerating machines and requesting transitions.
///
/// Implementors return raw codes untouched; classification and outcome
/// mapping happen above this seam. The host's own entry must not be
/// included in enumerations.
pub trait Hypervisor: Send + Sync {
    /// Opens or verifies the management session.
    ///
    /// # Errors
    ///
    /// Returns an error if the interface is unreachable, unsupported, or
    /// denies access to the caller.
    fn connect(&self) -> Result<(), HypervisorError>;

    /// Enumerates machines, optionally restricted to one name.
    ///
    /// # Errors
    ///
    /// Returns an error if the query cannot be executed.
    fn machines(&self, filter: Option<&VmId>) -> Result<Vec<MachineRecord>, HypervisorError>;

    /// Requests a state change and returns the raw method result.
    ///
    /// # Errors
    ///
    /// Returns an error if the request could not be delivered at all.
    fn request_state_change(&self, vm: &VmId, requested: u16) -> Result<u32, HypervisorError>;

    /// Initiates a guest shutdown and returns the raw method result.
    ///
    /// # Errors
    ///
    /// Returns an error if the request could not be delivered at all.
    fn initiate_shutdown(&self, vm: &VmId, force: bool, reason: &str)
    -> Result<u32, HypervisorError>;
}
