//! Domain primitive types used across the QuickVM workspace.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name of a virtual machine as reported by the hypervisor.
///
/// Unique among the machines currently enumerable on the host, but not
/// guaranteed to survive a host rebuild.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VmId(String);

impl VmId {
    /// Creates a machine identity from its name.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for VmId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for VmId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// The hypervisor's native `EnabledState` code for a machine.
///
/// Always read from the hypervisor; the engine never invents one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawState(u16);

impl RawState {
    /// Wraps a raw code reported by the hypervisor.
    #[must_use]
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    /// Returns the numeric code.
    #[must_use]
    pub const fn code(self) -> u16 {
        self.0
    }
}

impl fmt::Display for RawState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Semantic category of a machine's state.
///
/// Derived from a [`RawState`]; the critical flag is carried separately so
/// that this enumeration stays a single axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifiedState {
    /// The machine is running.
    Running,
    /// The machine is turned off.
    Off,
    /// The machine is booting.
    Starting,
    /// The machine is turning off.
    Stopping,
    /// Execution is suspended in memory.
    Paused,
    /// Transitioning from running to paused.
    Pausing,
    /// Transitioning from paused to running.
    Resuming,
    /// Memory has been written to disk and the machine is not running.
    Saved,
    /// Transitioning to saved.
    Saving,
    /// A hard reset is in progress.
    Resetting,
    /// The code has no known meaning.
    Unknown,
}

impl ClassifiedState {
    /// All categories, in display order.
    pub const ALL: [Self; 11] = [
        Self::Running,
        Self::Off,
        Self::Starting,
        Self::Stopping,
        Self::Paused,
        Self::Pausing,
        Self::Resuming,
        Self::Saved,
        Self::Saving,
        Self::Resetting,
        Self::Unknown,
    ];

    /// Human-readable label used in menus and notifications.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Running => "Running",
            Self::Off => "Off",
            Self::Starting => "Starting",
            Self::Stopping => "Stopping",
            Self::Paused => "Paused",
            Self::Pausing => "Pausing",
            Self::Resuming => "Resuming",
            Self::Saved => "Saved",
            Self::Saving => "Saving",
            Self::Resetting => "Resetting",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ClassifiedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Version of the hypervisor's management provider.
///
/// The two versions disagree on the codes used to request a pause or a
/// save, and live under different namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderVersion {
    /// Legacy provider.
    V1,
    /// Current provider.
    #[default]
    V2,
}

/// The raw requested-state code carried by a state-change request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestedState(u16);

impl RequestedState {
    /// Wraps a raw requested-state code.
    #[must_use]
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    /// Returns the numeric code.
    #[must_use]
    pub const fn code(self) -> u16 {
        self.0
    }
}

impl fmt::Display for RequestedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A state a machine may be asked to move to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DesiredState {
    /// Start or resume the machine.
    Running,
    /// Turn the machine off without involving the guest.
    Off,
    /// Save the machine's memory to disk.
    Saved,
    /// Pause execution.
    Paused,
    /// Hard reset.
    Reset,
}

impl DesiredState {
    /// Resolves a requested-state code against the whitelist.
    ///
    /// Both providers' aliases are accepted, so a front-end built against
    /// either provider can talk to any host. Returns `None` for codes that
    /// must never reach the hypervisor.
    #[must_use]
    pub const fn from_requested(requested: RequestedState) -> Option<Self> {
        match requested.code() {
            2 => Some(Self::Running),
            3 => Some(Self::Off),
            6 | 32_769 => Some(Self::Saved),
            9 | 32_768 => Some(Self::Paused),
            11 => Some(Self::Reset),
            _ => None,
        }
    }

    /// Provider-neutral code used on the wire.
    #[must_use]
    pub const fn requested(self) -> RequestedState {
        match self {
            Self::Running => RequestedState(2),
            Self::Off => RequestedState(3),
            Self::Saved => RequestedState(32_769),
            Self::Paused => RequestedState(32_768),
            Self::Reset => RequestedState(11),
        }
    }

    /// Code understood by the given provider version.
    #[must_use]
    pub const fn provider_code(self, provider: ProviderVersion) -> u16 {
        match (self, provider) {
            (Self::Saved, ProviderVersion::V2) => 6,
            (Self::Paused, ProviderVersion::V2) => 9,
            _ => self.requested().code(),
        }
    }
}

impl fmt::Display for DesiredState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Off => write!(f, "off"),
            Self::Saved => write!(f, "saved"),
            Self::Paused => write!(f, "paused"),
            Self::Reset => write!(f, "reset"),
        }
    }
}

/// A request to move one machine to a new state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRequest {
    /// Target machine.
    pub vm: VmId,
    /// Raw requested-state code, validated by the dispatcher.
    pub requested: RequestedState,
}

impl CommandRequest {
    /// Creates a request carrying an arbitrary raw code.
    #[must_use]
    pub fn new(vm: impl Into<VmId>, requested: RequestedState) -> Self {
        Self {
            vm: vm.into(),
            requested,
        }
    }

    /// Creates a request for a whitelisted desired state.
    #[must_use]
    pub fn to(vm: impl Into<VmId>, desired: DesiredState) -> Self {
        Self::new(vm, desired.requested())
    }
}

/// Why the hypervisor refused or failed a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Unspecified failure.
    Generic,
    /// The caller lacks the rights for this operation.
    AccessDenied,
    /// The operation is not supported for this machine.
    NotSupported,
    /// The status of the machine could not be determined.
    StatusUnknown,
    /// The hypervisor gave up waiting.
    Timeout,
    /// A parameter was rejected.
    InvalidParameter,
    /// The machine is busy with another operation.
    SystemInUse,
    /// The machine's current state does not allow this operation.
    InvalidStateForOperation,
    /// A parameter had the wrong type.
    IncorrectDataType,
    /// The machine or the hypervisor is not reachable.
    SystemNotAvailable,
    /// The host ran out of memory.
    OutOfMemory,
    /// An undocumented result code.
    Unknown,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Generic => "the operation failed",
            Self::AccessDenied => "access denied",
            Self::NotSupported => "the operation is not supported",
            Self::StatusUnknown => "the status is unknown",
            Self::Timeout => "the operation timed out",
            Self::InvalidParameter => "invalid parameter",
            Self::SystemInUse => "the virtual machine is in use",
            Self::InvalidStateForOperation => "invalid state for this operation",
            Self::IncorrectDataType => "incorrect data type",
            Self::SystemNotAvailable => "the virtual machine is not available",
            Self::OutOfMemory => "out of memory",
            Self::Unknown => "unknown error",
        };
        f.write_str(text)
    }
}

/// Typed result of a state-change or shutdown request.
///
/// Reports acceptance, not completion: the new state is observed later
/// through the event feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum CommandOutcome {
    /// The transition completed synchronously.
    Success,
    /// The hypervisor accepted the request and will finish asynchronously.
    TransitionStarted,
    /// The request was refused or failed.
    Failed(FailureReason),
}

impl CommandOutcome {
    /// Whether the request was accepted.
    #[must_use]
    pub const fn is_accepted(self) -> bool {
        matches!(self, Self::Success | Self::TransitionStarted)
    }
}

impl fmt::Display for CommandOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "completed"),
            Self::TransitionStarted => write!(f, "transition started"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Current state of one machine, as returned by an enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmStatus {
    /// Machine identity.
    pub id: VmId,
    /// Classified state.
    pub state: ClassifiedState,
    /// Whether the hypervisor reports the state as critical.
    pub critical: bool,
    /// The raw code the classification was derived from.
    pub raw: RawState,
}

/// One observed state transition of a machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChangeEvent {
    /// Machine that changed.
    pub vm: VmId,
    /// New classified state.
    pub state: ClassifiedState,
    /// Whether the new state is critical.
    pub critical: bool,
    /// Raw code of the new state.
    pub raw: RawState,
    /// Position in the source's emission order, strictly increasing.
    pub sequence: u64,
    /// When the transition was observed.
    pub timestamp: DateTime<Utc>,
}

/// Identity of one connected notification consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriberId(uuid::Uuid);

impl SubscriberId {
    /// Generates a fresh random identity.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vm_id_conversions_agree() {
        let borrowed = VmId::from("web");
        let owned = VmId::from(String::from("web"));
        assert_eq!(borrowed, owned);
        assert_eq!(owned.as_str(), "web");
        assert_eq!(owned.to_string(), "web");
    }

    #[test]
    fn whitelist_accepts_both_provider_aliases() {
        assert_eq!(
            DesiredState::from_requested(RequestedState::new(9)),
            Some(DesiredState::Paused)
        );
        assert_eq!(
            DesiredState::from_requested(RequestedState::new(32_768)),
            Some(DesiredState::Paused)
        );
        assert_eq!(
            DesiredState::from_requested(RequestedState::new(6)),
            Some(DesiredState::Saved)
        );
    }

    #[test]
    fn whitelist_rejects_transitional_codes() {
        for code in [0, 1, 4, 5, 7, 8, 10, 32_770, 32_774, 32_781, u16::MAX] {
            assert_eq!(DesiredState::from_requested(RequestedState::new(code)), None);
        }
    }

    #[test]
    fn provider_codes_differ_only_for_pause_and_save() {
        assert_eq!(DesiredState::Paused.provider_code(ProviderVersion::V1), 32_768);
        assert_eq!(DesiredState::Paused.provider_code(ProviderVersion::V2), 9);
        assert_eq!(DesiredState::Saved.provider_code(ProviderVersion::V1), 32_769);
        assert_eq!(DesiredState::Saved.provider_code(ProviderVersion::V2), 6);
        assert_eq!(DesiredState::Running.provider_code(ProviderVersion::V2), 2);
        assert_eq!(DesiredState::Reset.provider_code(ProviderVersion::V1), 11);
    }

    #[test]
    fn outcome_serializes_with_reason() {
        let json = serde_json::to_string(&CommandOutcome::Failed(FailureReason::AccessDenied))
            .unwrap();
        assert_eq!(json, r#"{"status":"failed","reason":"access_denied"}"#);
        let json = serde_json::to_string(&CommandOutcome::TransitionStarted).unwrap();
        assert_eq!(json, r#"{"status":"transition_started"}"#);
    }

    #[test]
    fn subscriber_ids_are_distinct() {
        assert_ne!(SubscriberId::generate(), SubscriberId::generate());
    }
}
