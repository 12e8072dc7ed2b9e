//! Which commands are legal for a machine in a given state.
//!
//! Front-ends build their menus from these sets, and the dispatcher uses
//! the same rules to skip machines during bulk operations.

use std::fmt;
use std::str::FromStr;

use quickvm_common::types::{ClassifiedState, DesiredState};
use serde::{Deserialize, Serialize};

/// A user-facing command on a machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Open a console to the machine.
    Connect,
    /// Start a machine that is off or saved.
    Start,
    /// Power the machine off without involving the guest.
    TurnOff,
    /// Ask the guest operating system to shut down.
    ShutDown,
    /// Save the machine's memory to disk.
    Save,
    /// Pause execution.
    Pause,
    /// Continue a paused machine.
    Resume,
    /// Hard reset.
    Reset,
}

impl Action {
    /// All actions, in menu order.
    pub const ALL: [Self; 8] = [
        Self::Connect,
        Self::Start,
        Self::TurnOff,
        Self::ShutDown,
        Self::Save,
        Self::Pause,
        Self::Resume,
        Self::Reset,
    ];

    const fn bit(self) -> u8 {
        1 << (self as u8)
    }

    /// The hypervisor command that carries out this action.
    ///
    /// `Connect` is served by an external console and has none.
    #[must_use]
    pub const fn command(self) -> Option<Command> {
        match self {
            Self::Connect => None,
            Self::Start | Self::Resume => Some(Command::SetState(DesiredState::Running)),
            Self::TurnOff => Some(Command::SetState(DesiredState::Off)),
            Self::ShutDown => Some(Command::Shutdown),
            Self::Save => Some(Command::SetState(DesiredState::Saved)),
            Self::Pause => Some(Command::SetState(DesiredState::Paused)),
            Self::Reset => Some(Command::SetState(DesiredState::Reset)),
        }
    }

    /// Whether a machine in `state` may receive this action.
    #[must_use]
    pub const fn qualifies(self, state: ClassifiedState) -> bool {
        use ClassifiedState::{Off, Paused, Running, Saved, Unknown};

        match self {
            Self::Connect => !matches!(state, Unknown),
            Self::Start => matches!(state, Off | Saved),
            Self::TurnOff | Self::Save | Self::Reset => matches!(state, Running | Paused),
            Self::ShutDown | Self::Pause => matches!(state, Running),
            Self::Resume => matches!(state, Paused),
        }
    }

    /// Stable kebab-case name used on the command line.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Start => "start",
            Self::TurnOff => "turn-off",
            Self::ShutDown => "shut-down",
            Self::Save => "save",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Reset => "reset",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|a| a.name() == s)
            .ok_or_else(|| format!("unknown action: {s}"))
    }
}

/// What an action asks of the hypervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Request a state change.
    SetState(DesiredState),
    /// Initiate a graceful in-guest shutdown.
    Shutdown,
}

/// A set of actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActionSet(u8);

impl ActionSet {
    /// The empty set.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Adds an action.
    pub const fn insert(&mut self, action: Action) {
        self.0 |= action.bit();
    }

    /// Removes an action.
    pub const fn remove(&mut self, action: Action) {
        self.0 &= !action.bit();
    }

    /// Whether the set contains `action`.
    #[must_use]
    pub const fn contains(self, action: Action) -> bool {
        self.0 & action.bit() != 0
    }

    /// Whether the set is empty.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Number of actions in the set.
    #[must_use]
    pub const fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Union of two sets.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Iterates over the contained actions in menu order.
    pub fn iter(self) -> impl Iterator<Item = Action> {
        Action::ALL.into_iter().filter(move |a| self.contains(*a))
    }
}

impl FromIterator<Action> for ActionSet {
    fn from_iter<I: IntoIterator<Item = Action>>(iter: I) -> Self {
        let mut set = Self::empty();
        for action in iter {
            set.insert(action);
        }
        set
    }
}

/// Actions available for a single machine in `state`.
#[must_use]
pub fn available_actions(state: ClassifiedState) -> ActionSet {
    Action::ALL
        .into_iter()
        .filter(|a| a.qualifies(state))
        .collect()
}

/// Actions offered for "all machines": those for which at least one of the
/// given states qualifies. Connect is per machine and never offered in bulk.
#[must_use]
pub fn bulk_actions<I>(states: I) -> ActionSet
where
    I: IntoIterator<Item = ClassifiedState>,
{
    let mut set = states
        .into_iter()
        .fold(ActionSet::empty(), |acc, s| acc.union(available_actions(s)));
    set.remove(Action::Connect);
    set
}
