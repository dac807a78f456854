//! Reconciler state machine.

use serde::Serialize;

/// Whether a drain is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconcilerState {
    #[default]
    Idle,
    Draining,
}

/// Inputs to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEvent {
    /// Something asked for a drain.
    Trigger,
    /// The running drain ended, successfully or not.
    Finished,
}

/// What the caller should do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    StartDrain,
    /// A drain is already running; the trigger is absorbed by it.
    Coalesce,
    Nothing,
}

impl ReconcilerState {
    /// The transition table.
    #[must_use]
    pub const fn on(self, event: SyncEvent) -> (Self, Action) {
        match (self, event) {
            (Self::Idle, SyncEvent::Trigger) => (Self::Draining, Action::StartDrain),
            (Self::Draining, SyncEvent::Trigger) => (Self::Draining, Action::Coalesce),
            (Self::Draining | Self::Idle, SyncEvent::Finished) => (Self::Idle, Action::Nothing),
        }
    }
}

impl std::fmt::Display for ReconcilerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Draining => write!(f, "draining"),
        }
    }
}
