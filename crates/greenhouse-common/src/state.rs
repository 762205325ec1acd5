//! Link and session state machines shared by the controller subsystems.
//!
//! Every link follows the same shape:
//! NOT_READY → ATTEMPTING → READY, and READY → NOT_READY on loss.
//!
//! The telemetry uplink has its own session states because its connect
//! phase carries a bounded poll budget.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Readiness of one link (network association, time source).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LinkState {
    /// Link is down and no request is outstanding.
    #[default]
    NotReady,
    /// A (re)association request has been issued.
    Attempting,
    /// Link is usable.
    Ready,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotReady => write!(f, "NOT_READY"),
            Self::Attempting => write!(f, "ATTEMPTING"),
            Self::Ready => write!(f, "READY"),
        }
    }
}

impl LinkState {
    /// Check if a transition to `target` is valid from the current state.
    #[must_use]
    pub fn can_transition_to(&self, target: LinkState) -> bool {
        use LinkState::{Attempting, NotReady, Ready};

        matches!(
            (self, target),
            (NotReady, Attempting)
                // Optimistic readiness once a request has been issued
                | (NotReady, Ready)
                | (Attempting, Ready)
                // Retry while still down
                | (Attempting, Attempting)
                | (Attempting, NotReady)
                // Loss detection
                | (Ready, NotReady)
        )
    }

    /// Returns true if the link is usable.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

/// Link state wrapper that checks transitions.
#[derive(Debug, Clone, Default)]
pub struct LinkMachine {
    current: LinkState,
}

impl LinkMachine {
    /// Create a new machine starting in NOT_READY.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the current state.
    #[must_use]
    pub fn state(&self) -> LinkState {
        self.current
    }

    /// Returns true if the link is usable.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.current.is_ready()
    }

    /// Move to `target`, returning true if the state changed.
    ///
    /// Staying in the current state is always allowed.
    pub fn enter(&mut self, target: LinkState) -> bool {
        if self.current == target {
            return false;
        }
        debug_assert!(
            self.current.can_transition_to(target),
            "invalid link transition {} -> {}",
            self.current,
            target
        );
        self.current = target;
        true
    }
}

/// Telemetry uplink session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    /// No session; a connect is attempted once the network is ready.
    #[default]
    Disconnected,
    /// Connect issued, waiting for the transport to report connected.
    Connecting {
        /// Status polls left before giving up.
        polls_remaining: u32,
    },
    /// Session established; publishing is allowed.
    Connected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "DISCONNECTED"),
            Self::Connecting { polls_remaining } => {
                write!(f, "CONNECTING({polls_remaining})")
            }
            Self::Connected => write!(f, "CONNECTED"),
        }
    }
}

impl SessionState {
    /// Returns true if publishing is allowed.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Read-only snapshot for an external status indicator renderer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusView {
    /// Network association is up.
    pub network_ready: bool,
    /// Time source session is up.
    pub time_source_ready: bool,
    /// Telemetry session is connected.
    pub telemetry_ready: bool,
    /// Valve output is energized.
    pub pumping: bool,
}
