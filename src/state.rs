use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No link, nothing pending.
    #[default]
    Disconnected,

    /// Waiting for the OS to answer a permission request.
    PermissionPending,

    /// The link is being opened.
    Connecting,

    /// The link is open and being read.
    Connected,

    /// Opening failed.
    /// Must be acknowledged before connecting again.
    Error(String),
}

/// Something that moves the session from one state to another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// The host asked to connect, and the device is (or is not) permitted.
    Connect {
        /// Does the OS already allow us to open the device?
        permitted: bool,
    },

    /// The OS answered a permission request.
    PermissionResult {
        /// Was it granted?
        granted: bool,
    },

    /// The link was opened.
    Opened,

    /// The link could not be opened.
    OpenFailed(String),

    /// The host acknowledged an error.
    Acknowledge,

    /// The host asked to disconnect.
    Disconnect,

    /// Reading or writing failed in a way the link cannot recover from.
    Fault,
}

impl Trigger {
    fn operation(&self) -> &'static str {
        match self {
            Trigger::Connect { .. } => "connect",
            Trigger::PermissionResult { .. } => "handle a permission result",
            Trigger::Opened => "complete opening",
            Trigger::OpenFailed(_) => "fail opening",
            Trigger::Acknowledge => "acknowledge",
            Trigger::Disconnect => "disconnect",
            Trigger::Fault => "handle a fault",
        }
    }
}

impl SessionState {
    /// The state after applying the trigger,
    /// or [`Error::InvalidState`] if the trigger is not legal here.
    ///
    /// Disconnecting is always legal, and a no-op when already disconnected.
    pub fn next(&self, trigger: &Trigger) -> Result<SessionState, Error> {
        use SessionState::*;

        let next = match (self, trigger) {
            (Disconnected, Trigger::Connect { permitted: false }) => PermissionPending,
            (Disconnected, Trigger::Connect { permitted: true }) => Connecting,

            (PermissionPending, Trigger::PermissionResult { granted: true }) => Connecting,
            (PermissionPending, Trigger::PermissionResult { granted: false }) => Disconnected,

            (Connecting, Trigger::Opened) => Connected,
            (Connecting, Trigger::OpenFailed(reason)) => Error(reason.clone()),

            (Error(_), Trigger::Acknowledge) => Disconnected,

            (_, Trigger::Disconnect) => Disconnected,
            (Connected, Trigger::Fault) => Disconnected,

            (state, trigger) => {
                return Err(crate::error::Error::invalid_state(
                    trigger.operation(),
                    state,
                ))
            }
        };

        Ok(next)
    }

    /// Only true when the link is fully open.
    pub fn is_connected(&self) -> bool {
        matches!(self, SessionState::Connected)
    }

    /// Check that an operation which needs an open link may go ahead.
    pub(crate) fn require_connected(&self, operation: &str) -> Result<(), Error> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(Error::invalid_state(operation, self))
        }
    }
}

impl Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "disconnected"),
            SessionState::PermissionPending => write!(f, "waiting for permission"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Connected => write!(f, "connected"),
            SessionState::Error(reason) => write!(f, "in error ({reason})"),
        }
    }
}
