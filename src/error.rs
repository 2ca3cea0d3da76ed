use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that may occur in this library.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum Error {
    /// The OS has not (yet) granted access to the device.
    #[error("Permission to use `{0}` is missing")]
    PermissionDenied(String),

    /// Some other process or session has claimed the device.
    #[error("The device `{0}` is busy")]
    DeviceBusy(String),

    /// No device matched, or the device went away.
    #[error("No such device: {0}")]
    DeviceNotFound(String),

    /// Transport failure.
    #[error("IO problem: {0}")]
    Io(String),

    /// A write did not complete in time.
    /// The link is still usable.
    #[error("Timed out after {after_ms} ms")]
    Timeout {
        /// The bound that was exceeded.
        after_ms: u64,
    },

    /// The operation is not legal in the current session state.
    /// For example, writing while disconnected.
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        /// What was attempted.
        operation: String,

        /// The state the session was in.
        state: String,
    },

    /// A configuration or line parameter is not valid.
    #[error("Bad configuration: {0}")]
    BadConfig(String),
}

impl Error {
    pub(crate) fn invalid_state(operation: &str, state: impl ToString) -> Self {
        Self::InvalidState {
            operation: operation.into(),
            state: state.to_string(),
        }
    }

    /// If this is a [`Error::BadConfig`], get the problem description.
    pub fn try_into_bad_config(self) -> Option<String> {
        match self {
            Self::BadConfig(problem) => Some(problem),
            _ => None,
        }
    }

    /// Map an error from the serial port layer onto our taxonomy.
    ///
    /// Busy ports are only reported through the error text on some platforms,
    /// so the description is inspected as well.
    pub(crate) fn from_serial(path: &str, e: tokio_serial::Error) -> Self {
        let description = e.description.to_lowercase();

        if description.contains("busy") {
            return Self::DeviceBusy(path.into());
        }

        match e.kind {
            tokio_serial::ErrorKind::NoDevice => Self::DeviceNotFound(path.into()),
            tokio_serial::ErrorKind::InvalidInput => Self::BadConfig(e.description),
            tokio_serial::ErrorKind::Io(io::ErrorKind::PermissionDenied) => {
                Self::PermissionDenied(path.into())
            }
            tokio_serial::ErrorKind::Io(io::ErrorKind::NotFound) => {
                Self::DeviceNotFound(path.into())
            }
            _ => Self::Io(format!("{path}: {}", e.description)),
        }
    }
}

// Needed by decoders using this error type.
impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io(e.to_string())
    }
}
