#![deny(missing_docs)]

//! This crate manages a session with a single serial-over-USB device,
//! such as an IMU sensor, on behalf of a host application.
//!
//! Devices are enumerated through a [`backend::Backend`].
//! Connecting asks the OS for permission if needed, then opens the link
//! with the requested line parameters.
//! A background task reads from the device into a buffer which the host drains
//! whenever it likes. No framing is done on the received bytes.
//!
//! Permission results, connection changes and I/O faults are delivered
//! in order through an event queue the host polls or awaits.
//!
//! For hosts without an async runtime, see [`host::HostBridge`].

/// Enumerating, permission and opening links: the OS side.
pub mod backend;

/// The receive buffer shared with the background reader.
pub mod buffer;

/// The command line interface.
pub mod cli;

/// Relates to config files.
pub mod config;

/// Device descriptors and selecting among them.
pub mod device;

/// Possible errors in this library.
pub mod error;

/// Events the session emits.
pub mod events;

/// A blocking facade for hosts.
pub mod host;

/// Logging/tracing setup.
pub mod logging;

/// Line parameters, links and codecs.
pub mod serial;

/// The session manager.
pub mod session;

/// The session state machine.
pub mod state;
