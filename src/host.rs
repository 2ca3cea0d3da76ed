//! A blocking facade for hosts which are not async, e.g. a game engine's update loop.
//!
//! Every call is total: failures are logged and reported as `false`,
//! empty data, or nothing at all.

use tokio::runtime::Runtime;
use tracing::{info, warn};

use crate::{
    backend::{Backend, NativeBackend},
    config::Config,
    error::Error,
    events::TimestampedEvent,
    serial::{LinkConfig, Parity},
    session::SessionManager,
    state::SessionState,
};

/// Owns a session manager and the runtime its background reader runs on.
///
/// Do not create or drop this from within an async context.
pub struct HostBridge {
    manager: SessionManager,
    runtime: Runtime,
}

impl HostBridge {
    /// Create a bridge on top of the given backend.
    pub fn new<B: Backend>(backend: B, config: Config) -> Result<Self, Error> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("serial-reader")
            .enable_all()
            .build()
            .map_err(|e| Error::Io(format!("Could not start runtime: {e}")))?;

        let manager = SessionManager::new(backend, config)?;

        Ok(Self { manager, runtime })
    }

    /// Create a bridge using the OS serial ports.
    pub fn native(config: Config) -> Result<Self, Error> {
        Self::new(NativeBackend::new(), config)
    }

    /// Connect with the given line parameters.
    /// Parity is `0: None, 1: Odd, 2: Even`.
    ///
    /// False if not connected when this returns.
    /// That includes waiting for permission: the session then connects on its own
    /// once permission is granted, see [`HostBridge::poll_event`].
    pub fn connect(&self, baud_rate: u32, data_bits: u8, stop_bits: u8, parity: u8) -> bool {
        let link_config = match Parity::try_from(parity)
            .and_then(|parity| LinkConfig::new(baud_rate, data_bits, stop_bits, parity))
        {
            Ok(link_config) => link_config,
            Err(e) => {
                warn!(%e, "Rejected line parameters");
                return false;
            }
        };

        if let SessionState::Error(reason) = self.manager.state() {
            info!(%reason, "Clearing previous error before connecting");
            if let Err(e) = self.manager.acknowledge() {
                warn!(%e, "Could not clear previous error");
            }
        }

        match self.runtime.block_on(self.manager.connect_with(link_config)) {
            Ok(()) => true,
            Err(Error::PermissionDenied(device)) => {
                info!(%device, "Waiting for permission");
                false
            }
            Err(e) => {
                warn!(%e, "Connect failed");
                false
            }
        }
    }

    /// Disconnect, if connected.
    pub fn disconnect(&self) {
        self.runtime.block_on(self.manager.disconnect());
    }

    /// Everything received since the last call.
    pub fn read_data(&self) -> Vec<u8> {
        self.manager.drain().to_vec()
    }

    /// Like [`HostBridge::read_data`], as text with invalid UTF-8 replaced.
    pub fn read_string(&self) -> String {
        self.manager.drain_lossy()
    }

    /// Put bytes on the wire.
    pub fn send_data(&self, data: &[u8]) {
        if let Err(e) = self.runtime.block_on(self.manager.write(data)) {
            warn!(%e, "Send failed");
        }
    }

    /// Devices formatted as `"<path> (VID: XXXX, PID: XXXX)"`.
    pub fn get_device_list(&self) -> Vec<String> {
        self.manager.device_list()
    }

    /// True only while fully connected.
    pub fn is_connected(&self) -> bool {
        self.manager.is_connected()
    }

    /// A snapshot of the session state.
    pub fn state(&self) -> SessionState {
        self.manager.state()
    }

    /// Take the next event without waiting.
    pub fn poll_event(&self) -> Option<TimestampedEvent> {
        self.manager.poll_event()
    }

    /// Release everything.
    /// Terminal, and fine to call more than once.
    pub fn cleanup(&self) {
        self.runtime.block_on(self.manager.close());
    }
}

impl Drop for HostBridge {
    fn drop(&mut self) {
        self.cleanup();
    }
}
