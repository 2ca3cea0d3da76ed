//! The session manager.
//!
//! One manager handles at most one open link at a time.
//! The caller's context drives connect/disconnect/write/drain,
//! while a background task per open link reads from the device
//! into the [`ReceiveBuffer`].
//!
//! Locks:
//!     - `session` (sync) is only held for state transitions and event sends, never across an await.
//!     - `link` (async) is held across writes and teardown.
//!       The background reader only takes it after a fault, to release its own link.

use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use itertools::Itertools;
use parking_lot::Mutex;
use tokio::{sync::oneshot, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

use crate::{
    backend::{Backend, PermissionResponder},
    buffer::ReceiveBuffer,
    config::Config,
    device::DeviceDescriptor,
    error::Error,
    events::{Event, EventBridge, TimestampedEvent},
    serial::{
        link::{self, LinkReader, LinkWriter},
        LinkConfig,
    },
    state::{SessionState, Trigger},
};

#[derive(Debug, Default)]
struct Session {
    state: SessionState,

    /// Bumped on every connect, so that late results from an older
    /// attempt can be told apart from the current one.
    generation: u64,

    device: Option<DeviceDescriptor>,
    permission_task: Option<JoinHandle<()>>,
    closed: bool,
}

struct ActiveLink {
    generation: u64,
    device: DeviceDescriptor,
    writer: LinkWriter,
    reader: JoinHandle<()>,
    stop: CancellationToken,
}

impl ActiveLink {
    /// Stop the reader, wait for it to finish, then release the handle.
    async fn shutdown(mut self) {
        self.stop.cancel();

        if let Err(e) = self.reader.await {
            if e.is_panic() {
                error!(?e, "Reader panicked");
            }
        }

        self.writer.close();

        info!(device = %self.device.system_path, "Link released");
    }
}

struct Shared {
    backend: Box<dyn Backend>,
    config: Config,
    session: Mutex<Session>,
    buffer: ReceiveBuffer,
    events: EventBridge,
    link: tokio::sync::Mutex<Option<ActiveLink>>,
}

impl Shared {
    fn transition(&self, session: &mut Session, trigger: Trigger) -> Result<(), Error> {
        let next = session.state.next(&trigger)?;

        if next != session.state {
            debug!(from = %session.state, to = %next, ?trigger, "Session state change");
        }
        session.state = next;

        Ok(())
    }

    async fn release_link(&self) {
        let link = self.link.lock().await.take();

        if let Some(link) = link {
            link.shutdown().await;
        }
    }

    /// The link failed while connected.
    /// Stale reports from an older link, or after a disconnect, are ignored.
    fn fault(&self, generation: u64, reason: String) {
        let mut session = self.session.lock();

        if session.generation != generation || !session.state.is_connected() {
            debug!(%reason, "Ignoring fault, the link is no longer current");
            return;
        }

        match self.transition(&mut session, Trigger::Fault) {
            Ok(()) => {
                session.device = None;
                self.events.send(Event::IoFault { reason });
                self.events.send(Event::Disconnected);
            }
            Err(e) => warn!(?e, "Could not apply fault"),
        }
    }

    async fn await_permission(
        self: Arc<Self>,
        generation: u64,
        device: DeviceDescriptor,
        link_config: LinkConfig,
        answer: oneshot::Receiver<bool>,
    ) {
        // A dropped responder means nobody will ever answer.
        let granted = answer.await.unwrap_or(false);

        {
            let mut session = self.session.lock();

            if session.generation != generation
                || session.state != SessionState::PermissionPending
            {
                debug!(%granted, "Permission answer arrived for an abandoned request");
                return;
            }
            session.permission_task = None;

            self.events.send(Event::PermissionResult {
                device: device.system_path.clone(),
                granted,
            });

            if let Err(e) = self.transition(&mut session, Trigger::PermissionResult { granted }) {
                warn!(?e, "Could not apply permission result");
                return;
            }

            if !granted {
                info!("Permission denied, back to disconnected");
                return;
            }
        }

        if let Err(e) = self.establish(generation, device, link_config).await {
            warn!(%e, "Could not connect after permission was granted");
        }
    }

    /// Open the device and start reading, moving from connecting to connected (or error).
    async fn establish(
        self: &Arc<Self>,
        generation: u64,
        device: DeviceDescriptor,
        link_config: LinkConfig,
    ) -> Result<(), Error> {
        let opened = self.backend.open(&device, &link_config);

        let mut slot = self.link.lock().await;
        let mut session = self.session.lock();

        if session.generation != generation || session.state != SessionState::Connecting {
            debug!("Session moved on while opening, dropping the link");
            return Err(Error::invalid_state("complete opening", &session.state));
        }

        let stream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                error!(%e, device = %device.system_path, "Open failed");

                self.transition(&mut session, Trigger::OpenFailed(e.to_string()))?;
                self.events.send(Event::OpenFailed {
                    reason: e.to_string(),
                });

                return Err(e);
            }
        };

        let (reader, writer) = link::split(
            &device.system_path,
            stream,
            self.config.write_timeout(),
        );

        self.transition(&mut session, Trigger::Opened)?;
        session.device = Some(device.clone());

        let stop = CancellationToken::new();
        let span = info_span!("reader", device = %device.system_path);
        let reader = tokio::spawn(
            self.clone()
                .read_loop(generation, reader, stop.clone())
                .instrument(span),
        );

        *slot = Some(ActiveLink {
            generation,
            device: device.clone(),
            writer,
            reader,
            stop,
        });

        info!(device = %device.system_path, %link_config, "Connected");
        self.events.send(Event::Connected {
            device: device.system_path,
        });

        Ok(())
    }

    async fn read_loop(self: Arc<Self>, generation: u64, mut reader: LinkReader, stop: CancellationToken) {
        debug!("Reader started");

        let reason = loop {
            tokio::select! {
                biased;

                _ = stop.cancelled() => {
                    debug!("Reader stopping");
                    return;
                }
                chunk = reader.next() => match chunk {
                    Some(Ok(chunk)) => {
                        trace!("Bytes from device: `{:?}`", &chunk[..chunk.len().min(32)]);
                        self.buffer.append(&chunk);
                    }
                    Some(Err(e)) => break format!("read failed: {e}"),
                    None => break "link closed by the device".to_string(),
                }
            }
        };

        error!(%reason, "Serial link error, exiting");
        drop(reader);

        self.fault(generation, reason);
        self.release_faulted(generation).await;
    }

    /// Release a link whose reader gave up.
    /// Called by that reader, so it is not waited for.
    async fn release_faulted(&self, generation: u64) {
        let mut slot = self.link.lock().await;

        if !matches!(slot.as_ref(), Some(link) if link.generation == generation) {
            return;
        }

        if let Some(mut link) = slot.take() {
            link.writer.close();
            info!(device = %link.device.system_path, "Link released after fault");
        }
    }
}

/// Manages a session with one serial device.
pub struct SessionManager {
    shared: Arc<Shared>,
}

impl SessionManager {
    /// Create a manager on top of the given backend.
    ///
    /// No runtime is needed for this, but connecting must happen within a tokio runtime.
    pub fn new<B: Backend>(backend: B, config: Config) -> Result<Self, Error> {
        config.validate()?;

        let buffer = match config.buffer_capacity {
            Some(capacity) => ReceiveBuffer::with_capacity(capacity),
            None => ReceiveBuffer::new(),
        };

        Ok(Self {
            shared: Arc::new(Shared {
                backend: Box::new(backend),
                events: EventBridge::new(config.event_log_size),
                config,
                session: Mutex::default(),
                buffer,
                link: tokio::sync::Mutex::new(None),
            }),
        })
    }

    /// The configuration in use.
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Enumerate the devices the backend sees right now.
    pub fn list_devices(&self) -> Vec<DeviceDescriptor> {
        self.shared.backend.list_devices()
    }

    /// The devices formatted as `"<path> (VID: XXXX, PID: XXXX)"`.
    pub fn device_list(&self) -> Vec<String> {
        self.list_devices()
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    /// Connect using the configured line parameters.
    /// See [`SessionManager::connect_with`].
    pub async fn connect(&self) -> Result<(), Error> {
        self.connect_with(self.shared.config.link).await
    }

    /// Connect to the configured device (or the first one found).
    ///
    /// If the OS has not granted access yet, permission is requested and
    /// [`Error::PermissionDenied`] is returned.
    /// The session then waits for the answer, and when granted, continues to connect
    /// on its own. Watch the events to learn the outcome.
    pub async fn connect_with(&self, link_config: LinkConfig) -> Result<(), Error> {
        link_config.validate()?;

        let shared = &self.shared;

        {
            let session = shared.session.lock();
            if session.closed {
                return Err(Error::invalid_state("connect", "closed"));
            }
            // Fail early with the state problem rather than whatever enumeration finds.
            session.state.next(&Trigger::Connect { permitted: true })?;
        }

        let devices = shared.backend.list_devices();
        let filter = shared.config.device.clone().unwrap_or_default();

        let Some(device) = filter.select(&devices).cloned() else {
            let seen = devices.iter().map(|device| &device.system_path).join(", ");
            warn!(%filter, %seen, "No device matches");

            return Err(Error::DeviceNotFound(filter.to_string()));
        };

        let permitted = device.has_permission;

        let generation = {
            let mut session = shared.session.lock();
            if session.closed {
                return Err(Error::invalid_state("connect", "closed"));
            }

            shared.transition(&mut session, Trigger::Connect { permitted })?;
            session.generation += 1;
            session.generation
        };

        // Anything left from a link which faulted.
        shared.release_link().await;
        shared.buffer.clear();

        info!(device = %device, %link_config, "Connecting");

        if permitted {
            return shared.establish(generation, device, link_config).await;
        }

        info!(device = %device.system_path, "Requesting permission");

        let (responder, answer) = PermissionResponder::new(&device.system_path);
        let task = tokio::spawn(
            shared
                .clone()
                .await_permission(generation, device.clone(), link_config, answer)
                .instrument(info_span!("permission", device = %device.system_path)),
        );

        {
            let mut session = shared.session.lock();
            if session.generation == generation {
                session.permission_task = Some(task);
            } else {
                task.abort();
            }
        }

        shared.backend.request_permission(&device, responder);

        Err(Error::PermissionDenied(device.system_path))
    }

    /// Leave the error state reached when opening failed.
    pub fn acknowledge(&self) -> Result<(), Error> {
        let mut session = self.shared.session.lock();

        self.shared.transition(&mut session, Trigger::Acknowledge)
    }

    /// Disconnect, from whatever state the session is in.
    ///
    /// When this returns the background reader has stopped,
    /// so nothing more is appended to the receive buffer,
    /// and the OS handle is released.
    /// Calling this more than once is fine.
    pub async fn disconnect(&self) {
        let shared = &self.shared;

        let generation = {
            let mut session = shared.session.lock();
            let was_connected = session.state.is_connected();

            if session.state != SessionState::Disconnected {
                info!(from = %session.state, "Disconnecting");

                if let Err(e) = shared.transition(&mut session, Trigger::Disconnect) {
                    warn!(?e, "Could not disconnect");
                }
            }

            session.device = None;

            if let Some(task) = session.permission_task.take() {
                task.abort();
            }

            if was_connected {
                shared.events.send(Event::Disconnected);
            }

            session.generation
        };

        shared.release_link().await;

        // A connect may have started meanwhile, its bytes are not ours to clear.
        let session = shared.session.lock();
        if session.generation == generation {
            shared.buffer.clear();
        }
    }

    /// Put bytes on the wire.
    ///
    /// Waits at most the configured write timeout.
    /// A timeout leaves the session connected,
    /// any other failure tears the link down.
    pub async fn write(&self, bytes: &[u8]) -> Result<(), Error> {
        let shared = &self.shared;

        let generation = {
            let session = shared.session.lock();
            session.state.require_connected("write")?;
            session.generation
        };

        let mut slot = shared.link.lock().await;

        let Some(link) = slot.as_mut().filter(|link| link.generation == generation) else {
            let state = shared.session.lock().state.to_string();
            return Err(Error::invalid_state("write", state));
        };

        match link.writer.write(bytes).await {
            Ok(()) => Ok(()),
            Err(e @ Error::Timeout { .. }) => {
                warn!(%e, "Write timed out, link kept");
                Err(e)
            }
            Err(e) => {
                error!(%e, "Write failed, tearing the link down");

                shared.fault(generation, e.to_string());

                let link = slot.take();
                drop(slot);

                if let Some(link) = link {
                    link.shutdown().await;
                }

                Err(e)
            }
        }
    }

    /// Take all bytes received so far.
    /// Never blocks on the reader.
    /// Empty if nothing arrived.
    pub fn drain(&self) -> Bytes {
        self.shared.buffer.drain()
    }

    /// Drain the receive buffer, replacing invalid UTF-8.
    pub fn drain_lossy(&self) -> String {
        String::from_utf8_lossy(&self.drain()).into_owned()
    }

    /// A snapshot of the current state.
    pub fn state(&self) -> SessionState {
        self.shared.session.lock().state.clone()
    }

    /// True only while fully connected.
    pub fn is_connected(&self) -> bool {
        self.shared.session.lock().state.is_connected()
    }

    /// The device the session is connected to.
    pub fn device(&self) -> Option<DeviceDescriptor> {
        self.shared.session.lock().device.clone()
    }

    /// Take the next event without waiting.
    pub fn poll_event(&self) -> Option<TimestampedEvent> {
        self.shared.events.poll()
    }

    /// Wait for the next event.
    /// Returns `None` after [`SessionManager::close`].
    pub async fn next_event(&self) -> Option<TimestampedEvent> {
        self.shared.events.next().await
    }

    /// The most recent events, newest first.
    pub fn recent_events(&self) -> Vec<TimestampedEvent> {
        self.shared.events.recent()
    }

    /// Disconnect and stop delivering events.
    ///
    /// Terminal: connecting afterwards is not possible.
    /// Calling this more than once is fine.
    pub async fn close(&self) {
        {
            let mut session = self.shared.session.lock();
            if session.closed {
                return;
            }
            session.closed = true;
        }

        self.disconnect().await;
        self.shared.events.close();

        info!("Session manager closed");
    }

    /// Has [`SessionManager::close`] been called?
    pub fn is_closed(&self) -> bool {
        self.shared.session.lock().closed
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        // Without this the reader would keep the shared state alive
        // until the device goes away.
        if let Some(task) = self.shared.session.lock().permission_task.take() {
            task.abort();
        }

        if let Ok(slot) = self.shared.link.try_lock() {
            if let Some(link) = slot.as_ref() {
                link.stop.cancel();
            }
        }
    }
}
