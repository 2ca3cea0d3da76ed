use std::{collections::VecDeque, fmt::Display};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, info};

/// Things that happen to a session which the host should know about.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Event {
    /// The OS answered a permission request for a device.
    PermissionResult {
        /// The device path.
        device: String,

        /// Whether access was granted.
        granted: bool,
    },

    /// A link was opened.
    Connected {
        /// The device path.
        device: String,
    },

    /// Opening a link failed.
    OpenFailed {
        /// What went wrong.
        reason: String,
    },

    /// Reading or writing failed, the link was torn down.
    IoFault {
        /// What went wrong.
        reason: String,
    },

    /// The session is no longer connected.
    Disconnected,
}

impl Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Event::PermissionResult {
                device,
                granted: true,
            } => write!(f, "permission granted for {device}"),
            Event::PermissionResult {
                device,
                granted: false,
            } => write!(f, "permission denied for {device}"),
            Event::Connected { device } => write!(f, "connected to {device}"),
            Event::OpenFailed { reason } => write!(f, "open failed: {reason}"),
            Event::IoFault { reason } => write!(f, "io fault: {reason}"),
            Event::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// An event and when it happened.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimestampedEvent {
    /// The event.
    pub inner: Event,

    /// When the event happened.
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl TimestampedEvent {
    /// Stamp an event with the current time.
    pub fn new(event: Event) -> Self {
        Self {
            inner: event,
            timestamp: chrono::Utc::now(),
        }
    }
}

impl Display for TimestampedEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.inner)
    }
}

#[derive(Debug, Default)]
struct Inner {
    pending: VecDeque<TimestampedEvent>,
    log: VecDeque<TimestampedEvent>,
    closed: bool,
}

/// An ordered event queue the host polls or awaits,
/// plus a log of the most recent events.
///
/// Once closed, nothing more is delivered.
#[derive(Debug)]
pub struct EventBridge {
    inner: Mutex<Inner>,
    log_size: usize,
    notify: Notify,
}

impl EventBridge {
    /// Create a new bridge.
    /// It will keep a log of at most `log_size` events.
    pub fn new(log_size: usize) -> Self {
        Self {
            inner: Mutex::default(),
            log_size,
            notify: Notify::new(),
        }
    }

    /// Queue an event for delivery and store it in the log.
    /// Dropped if the bridge is closed.
    pub fn send(&self, event: Event) {
        let event = TimestampedEvent::new(event);

        let mut inner = self.inner.lock();
        if inner.closed {
            debug!(%event, "Bridge closed, dropping event");
            return;
        }

        info!(%event, "Sending and storing event");

        inner.log.push_front(event.clone());
        // Truncate removes from the back, which means older events are split off first.
        inner.log.truncate(self.log_size);

        inner.pending.push_back(event);
        drop(inner);

        self.notify.notify_one();
    }

    /// Take the next event, if there is one.
    pub fn poll(&self) -> Option<TimestampedEvent> {
        self.inner.lock().pending.pop_front()
    }

    /// Wait for the next event.
    /// Returns `None` once the bridge is closed.
    pub async fn next(&self) -> Option<TimestampedEvent> {
        loop {
            let notified = self.notify.notified();

            {
                let mut inner = self.inner.lock();
                if inner.closed {
                    return None;
                }
                if let Some(event) = inner.pending.pop_front() {
                    return Some(event);
                }
            }

            notified.await;
        }
    }

    /// The most recent events, newest first.
    pub fn recent(&self) -> Vec<TimestampedEvent> {
        self.inner.lock().log.iter().cloned().collect()
    }

    /// Stop delivering events.
    /// Undelivered events are discarded.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.pending.clear();
        drop(inner);

        self.notify.notify_waiters();
    }

    /// Has [`EventBridge::close`] been called?
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}
