//! The receive buffer shared between the background reader and the host.
//!
//! The lock is only ever held for a single append or a single swap,
//! never across I/O.

use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use parking_lot::Mutex;
use tracing::warn;

/// Bytes received from the device, in the order they arrived.
///
/// Cloning gives another handle to the same buffer.
#[derive(Debug, Clone, Default)]
pub struct ReceiveBuffer {
    inner: Arc<Mutex<BytesMut>>,

    /// If set, the oldest bytes are discarded to stay within this many bytes.
    capacity: Option<usize>,
}

impl ReceiveBuffer {
    /// An unbounded buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// A buffer which keeps at most `capacity` bytes,
    /// discarding the oldest bytes first.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::default(),
            capacity: Some(capacity),
        }
    }

    /// Append a chunk.
    pub fn append(&self, chunk: &[u8]) {
        let mut inner = self.inner.lock();
        inner.extend_from_slice(chunk);

        if let Some(capacity) = self.capacity {
            let overflow = inner.len().saturating_sub(capacity);

            if overflow > 0 {
                inner.advance(overflow);
                drop(inner);

                warn!("Receive buffer full, discarded {overflow} old byte(s)");
            }
        }
    }

    /// Take everything received so far, leaving the buffer empty.
    pub fn drain(&self) -> Bytes {
        std::mem::take(&mut *self.inner.lock()).freeze()
    }

    /// Drop everything received so far.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// How many bytes are waiting.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Is anything waiting?
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
