//! A mock, useful to test sessions without actual devices.
//!
//! Opened links are in-memory pipes.
//! The far end of each pipe is handed to whoever drives the test,
//! who can then play the device: write what it would send, read what it receives,
//! or drop it to emulate unplugging.

use std::{
    io,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    task::{Context, Poll},
};

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tracing::{debug, info};

use super::{Backend, PermissionResponder};
use crate::{device::DeviceDescriptor, error::Error, serial::link::LinkStream, serial::LinkConfig};

/// How a mock device answers permission requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionPolicy {
    /// Permission is already there.
    Granted,

    /// Not permitted until asked, then granted right away.
    GrantOnRequest,

    /// Not permitted, and asking is denied right away.
    DenyOnRequest,

    /// Not permitted, and asking waits for [`MockBackend::respond_permission`].
    Manual,
}

/// Shared between a mock link and the backend that opened it.
#[derive(Debug, Default)]
struct LinkFlags {
    broken_writes: AtomicBool,
    released: AtomicBool,
}

/// Our end of a mock link.
/// Writes fail once broken, and dropping it marks the link as released.
#[derive(Debug)]
struct MockLink {
    pipe: DuplexStream,
    flags: Arc<LinkFlags>,
}

impl AsyncRead for MockLink {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.pipe).poll_read(cx, buf)
    }
}

impl AsyncWrite for MockLink {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.flags.broken_writes.load(Ordering::SeqCst) {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "mock link broken",
            )));
        }
        Pin::new(&mut self.pipe).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.pipe).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.pipe).poll_shutdown(cx)
    }
}

impl Drop for MockLink {
    fn drop(&mut self) {
        self.flags.released.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug)]
struct MockDevice {
    descriptor: DeviceDescriptor,
    policy: PermissionPolicy,
    busy: bool,
    pending: Option<PermissionResponder>,
    remote: Option<DuplexStream>,
    link: Option<Arc<LinkFlags>>,
    opened: usize,
}

impl MockDevice {
    fn permitted(&self) -> bool {
        self.policy == PermissionPolicy::Granted
    }
}

/// A [`Backend`] with in-memory devices.
///
/// Cloning gives another handle to the same devices.
#[derive(Debug, Clone)]
pub struct MockBackend {
    devices: Arc<Mutex<Vec<MockDevice>>>,
    pipe_capacity: usize,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self {
            devices: Arc::default(),
            pipe_capacity: 4096,
        }
    }
}

impl MockBackend {
    /// A backend with no devices.
    pub fn new() -> Self {
        Self::default()
    }

    /// How many bytes each direction of a link can hold before writes stall.
    pub fn with_pipe_capacity(mut self, capacity: usize) -> Self {
        self.pipe_capacity = capacity;
        self
    }

    /// Plug in a device.
    pub fn add_device(&self, path: &str, vendor_id: u16, product_id: u16, policy: PermissionPolicy) {
        info!(%path, "Adding mock device");

        self.devices.lock().push(MockDevice {
            descriptor: DeviceDescriptor::new(path, vendor_id, product_id, false),
            policy,
            busy: false,
            pending: None,
            remote: None,
            link: None,
            opened: 0,
        });
    }

    /// Unplug a device.
    /// Links already handed out stay open until their far end is dropped.
    pub fn remove_device(&self, path: &str) {
        self.devices
            .lock()
            .retain(|device| device.descriptor.system_path != path);
    }

    /// Make opening the device fail as if someone else had claimed it.
    pub fn set_busy(&self, path: &str, busy: bool) {
        self.find(path, |device| device.busy = busy);
    }

    /// Answer a permission request held back by [`PermissionPolicy::Manual`].
    /// Returns false if no request was waiting.
    pub fn respond_permission(&self, path: &str, granted: bool) -> bool {
        let responder = self.find(path, |device| {
            let pending = device.pending.take();
            if granted && pending.is_some() {
                device.policy = PermissionPolicy::Granted;
            }
            pending
        });

        match responder.flatten() {
            Some(responder) => {
                responder.respond(granted);
                true
            }
            None => false,
        }
    }

    /// Is a permission request waiting for an answer?
    pub fn permission_requested(&self, path: &str) -> bool {
        self.find(path, |device| device.pending.is_some())
            .unwrap_or(false)
    }

    /// Take the device's end of the most recently opened link.
    pub fn take_remote(&self, path: &str) -> Option<DuplexStream> {
        self.find(path, |device| device.remote.take()).flatten()
    }

    /// Make writes on the most recently opened link fail, as if the cable broke mid-write.
    /// Reading is not affected.
    pub fn break_writes(&self, path: &str) {
        self.find(path, |device| {
            if let Some(flags) = &device.link {
                flags.broken_writes.store(true, Ordering::SeqCst);
            }
        });
    }

    /// Is the most recently opened link still held by whoever opened it?
    pub fn link_held(&self, path: &str) -> bool {
        self.find(path, |device| {
            device
                .link
                .as_ref()
                .map_or(false, |flags| !flags.released.load(Ordering::SeqCst))
        })
        .unwrap_or(false)
    }

    /// How many times the device has been opened.
    pub fn open_count(&self, path: &str) -> usize {
        self.find(path, |device| device.opened).unwrap_or(0)
    }

    fn find<T>(&self, path: &str, f: impl FnOnce(&mut MockDevice) -> T) -> Option<T> {
        self.devices
            .lock()
            .iter_mut()
            .find(|device| device.descriptor.system_path == path)
            .map(f)
    }
}

impl Backend for MockBackend {
    fn list_devices(&self) -> Vec<DeviceDescriptor> {
        self.devices
            .lock()
            .iter()
            .map(|device| DeviceDescriptor {
                has_permission: device.permitted(),
                ..device.descriptor.clone()
            })
            .collect()
    }

    fn request_permission(&self, device: &DeviceDescriptor, responder: PermissionResponder) {
        let path = &device.system_path;

        let mut devices = self.devices.lock();
        let Some(device) = devices
            .iter_mut()
            .find(|device| &device.descriptor.system_path == path)
        else {
            debug!(%path, "Permission asked for unknown mock device");
            responder.deny();
            return;
        };

        match device.policy {
            PermissionPolicy::Granted => responder.grant(),
            PermissionPolicy::GrantOnRequest => {
                device.policy = PermissionPolicy::Granted;
                responder.grant();
            }
            PermissionPolicy::DenyOnRequest => responder.deny(),
            PermissionPolicy::Manual => {
                debug!(%path, "Holding permission request");
                device.pending = Some(responder);
            }
        }
    }

    fn open(&self, device: &DeviceDescriptor, config: &LinkConfig) -> Result<LinkStream, Error> {
        config.validate()?;

        let path = &device.system_path;

        let mut devices = self.devices.lock();
        let device = devices
            .iter_mut()
            .find(|device| &device.descriptor.system_path == path)
            .ok_or_else(|| Error::DeviceNotFound(path.clone()))?;

        if !device.permitted() {
            return Err(Error::PermissionDenied(path.clone()));
        }
        if device.busy {
            return Err(Error::DeviceBusy(path.clone()));
        }

        let (ours, theirs) = tokio::io::duplex(self.pipe_capacity);
        let flags = Arc::new(LinkFlags::default());

        device.remote = Some(theirs);
        device.link = Some(flags.clone());
        device.opened += 1;

        info!(%path, %config, "Opened mock link");

        Ok(Box::new(MockLink { pipe: ours, flags }))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[test]
    fn listed_in_insertion_order() {
        let mock = MockBackend::new();
        mock.add_device("/dev/ttyUSB0", 0x1A86, 0x7523, PermissionPolicy::Granted);
        mock.add_device("/dev/ttyUSB1", 0x0403, 0x6001, PermissionPolicy::Manual);

        let devices = mock.list_devices();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].system_path, "/dev/ttyUSB0");
        assert!(devices[0].has_permission);
        assert!(!devices[1].has_permission);
    }

    #[test]
    fn open_without_permission() {
        let mock = MockBackend::new();
        mock.add_device("mock", 1, 2, PermissionPolicy::DenyOnRequest);

        let device = &mock.list_devices()[0];
        let result = mock.open(device, &LinkConfig::default());
        assert!(matches!(result, Err(Error::PermissionDenied(_))));
    }

    #[test]
    fn open_busy() {
        let mock = MockBackend::new();
        mock.add_device("mock", 1, 2, PermissionPolicy::Granted);
        mock.set_busy("mock", true);

        let device = &mock.list_devices()[0];
        let result = mock.open(device, &LinkConfig::default());
        assert!(matches!(result, Err(Error::DeviceBusy(_))));
    }

    #[test]
    fn open_unplugged() {
        let mock = MockBackend::new();
        mock.add_device("mock", 1, 2, PermissionPolicy::Granted);
        let device = mock.list_devices().remove(0);
        mock.remove_device("mock");

        let result = mock.open(&device, &LinkConfig::default());
        assert_eq!(result.err(), Some(Error::DeviceNotFound("mock".into())));
    }

    #[tokio::test]
    async fn manual_permission() {
        let mock = MockBackend::new();
        mock.add_device("mock", 1, 2, PermissionPolicy::Manual);
        let device = mock.list_devices().remove(0);

        let (responder, rx) = PermissionResponder::new("mock");
        mock.request_permission(&device, responder);
        assert!(mock.permission_requested("mock"));

        assert!(mock.respond_permission("mock", true));
        assert!(rx.await.unwrap());
        assert!(mock.list_devices()[0].has_permission);

        // Nothing waiting anymore.
        assert!(!mock.respond_permission("mock", true));
    }

    #[tokio::test]
    async fn link_is_a_pipe() {
        let mock = MockBackend::new();
        mock.add_device("mock", 1, 2, PermissionPolicy::Granted);
        let device = mock.list_devices().remove(0);

        let mut link = mock.open(&device, &LinkConfig::default()).unwrap();
        let mut remote = mock.take_remote("mock").unwrap();
        assert_eq!(mock.open_count("mock"), 1);

        remote.write_all(b"W: 1.0\n").await.unwrap();

        let mut received = [0u8; 7];
        link.read_exact(&mut received).await.unwrap();
        assert_eq!(&received, b"W: 1.0\n");
    }

    #[tokio::test]
    async fn broken_link() {
        let mock = MockBackend::new();
        mock.add_device("mock", 1, 2, PermissionPolicy::Granted);
        let device = mock.list_devices().remove(0);

        let mut link = mock.open(&device, &LinkConfig::default()).unwrap();
        assert!(mock.link_held("mock"));

        mock.break_writes("mock");
        let e = link.write_all(b"hi").await.unwrap_err();
        assert_eq!(e.kind(), io::ErrorKind::BrokenPipe);

        drop(link);
        assert!(!mock.link_held("mock"));
    }
}
