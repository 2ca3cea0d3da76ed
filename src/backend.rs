use tokio::sync::oneshot;
use tracing::debug;

use crate::{device::DeviceDescriptor, error::Error, serial::link::LinkStream, serial::LinkConfig};

pub(crate) mod mock;
pub(crate) mod native;

pub use mock::{MockBackend, PermissionPolicy};
pub use native::NativeBackend;

/// The OS side of things:
/// enumerating devices, asking for permission, and opening links.
pub trait Backend: Send + Sync + 'static {
    /// The devices currently present, in the order the OS reports them.
    /// Empty if enumeration is not possible.
    fn list_devices(&self) -> Vec<DeviceDescriptor>;

    /// Ask the OS for permission to use the device.
    ///
    /// The answer may come at any later point, from any thread,
    /// through the responder.
    /// Dropping the responder without answering counts as a denial.
    fn request_permission(&self, device: &DeviceDescriptor, responder: PermissionResponder);

    /// Open the device and apply the line parameters.
    fn open(&self, device: &DeviceDescriptor, config: &LinkConfig) -> Result<LinkStream, Error>;
}

/// Used by a [`Backend`] to deliver the answer to a permission request.
#[derive(Debug)]
pub struct PermissionResponder {
    device: String,
    tx: oneshot::Sender<bool>,
}

impl PermissionResponder {
    pub(crate) fn new(device: &str) -> (Self, oneshot::Receiver<bool>) {
        let (tx, rx) = oneshot::channel();

        (
            Self {
                device: device.into(),
                tx,
            },
            rx,
        )
    }

    /// Deliver the answer.
    pub fn respond(self, granted: bool) {
        if self.tx.send(granted).is_err() {
            debug!(device = %self.device, "Permission answer arrived after the request was abandoned");
        }
    }

    /// Shorthand for `respond(true)`.
    pub fn grant(self) {
        self.respond(true)
    }

    /// Shorthand for `respond(false)`.
    pub fn deny(self) {
        self.respond(false)
    }
}
