//! The OS serial stack.
//! Enumeration through `serialport`, links through `tokio-serial`.

use serialport::SerialPortType;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

use super::{Backend, PermissionResponder};
use crate::{device::DeviceDescriptor, error::Error, serial::link::LinkStream, serial::LinkConfig};

/// Uses the serial ports the OS exposes.
/// Only USB ports are listed.
#[derive(Debug, Default, Clone)]
pub struct NativeBackend;

impl NativeBackend {
    /// Create the backend.
    pub fn new() -> Self {
        Self
    }
}

#[cfg(unix)]
fn has_permission(path: &str) -> bool {
    use nix::unistd::{access, AccessFlags};

    access(path, AccessFlags::R_OK | AccessFlags::W_OK).is_ok()
}

#[cfg(not(unix))]
fn has_permission(_path: &str) -> bool {
    // No per-device access control to query here, opening will tell.
    true
}

impl Backend for NativeBackend {
    fn list_devices(&self) -> Vec<DeviceDescriptor> {
        let ports = match serialport::available_ports() {
            Ok(ports) => ports,
            Err(e) => {
                warn!(?e, "Could not enumerate serial ports");
                return vec![];
            }
        };

        ports
            .into_iter()
            .filter_map(|port| match port.port_type {
                SerialPortType::UsbPort(usb) => Some(DeviceDescriptor {
                    has_permission: has_permission(&port.port_name),
                    system_path: port.port_name,
                    vendor_id: usb.vid,
                    product_id: usb.pid,
                    product: usb.product,
                    manufacturer: usb.manufacturer,
                }),
                _ => {
                    debug!(port = %port.port_name, "Skipping non-USB port");
                    None
                }
            })
            .collect()
    }

    fn request_permission(&self, device: &DeviceDescriptor, responder: PermissionResponder) {
        // There is no interactive prompt on desktop systems.
        // Access is granted out of band, e.g. by group membership or udev rules.
        let granted = has_permission(&device.system_path);

        if !granted {
            warn!(
                device = %device.system_path,
                "No read/write access to the device, grant it through the OS and retry"
            );
        }

        responder.respond(granted);
    }

    fn open(&self, device: &DeviceDescriptor, config: &LinkConfig) -> Result<LinkStream, Error> {
        config.validate()?;

        let path = &device.system_path;

        info!(%path, %config, "Opening serial port");

        let stream = tokio_serial::new(path, config.baud_rate)
            .data_bits(config.serial_data_bits()?)
            .stop_bits(config.serial_stop_bits()?)
            .parity(config.parity.into())
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| Error::from_serial(path, e))?;

        Ok(Box::new(stream))
    }
}
