use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// A snapshot of one enumerated serial-over-USB device.
///
/// Regenerated on every enumeration, so `has_permission` may be stale
/// by the time it is looked at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Where the OS exposes the device.
    /// Likely "/dev/ttyUSBx" or "/dev/ttyACMx" on unix, and "COMx" on Windows.
    pub system_path: String,

    /// USB vendor id.
    pub vendor_id: u16,

    /// USB product id.
    pub product_id: u16,

    /// Whether the OS currently allows us to open the device.
    pub has_permission: bool,

    /// Product string, if the device reports one.
    #[serde(default)]
    pub product: Option<String>,

    /// Manufacturer string, if the device reports one.
    #[serde(default)]
    pub manufacturer: Option<String>,
}

impl DeviceDescriptor {
    /// A descriptor with no product strings.
    pub fn new(system_path: &str, vendor_id: u16, product_id: u16, has_permission: bool) -> Self {
        Self {
            system_path: system_path.into(),
            vendor_id,
            product_id,
            has_permission,
            product: None,
            manufacturer: None,
        }
    }
}

impl Display for DeviceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (VID: {:04X}, PID: {:04X})",
            self.system_path, self.vendor_id, self.product_id
        )
    }
}

/// Picks a device out of an enumeration.
///
/// Every field that is set must match.
/// An empty filter matches anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceFilter {
    /// Match on the system path.
    #[serde(default)]
    pub path: Option<String>,

    /// Match on the vendor id.
    #[serde(default)]
    pub vendor_id: Option<u16>,

    /// Match on the product id.
    #[serde(default)]
    pub product_id: Option<u16>,
}

impl DeviceFilter {
    /// Does the descriptor satisfy this filter?
    pub fn matches(&self, device: &DeviceDescriptor) -> bool {
        self.path
            .as_ref()
            .map_or(true, |path| path == &device.system_path)
            && self.vendor_id.map_or(true, |vid| vid == device.vendor_id)
            && self.product_id.map_or(true, |pid| pid == device.product_id)
    }

    /// Pick the first device satisfying the filter, in enumeration order.
    pub fn select<'a>(&self, devices: &'a [DeviceDescriptor]) -> Option<&'a DeviceDescriptor> {
        devices.iter().find(|device| self.matches(device))
    }
}

impl Display for DeviceFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts = vec![];

        if let Some(path) = &self.path {
            parts.push(format!("path: {path}"));
        }
        if let Some(vid) = self.vendor_id {
            parts.push(format!("VID: {vid:04X}"));
        }
        if let Some(pid) = self.product_id {
            parts.push(format!("PID: {pid:04X}"));
        }

        if parts.is_empty() {
            write!(f, "any device")
        } else {
            write!(f, "{}", parts.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn display_has_padded_upper_hex() {
        let device = DeviceDescriptor::new("/dev/ttyUSB0", 0x1A86, 0x7523, true);

        assert!(device.to_string().contains("VID: 1A86, PID: 7523"));
        assert_eq!(device.to_string(), "/dev/ttyUSB0 (VID: 1A86, PID: 7523)");
    }

    #[test]
    fn display_pads_small_ids() {
        let device = DeviceDescriptor::new("COM4", 0x403, 0x1, false);

        assert_eq!(device.to_string(), "COM4 (VID: 0403, PID: 0001)");
    }

    #[test]
    fn empty_filter_picks_first() {
        let devices = vec![
            DeviceDescriptor::new("/dev/ttyUSB0", 0x10C4, 0xEA60, true),
            DeviceDescriptor::new("/dev/ttyUSB1", 0x1A86, 0x7523, true),
        ];

        let picked = DeviceFilter::default().select(&devices).unwrap();
        assert_eq!(picked.system_path, "/dev/ttyUSB0");
    }

    #[test]
    fn filter_on_ids() {
        let devices = vec![
            DeviceDescriptor::new("/dev/ttyUSB0", 0x10C4, 0xEA60, true),
            DeviceDescriptor::new("/dev/ttyUSB1", 0x1A86, 0x7523, true),
        ];

        let filter = DeviceFilter {
            vendor_id: Some(0x1A86),
            ..Default::default()
        };
        assert_eq!(
            filter.select(&devices).unwrap().system_path,
            "/dev/ttyUSB1"
        );

        let filter = DeviceFilter {
            vendor_id: Some(0x1A86),
            product_id: Some(0xEA60),
            ..Default::default()
        };
        assert!(filter.select(&devices).is_none());
    }
}
