use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    device::DeviceFilter,
    error::Error,
    serial::{LinkConfig, Parity},
};

fn default_write_timeout_ms() -> u64 {
    1000
}

fn default_event_log_size() -> usize {
    100
}

fn default_auto_connect() -> bool {
    true
}

fn default_reconnect_interval_ms() -> u64 {
    3000
}

/// The configuration used for running a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Line parameters to open the link with.
    #[serde(default)]
    pub link: LinkConfig,

    /// Which device to use.
    /// If not set, the first device found is used.
    #[serde(default)]
    pub device: Option<DeviceFilter>,

    /// How long a write may take before giving up.
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,

    /// If set, at most this many received bytes are kept between reads.
    /// The oldest are discarded first.
    #[serde(default)]
    pub buffer_capacity: Option<usize>,

    /// How many recent events to remember.
    #[serde(default = "default_event_log_size")]
    pub event_log_size: usize,

    /// Whether a monitoring host should connect (and reconnect) on its own.
    #[serde(default = "default_auto_connect")]
    pub auto_connect: bool,

    /// How long to wait between connection attempts.
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            link: LinkConfig::default(),
            device: None,
            write_timeout_ms: default_write_timeout_ms(),
            buffer_capacity: None,
            event_log_size: default_event_log_size(),
            auto_connect: default_auto_connect(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
        }
    }
}

impl Config {
    fn ron() -> ron::Options {
        ron::Options::default()
            .with_default_extension(ron::extensions::Extensions::IMPLICIT_SOME)
            .with_default_extension(ron::extensions::Extensions::UNWRAP_NEWTYPES)
    }

    /// Deserialize a .ron file's contents.
    pub fn deserialize(input: &str) -> Result<Self, Error> {
        let config = Self::ron()
            .from_str::<Config>(input)
            .map_err(|e| Error::BadConfig(format!("Could not parse config: {e}")))?;

        config.validate()?;

        Ok(config)
    }

    /// An example configuration with some fields filled in.
    pub fn example() -> Self {
        Self {
            link: LinkConfig {
                baud_rate: 115_200,
                data_bits: 8,
                stop_bits: 1,
                parity: Parity::None,
            },
            device: Some(DeviceFilter {
                path: None,
                vendor_id: Some(0x1A86),
                product_id: Some(0x7523),
            }),
            buffer_capacity: Some(64 * 1024),
            ..Default::default()
        }
    }

    /// Serialize the configuration in a "pretty" (i.e. non-compact) fashion.
    pub fn serialize_pretty(&self) -> Result<String, Error> {
        Self::ron()
            .to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| Error::BadConfig(format!("Could not serialize config: {e}")))
    }

    /// Setup a new configuration from a RON file.
    pub fn new_from_path<P: AsRef<Path>>(p: P) -> Result<Self, Error> {
        let path = p.as_ref();
        let s = std::fs::read_to_string(path)
            .map_err(|e| Error::BadConfig(format!("Could not read {path:?}: {e}")))?;

        Self::deserialize(&s)
    }

    /// The write timeout as a [`Duration`].
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// The reconnect interval as a [`Duration`].
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        self.link.validate()?;

        if self.write_timeout_ms == 0 {
            return Err(Error::BadConfig(
                "The write timeout must be non-zero, otherwise no write can ever succeed".into(),
            ));
        }

        if self.buffer_capacity == Some(0) {
            return Err(Error::BadConfig(
                "A buffer capacity of zero would discard everything received. Omit it for an unbounded buffer.".into(),
            ));
        }

        Ok(())
    }
}
