use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// The open link and its reading/writing halves.
pub mod link;

/// Codecs for decoding messages from drained bytes.
pub mod codecs;

/// Parity checking on the line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Parity {
    /// No parity bit.
    #[default]
    None,

    /// Odd parity.
    Odd,

    /// Even parity.
    Even,
}

impl TryFrom<u8> for Parity {
    type Error = Error;

    /// Hosts pass parity as `0: None, 1: Odd, 2: Even`.
    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::None),
            1 => Ok(Self::Odd),
            2 => Ok(Self::Even),
            other => Err(Error::BadConfig(format!(
                "Parity code must be 0 (none), 1 (odd) or 2 (even), got {other}"
            ))),
        }
    }
}

impl From<Parity> for tokio_serial::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Odd => tokio_serial::Parity::Odd,
            Parity::Even => tokio_serial::Parity::Even,
        }
    }
}

/// Line parameters applied when opening a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Symbols per second.
    pub baud_rate: u32,

    /// Bits per character, 5 to 8.
    pub data_bits: u8,

    /// 1 or 2.
    pub stop_bits: u8,

    /// See [`Parity`].
    pub parity: Parity,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            data_bits: 8,
            stop_bits: 1,
            parity: Parity::None,
        }
    }
}

impl LinkConfig {
    /// Create validated line parameters.
    pub fn new(baud_rate: u32, data_bits: u8, stop_bits: u8, parity: Parity) -> Result<Self, Error> {
        let config = Self {
            baud_rate,
            data_bits,
            stop_bits,
            parity,
        };
        config.validate()?;

        Ok(config)
    }

    /// Check that the parameters can be applied to a serial port.
    pub fn validate(&self) -> Result<(), Error> {
        if self.baud_rate == 0 {
            return Err(Error::BadConfig("Baud rate must be non-zero".into()));
        }

        self.serial_data_bits()?;
        self.serial_stop_bits()?;

        Ok(())
    }

    pub(crate) fn serial_data_bits(&self) -> Result<tokio_serial::DataBits, Error> {
        match self.data_bits {
            5 => Ok(tokio_serial::DataBits::Five),
            6 => Ok(tokio_serial::DataBits::Six),
            7 => Ok(tokio_serial::DataBits::Seven),
            8 => Ok(tokio_serial::DataBits::Eight),
            other => Err(Error::BadConfig(format!(
                "Data bits must be between 5 and 8, got {other}"
            ))),
        }
    }

    pub(crate) fn serial_stop_bits(&self) -> Result<tokio_serial::StopBits, Error> {
        match self.stop_bits {
            1 => Ok(tokio_serial::StopBits::One),
            2 => Ok(tokio_serial::StopBits::Two),
            other => Err(Error::BadConfig(format!(
                "Stop bits must be 1 or 2, got {other}"
            ))),
        }
    }
}

impl Display for LinkConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parity = match self.parity {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
        };

        write!(
            f,
            "{} {}{}{}",
            self.baud_rate, self.data_bits, parity, self.stop_bits
        )
    }
}
