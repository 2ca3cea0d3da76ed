use std::fmt::Display;

use bytes::{Buf, BytesMut};
use serde::{Deserialize, Serialize};
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::error::Error;

/// An orientation quaternion reported by the sensor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Orientation {
    /// Scalar part.
    pub w: f32,
    /// First vector component.
    pub x: f32,
    /// Second vector component.
    pub y: f32,
    /// Third vector component.
    pub z: f32,
}

impl Display for Orientation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "W: {:.2} X: {:.2} Y: {:.2} Z: {:.2}",
            self.w, self.x, self.y, self.z
        )
    }
}

/// Parse a line such as `W: 0.12 X: 0.23 Y: -0.96 Z: 0.06`.
///
/// Tags may come in any order.
/// A tag without a parsable value leaves that component at zero.
/// Lines without any tag are not samples.
pub fn parse_orientation(line: &str) -> Option<Orientation> {
    let tokens = line.split_whitespace().collect::<Vec<_>>();

    let mut orientation = Orientation::default();
    let mut tagged = false;

    for (index, token) in tokens.iter().enumerate() {
        let component = match *token {
            "W:" => &mut orientation.w,
            "X:" => &mut orientation.x,
            "Y:" => &mut orientation.y,
            "Z:" => &mut orientation.z,
            _ => continue,
        };
        tagged = true;

        if let Some(value) = tokens.get(index + 1).and_then(|v| v.parse::<f32>().ok()) {
            *component = value;
        }
    }

    tagged.then_some(orientation)
}

/// Splits drained bytes into lines and parses each as an [`Orientation`].
///
/// Lines which are not samples are skipped.
/// Bytes after the last newline are kept until more data arrives.
#[derive(Debug, Clone, Default)]
pub struct ImuCodec {
    /// How far we have looked for a newline into the buffer
    cursor: usize,
}

impl ImuCodec {
    /// Create a new codec.
    pub fn new() -> Self {
        Self::default()
    }

    fn next_line(&mut self, src: &mut BytesMut) -> Option<Vec<u8>> {
        let read_to = src.len();
        let look_at = &src[self.cursor..read_to];

        match look_at.iter().position(|&byte| byte == b'\n') {
            Some(position) => {
                // We might have started late in the buffer.
                let actual_position = self.cursor + position;
                self.cursor = 0;

                let line = src.split_to(actual_position);

                // Discard the newline.
                src.advance(1);

                Some(line.to_vec())
            }
            None => {
                // No need to look at these bytes again next time.
                self.cursor = read_to;
                None
            }
        }
    }
}

impl Decoder for ImuCodec {
    type Item = Orientation;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        while let Some(line) = self.next_line(src) {
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches('\r');

            match parse_orientation(line) {
                Some(orientation) => return Ok(Some(orientation)),
                None => trace!(%line, "Skipping line without orientation"),
            }
        }

        Ok(None)
    }
}
