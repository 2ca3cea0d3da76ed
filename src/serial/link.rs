//! An open link to a device.
//!
//! The link is split in two:
//! the reading half is owned by the background reader,
//! the writing half stays with the session and is used for bounded writes.

use std::time::Duration;

use bytes::Bytes;
use futures::SinkExt;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio_util::codec::{BytesCodec, FramedRead, FramedWrite};
use tracing::{debug, trace};

use crate::error::Error;

/// Anything a backend can hand out as a byte stream to a device.
pub trait LinkIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> LinkIo for T {}

/// An opened link, as produced by a [`crate::backend::Backend`].
pub type LinkStream = Box<dyn LinkIo>;

/// Raw chunks from the device, exactly as they arrived.
pub(crate) type LinkReader = FramedRead<ReadHalf<LinkStream>, BytesCodec>;

/// Split an opened link into its reader and writer.
pub(crate) fn split(path: &str, stream: LinkStream, write_timeout: Duration) -> (LinkReader, LinkWriter) {
    let (read_half, write_half) = tokio::io::split(stream);

    let reader = FramedRead::new(read_half, BytesCodec::new());
    let writer = LinkWriter {
        path: path.into(),
        sink: Some(FramedWrite::new(write_half, BytesCodec::new())),
        timeout: write_timeout,
    };

    (reader, writer)
}

/// The writing half of a link.
pub(crate) struct LinkWriter {
    path: String,
    sink: Option<FramedWrite<WriteHalf<LinkStream>, BytesCodec>>,
    timeout: Duration,
}

impl LinkWriter {
    /// Put the bytes on the wire, waiting at most the configured timeout.
    ///
    /// A timed out write may have been partially sent.
    /// Whatever was not sent by then is discarded,
    /// so it never ends up in front of a later write.
    pub(crate) async fn write(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let after_ms = self.timeout.as_millis() as u64;

        let sink = self
            .sink
            .as_mut()
            .ok_or_else(|| Error::Io(format!("{}: link is closed", self.path)))?;

        let sent = tokio::time::timeout(self.timeout, sink.send(Bytes::copy_from_slice(bytes))).await;

        match sent {
            Ok(Ok(())) => {
                trace!("Wrote {} byte(s) to {}", bytes.len(), self.path);
                return Ok(());
            }
            Ok(Err(e)) if e.kind() != std::io::ErrorKind::TimedOut => {
                return Err(Error::Io(format!("{}: {e}", self.path)));
            }
            Ok(Err(_)) | Err(_) => {}
        }

        let unsent = sink.write_buffer().len();
        sink.write_buffer_mut().clear();
        debug!("Write to {} timed out, discarded {unsent} unsent byte(s)", self.path);

        Err(Error::Timeout { after_ms })
    }

    /// Release the writing half.
    /// Calling this more than once is fine.
    pub(crate) fn close(&mut self) {
        if self.sink.take().is_some() {
            debug!("Closed link to {}", self.path);
        }
    }

    #[cfg(test)]
    pub(crate) fn is_closed(&self) -> bool {
        self.sink.is_none()
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use pretty_assertions::assert_eq;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[tokio::test]
    async fn write_reaches_the_other_end() {
        let (ours, mut theirs) = tokio::io::duplex(64);
        let (_reader, mut writer) = split("mock", Box::new(ours), Duration::from_millis(100));

        writer.write(b"hello").await.unwrap();

        let mut received = [0u8; 5];
        theirs.read_exact(&mut received).await.unwrap();
        assert_eq!(&received, b"hello");
    }

    #[tokio::test]
    async fn reader_yields_raw_chunks() {
        let (ours, mut theirs) = tokio::io::duplex(64);
        let (mut reader, _writer) = split("mock", Box::new(ours), Duration::from_millis(100));

        theirs.write_all(b"W: 1.0\nX:").await.unwrap();

        let chunk = reader.next().await.unwrap().unwrap();
        assert_eq!(&chunk[..], b"W: 1.0\nX:");
    }

    #[tokio::test]
    async fn stuck_write_times_out() {
        // Tiny pipe, and nobody reads the other end.
        let (ours, _theirs) = tokio::io::duplex(4);
        let (_reader, mut writer) = split("mock", Box::new(ours), Duration::from_millis(50));

        let result = writer.write(&[0u8; 64]).await;
        assert_eq!(result, Err(Error::Timeout { after_ms: 50 }));
    }

    #[tokio::test]
    async fn timed_out_leftovers_are_not_sent_later() {
        let (ours, mut theirs) = tokio::io::duplex(8);
        let (_reader, mut writer) = split("mock", Box::new(ours), Duration::from_millis(50));

        let result = writer.write(&[0xAA; 64]).await;
        assert_eq!(result, Err(Error::Timeout { after_ms: 50 }));

        // Only what fit in the pipe made it out.
        let mut stuck = [0u8; 8];
        theirs.read_exact(&mut stuck).await.unwrap();
        assert_eq!(stuck, [0xAA; 8]);

        writer.write(b"hi").await.unwrap();

        let mut received = [0u8; 8];
        let n = theirs.read(&mut received).await.unwrap();
        assert_eq!(&received[..n], b"hi");
    }

    #[tokio::test]
    async fn write_after_peer_gone_is_io() {
        let (ours, theirs) = tokio::io::duplex(64);
        let (_reader, mut writer) = split("mock", Box::new(ours), Duration::from_millis(50));

        drop(theirs);

        assert!(matches!(writer.write(b"hi").await, Err(Error::Io(_))));
    }

    #[tokio::test]
    async fn close_twice() {
        let (ours, _theirs) = tokio::io::duplex(4);
        let (_reader, mut writer) = split("mock", Box::new(ours), Duration::from_millis(50));

        writer.close();
        writer.close();
        assert!(writer.is_closed());
        assert!(matches!(writer.write(b"hi").await, Err(Error::Io(_))));
    }
}
