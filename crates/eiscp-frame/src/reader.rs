use std::io::{ErrorKind, Read};

use bytes::{Buf, BytesMut};
use eiscp_transport::DeviceStream;
use tracing::trace;

use crate::codec::{decode_frame, Frame, FrameConfig, MAGIC};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 4 * 1024;
const READ_CHUNK_SIZE: usize = 1024;

/// Reads complete eISCP frames from any `Read` stream.
///
/// Handles partial reads internally. Bytes already buffered survive read
/// timeouts, so a caller may poll with a short timeout without losing data.
/// A malformed header is reported once, and the bytes before the next
/// `ISCP` magic are discarded so frames behind it still decode.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Read the next complete frame (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached.
    pub fn read_frame(&mut self) -> Result<Frame> {
        loop {
            match decode_frame(&mut self.buf, self.config.max_data_size) {
                Ok(Some(frame)) => return Ok(frame),
                Ok(None) => {}
                Err(err) => {
                    let skipped = resync(&mut self.buf);
                    trace!(skipped, buffered = self.buf.len(), %err, "discarding malformed input");
                    return Err(err);
                }
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                return Err(FrameError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Number of bytes received but not yet returned as a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

/// Drop everything before the next header magic past the start of `buf`.
/// Without one, only a trailing partial magic is kept for the next read.
fn resync(buf: &mut BytesMut) -> usize {
    let next_magic = buf
        .windows(MAGIC.len())
        .skip(1)
        .position(|window| window == MAGIC)
        .map(|pos| pos + 1);
    let skip = next_magic.unwrap_or_else(|| {
        (1..MAGIC.len())
            .rev()
            .find(|&len| len < buf.len() && buf.ends_with(&MAGIC[..len]))
            .map_or(buf.len(), |len| buf.len() - len)
    });
    buf.advance(skip);
    skip
}

impl FrameReader<DeviceStream> {
    /// Create a frame reader for `DeviceStream` and apply read timeout from config.
    pub fn with_config_stream(inner: DeviceStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

pub(crate) fn transport_to_frame_error(err: eiscp_transport::TransportError) -> FrameError {
    match err {
        eiscp_transport::TransportError::Io(io) => FrameError::Io(io),
        eiscp_transport::TransportError::Bind { source, .. }
        | eiscp_transport::TransportError::Connect { source, .. } => FrameError::Io(source),
    }
}
