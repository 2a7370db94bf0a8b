use std::borrow::Cow;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::trace;

use crate::error::{FrameError, Result};
use crate::terminator::Terminator;

/// Frame header: magic (4) + header size (4) + data size (4) + version (1) + reserved (3).
pub const HEADER_SIZE: usize = 16;

/// Magic bytes: "ISCP".
pub const MAGIC: [u8; 4] = *b"ISCP";

/// Protocol version carried in byte 12.
pub const VERSION: u8 = 0x01;

/// Reserved bytes 13..16.
pub const RESERVED: [u8; 3] = [0x00, 0x00, 0x00];

/// Default maximum data region accepted from a stream: 64 KiB.
///
/// Receiver messages are short text commands; anything larger is a desynced stream.
pub const DEFAULT_MAX_DATA_SIZE: usize = 64 * 1024;

/// A decoded eISCP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The body without its terminator.
    pub payload: Bytes,
    /// The terminator that closed the data region, if any catalog entry matched.
    pub terminator: Option<Terminator>,
}

impl Frame {
    /// The body as text. Bytes are not validated; invalid UTF-8 is replaced.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    /// The total wire size of this frame (header + body + terminator).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.data_size()
    }

    /// The value carried in the header's data-size field.
    pub fn data_size(&self) -> usize {
        self.payload.len() + self.terminator.map_or(0, Terminator::len)
    }
}

/// Encode a command into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────┬─────────────┬────────────┬─────────┬──────────┬──────────┬────────────┐
/// │ "ISCP"   │ Header size │ Data size  │ Version │ Reserved │ Body     │ Terminator │
/// │ (4B)     │ (4B BE, 16) │ (4B BE)    │ (1B, 1) │ (3B, 0)  │ (ASCII)  │ (1-3B)     │
/// └──────────┴─────────────┴────────────┴─────────┴──────────┴──────────┴────────────┘
/// ```
pub fn encode_frame(payload: &[u8], terminator: Terminator, dst: &mut BytesMut) -> Result<()> {
    let data_size = payload.len() + terminator.len();
    if data_size > u32::MAX as usize {
        return Err(FrameError::PayloadTooLarge {
            size: data_size,
            max: u32::MAX as usize,
        });
    }
    dst.reserve(HEADER_SIZE + data_size);
    dst.put_slice(&MAGIC);
    dst.put_u32(HEADER_SIZE as u32);
    dst.put_u32(data_size as u32);
    dst.put_u8(VERSION);
    dst.put_slice(&RESERVED);
    dst.put_slice(payload);
    dst.put_slice(terminator.as_bytes());
    Ok(())
}

/// Encode a command string into a standalone packet.
pub fn encode_packet(command: &str, terminator: Terminator) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    encode_frame(command.as_bytes(), terminator, &mut buf)?;
    Ok(buf.freeze())
}

/// Validate a header and return the declared data size.
fn parse_header(src: &[u8]) -> Result<usize> {
    if src.len() < HEADER_SIZE {
        return Err(FrameError::Truncated {
            expected: HEADER_SIZE,
            actual: src.len(),
        });
    }
    if src[0..4] != MAGIC {
        return Err(FrameError::InvalidMagic);
    }
    let header_size = u32::from_be_bytes([src[4], src[5], src[6], src[7]]);
    if header_size as usize != HEADER_SIZE {
        return Err(FrameError::InvalidHeaderSize(header_size));
    }
    if src[12] != VERSION {
        return Err(FrameError::UnsupportedVersion(src[12]));
    }
    if src[13..16] != RESERVED {
        return Err(FrameError::ReservedNotZero);
    }
    let data_size = u32::from_be_bytes([src[8], src[9], src[10], src[11]]);
    Ok(data_size as usize)
}

/// Split a data region into body and terminator.
///
/// A region that ends in none of the catalog sequences is returned whole.
fn split_data(data: Bytes) -> Frame {
    match Terminator::detect(&data) {
        Some(terminator) => {
            let mut payload = data;
            payload.truncate(payload.len() - terminator.len());
            Frame {
                payload,
                terminator: Some(terminator),
            }
        }
        None => {
            trace!(len = data.len(), "frame without recognised terminator");
            Frame {
                payload: data,
                terminator: None,
            }
        }
    }
}

/// Decode a complete packet, such as a UDP datagram.
///
/// Bytes past the declared data region are ignored.
pub fn decode_packet(src: &[u8]) -> Result<Frame> {
    let data_size = parse_header(src)?;
    let total = HEADER_SIZE + data_size;
    if src.len() < total {
        return Err(FrameError::Truncated {
            expected: total,
            actual: src.len(),
        });
    }
    Ok(split_data(Bytes::copy_from_slice(&src[HEADER_SIZE..total])))
}

/// Decode a frame from a stream buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer.
pub fn decode_frame(src: &mut BytesMut, max_data_size: usize) -> Result<Option<Frame>> {
    if src.len() < HEADER_SIZE {
        return Ok(None); // Need more data
    }

    let data_size = parse_header(&src[..])?;
    if data_size > max_data_size {
        return Err(FrameError::PayloadTooLarge {
            size: data_size,
            max: max_data_size,
        });
    }

    let total = HEADER_SIZE + data_size;
    if src.len() < total {
        return Ok(None); // Need more data
    }

    src.advance(HEADER_SIZE);
    let data = src.split_to(data_size).freeze();

    Ok(Some(split_data(data)))
}

/// Configuration for the frame reader and writer.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum data region in bytes. Default: 64 KiB.
    pub max_data_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_data_size: DEFAULT_MAX_DATA_SIZE,
            read_timeout: None,
            write_timeout: None,
        }
    }
}
