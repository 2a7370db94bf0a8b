//! eISCP packet framing.
//!
//! Every ISCP message travels inside a frame with:
//! - A 16-byte header: `ISCP` magic, header size, big-endian data size,
//!   version byte, three reserved bytes
//! - The ASCII message body
//! - One of seven terminator sequences, never declared in the header
//!
//! Decoding tries the terminators longest first so that a body ending in a
//! byte that is itself a terminator is never truncated.

#[cfg(feature = "async")]
pub mod async_codec;
pub mod codec;
pub mod error;
pub mod message;
pub mod reader;
pub mod terminator;
pub mod writer;

#[cfg(feature = "async")]
pub use async_codec::EiscpCodec;
pub use codec::{
    decode_frame, decode_packet, encode_frame, encode_packet, Frame, FrameConfig,
    DEFAULT_MAX_DATA_SIZE, HEADER_SIZE,
};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use terminator::{Terminator, CATALOG};
pub use writer::FrameWriter;
