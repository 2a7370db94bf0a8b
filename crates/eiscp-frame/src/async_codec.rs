//! `tokio_util` codec over the eISCP framing, for callers driving receivers
//! from an async runtime.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{decode_frame, encode_frame, Frame, DEFAULT_MAX_DATA_SIZE};
use crate::error::FrameError;
use crate::terminator::Terminator;

/// Frames outbound commands with a fixed terminator and decodes inbound
/// frames with any catalog terminator.
#[derive(Debug, Clone)]
pub struct EiscpCodec {
    terminator: Terminator,
    max_data_size: usize,
}

impl EiscpCodec {
    pub fn new(terminator: Terminator) -> Self {
        Self {
            terminator,
            max_data_size: DEFAULT_MAX_DATA_SIZE,
        }
    }

    pub fn with_max_data_size(mut self, max_data_size: usize) -> Self {
        self.max_data_size = max_data_size;
        self
    }

    /// Terminator used for outbound frames.
    pub fn terminator(&self) -> Terminator {
        self.terminator
    }

    /// Switch the outbound terminator, e.g. once negotiation settles on one.
    pub fn set_terminator(&mut self, terminator: Terminator) {
        self.terminator = terminator;
    }
}

impl Decoder for EiscpCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        decode_frame(src, self.max_data_size)
    }
}

impl<'a> Encoder<&'a str> for EiscpCodec {
    type Error = FrameError;

    fn encode(&mut self, item: &'a str, dst: &mut BytesMut) -> Result<(), FrameError> {
        encode_frame(item.as_bytes(), self.terminator, dst)
    }
}
