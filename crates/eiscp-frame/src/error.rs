/// Errors that can occur during eISCP frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The packet does not start with `ISCP`.
    #[error("invalid frame magic (expected \"ISCP\")")]
    InvalidMagic,

    /// The header-size field is not 16.
    #[error("invalid header size {0} (expected 16)")]
    InvalidHeaderSize(u32),

    /// The version byte is not 1.
    #[error("unsupported eISCP version {0}")]
    UnsupportedVersion(u8),

    /// One of the three reserved header bytes is set.
    #[error("reserved header bytes are not zero")]
    ReservedNotZero,

    /// The buffer ends before the declared data region does.
    #[error("truncated frame ({actual} of {expected} bytes)")]
    Truncated { expected: usize, actual: usize },

    /// The data region exceeds the configured or representable maximum.
    #[error("data too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

impl FrameError {
    /// Whether the error describes a bad header rather than an I/O failure.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            FrameError::InvalidMagic
                | FrameError::InvalidHeaderSize(_)
                | FrameError::UnsupportedVersion(_)
                | FrameError::ReservedNotZero
                | FrameError::Truncated { .. }
                | FrameError::PayloadTooLarge { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
