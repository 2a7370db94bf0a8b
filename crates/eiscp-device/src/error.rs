use std::time::Duration;

/// Errors that can occur in device operations.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] eiscp_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] eiscp_frame::FrameError),

    /// A discovery answer could not be parsed.
    #[error("invalid discovery response: {0}")]
    InvalidResponse(String),

    /// No terminator produced a defined power status.
    #[error("terminator negotiation failed for {0}")]
    NegotiationFailed(String),

    /// The messenger was killed or lost its connection.
    #[error("messenger for {0} terminated")]
    Terminated(String),

    /// The hardware address is not on the keep-alive list.
    #[error("device {0} is not on the keep-alive list")]
    UnknownDevice(String),

    /// Timed out waiting for a device to become available.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

pub type Result<T> = std::result::Result<T, DeviceError>;
