use std::net::SocketAddr;

/// Errors that can occur in eISCP transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind to the specified address.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// Failed to connect to the specified address.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// An I/O error occurred on the socket.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Whether the error is an expired read/write timeout.
    pub fn is_timeout(&self) -> bool {
        match self {
            TransportError::Io(err) => is_timeout(err),
            _ => false,
        }
    }
}

/// Whether an I/O error is an expired socket timeout.
///
/// Unix reports `WouldBlock` for `SO_RCVTIMEO` expiry, Windows `TimedOut`.
pub fn is_timeout(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

pub type Result<T> = std::result::Result<T, TransportError>;
