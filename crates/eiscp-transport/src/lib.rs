//! Socket layer for talking to eISCP receivers.
//!
//! Two transports are involved:
//! - TCP, one [`DeviceStream`] per controlled receiver
//! - UDP broadcast, one [`DiscoverySocket`] for finding receivers
//!
//! This is the lowest layer. Framing lives in `eiscp-frame`.

pub mod error;
pub mod tcp;
pub mod udp;

pub use error::{is_timeout, Result, TransportError};
pub use tcp::DeviceStream;
pub use udp::DiscoverySocket;

/// Default eISCP port for both discovery and control.
pub const DEFAULT_PORT: u16 = 60128;
