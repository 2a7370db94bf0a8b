//! Discover and control Onkyo/Integra receivers over eISCP.
//!
//! Receivers answer a UDP broadcast probe and are then controlled over one
//! TCP connection each. Properties (power, volume, input, ...) are pushed by
//! the receiver whenever they change and cached per device.
//!
//! # Crate Structure
//!
//! - [`transport`]: TCP control stream and UDP discovery socket
//! - [`frame`]: eISCP packet framing, terminators and ISCP message helpers
//! - [`device`]: discovery, device registry, keep-alive list and messengers

/// Re-export transport types.
pub mod transport {
    pub use eiscp_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use eiscp_frame::*;
}

/// Re-export device types.
pub mod device {
    pub use eiscp_device::*;
}
