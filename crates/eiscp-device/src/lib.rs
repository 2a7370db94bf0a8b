//! Receiver discovery and control for eISCP.
//!
//! The [`Intermediary`] is the entry point. It owns:
//! - a [`DeviceRegistry`] of every receiver that answered a discovery probe
//! - a [`KeepAliveTable`] of receivers the caller wants connected
//! - one [`DeviceMessenger`] per connected receiver, caching its properties
//!
//! Discovery runs on its own thread (see [`discovery::spawn`]). Each
//! messenger runs a receive loop thread. All shared state sits behind
//! `std::sync::Mutex`, and messengers wake waiting queries with a `Condvar`.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use eiscp_device::{Intermediary, IntermediaryConfig};
//!
//! let intermediary = Intermediary::new(IntermediaryConfig::default());
//! let discovery = intermediary.spawn_discovery()?;
//! intermediary.keep_alive("0009B0AABBCC");
//!
//! let messenger = intermediary.wait_for_messenger("0009B0AABBCC", Duration::from_secs(30))?;
//! println!("volume: {:?}", messenger.property("MVL")?);
//! discovery.stop();
//! # Ok::<(), eiscp_device::DeviceError>(())
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod discovery;
pub mod error;
pub mod info;
pub mod intermediary;
pub mod keepalive;
pub mod messenger;
pub mod registry;

#[cfg(test)]
mod test_support;

pub use discovery::{DiscoveryConfig, DiscoveryHandle};
pub use error::{DeviceError, Result};
pub use info::{normalize_mac, DeviceInfo};
pub use intermediary::{Intermediary, IntermediaryConfig};
pub use keepalive::{ConnectAttempt, KeepAliveStatus, KeepAliveTable};
pub use messenger::{DeviceMessenger, ExitHook, MessengerConfig, MessengerState, MessengerStats};
pub use registry::{DeviceRegistry, RegistryUpdate};

/// Lock a mutex, recovering the data if a panicking thread poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
