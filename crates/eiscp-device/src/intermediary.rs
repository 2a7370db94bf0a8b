use std::net::IpAddr;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use eiscp_frame::message::{query_command, MASTER_VOLUME};
use tracing::{debug, info, warn};

use crate::discovery::{self, DiscoveryConfig, DiscoveryHandle};
use crate::error::{DeviceError, Result};
use crate::info::{normalize_mac, DeviceInfo};
use crate::keepalive::{ConnectAttempt, KeepAliveStatus, KeepAliveTable};
use crate::messenger::{DeviceMessenger, ExitHook, MessengerConfig, MessengerState};
use crate::registry::{DeviceRegistry, RegistryUpdate};

const MESSENGER_POLL: Duration = Duration::from_millis(20);

/// Startup configuration of an [`Intermediary`].
#[derive(Debug, Clone, Default)]
pub struct IntermediaryConfig {
    pub discovery: DiscoveryConfig,
    pub messenger: MessengerConfig,
    /// Hardware address to keep alive from the start.
    pub keep_alive: Option<String>,
}

struct Inner {
    config: IntermediaryConfig,
    registry: DeviceRegistry,
    keep_alive: KeepAliveTable,
}

/// Entry point for callers: ties discovery, the device registry, the
/// keep-alive table and the messengers together.
///
/// Cloning is cheap and every clone shares the same state.
#[derive(Clone)]
pub struct Intermediary {
    inner: Arc<Inner>,
}

impl Intermediary {
    pub fn new(config: IntermediaryConfig) -> Self {
        let default_device = config.keep_alive.clone();
        let intermediary = Self {
            inner: Arc::new(Inner {
                config,
                registry: DeviceRegistry::new(),
                keep_alive: KeepAliveTable::new(),
            }),
        };
        if let Some(mac) = default_device {
            intermediary.keep_alive(&mac);
        }
        intermediary
    }

    pub fn config(&self) -> &IntermediaryConfig {
        &self.inner.config
    }

    /// Every device discovered so far.
    pub fn devices(&self) -> Vec<DeviceInfo> {
        self.inner.registry.snapshot()
    }

    pub fn device(&self, mac: &str) -> Option<Arc<DeviceInfo>> {
        self.inner.registry.get(mac)
    }

    /// Ask for a device to be kept connected.
    ///
    /// Connects right away when the device was already discovered, otherwise
    /// on its first discovery answer. Re-requesting a device whose terminator
    /// negotiation failed drops that messenger and connects again. Returns
    /// `false` if the device was already requested.
    pub fn keep_alive(&self, mac: &str) -> bool {
        let mac = normalize_mac(mac);
        let table = &self.inner.keep_alive;
        let added = table.insert(&mac);
        if added {
            info!(%mac, "keep-alive requested");
        } else if let Some(messenger) = table.messenger(&mac) {
            if messenger.state() == MessengerState::NegotiationFailed {
                info!(%mac, "re-requested after failed negotiation, reconnecting");
                messenger.kill();
            }
        }

        if let Some(device) = self.inner.registry.get(&mac) {
            if let Some(attempt) = table.observe(&device) {
                self.spawn_connect(attempt);
            }
        }
        added
    }

    /// Stop keeping a device connected and kill its messenger.
    pub fn forget(&self, mac: &str) -> Result<()> {
        let mac = normalize_mac(mac);
        let Some(messenger) = self.inner.keep_alive.remove(&mac) else {
            return Err(DeviceError::UnknownDevice(mac));
        };
        info!(%mac, "keep-alive dropped");
        if let Some(messenger) = messenger {
            messenger.kill();
        }
        Ok(())
    }

    /// Live messenger of a kept-alive device.
    pub fn messenger(&self, mac: &str) -> Option<Arc<DeviceMessenger>> {
        self.inner.keep_alive.messenger(mac)
    }

    pub fn keep_alive_status(&self) -> Vec<KeepAliveStatus> {
        self.inner.keep_alive.snapshot()
    }

    /// Wait until a kept-alive device has a live messenger.
    pub fn wait_for_messenger(&self, mac: &str, timeout: Duration) -> Result<Arc<DeviceMessenger>> {
        let mac = normalize_mac(mac);
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(messenger) = self.messenger(&mac) {
                return Ok(messenger);
            }
            if !self.inner.keep_alive.contains(&mac) {
                return Err(DeviceError::UnknownDevice(mac));
            }
            if Instant::now() >= deadline {
                return Err(DeviceError::Timeout(timeout));
            }
            thread::sleep(MESSENGER_POLL);
        }
    }

    /// Process the `model/port/region/mac` payload of a discovery answer
    /// received from `ip`.
    pub fn handle_discovery_response(&self, payload: &str, ip: IpAddr) -> Result<RegistryUpdate> {
        let info = DeviceInfo::from_discovery(payload, ip)?;
        let (device, update) = self.inner.registry.record(info);
        if let Some(attempt) = self.inner.keep_alive.observe(&device) {
            self.spawn_connect(attempt);
        }
        Ok(update)
    }

    /// Start the discovery loop, feeding its answers into this intermediary.
    pub fn spawn_discovery(&self) -> Result<DiscoveryHandle> {
        let this = self.clone();
        let handle = discovery::spawn(self.inner.config.discovery.clone(), move |payload, ip| {
            if let Err(err) = this.handle_discovery_response(payload, ip) {
                debug!(%ip, %err, "rejected discovery response");
            }
        })?;
        Ok(handle)
    }

    fn spawn_connect(&self, attempt: ConnectAttempt) {
        let inner = Arc::clone(&self.inner);
        let thread_attempt = attempt.clone();
        let spawned = thread::Builder::new()
            .name(format!("eiscp-connect-{}", attempt.mac()))
            .spawn(move || inner.connect(thread_attempt));
        if let Err(err) = spawned {
            warn!(mac = attempt.mac(), %err, "failed to start connection thread");
            self.inner.keep_alive.connect_failed(&attempt);
        }
    }
}

impl Inner {
    fn connect(self: Arc<Self>, attempt: ConnectAttempt) {
        let device = Arc::clone(&attempt.device);
        let mac = device.mac.clone();
        let weak: Weak<Inner> = Arc::downgrade(&self);
        let detach_mac = mac.clone();
        let hook: ExitHook = Box::new(move |messenger: &DeviceMessenger| {
            if let Some(inner) = weak.upgrade() {
                inner.keep_alive.detach(&detach_mac, messenger);
            }
        });

        let messenger =
            match DeviceMessenger::connect(Arc::clone(&device), self.config.messenger.clone(), Some(hook)) {
                Ok(messenger) => messenger,
                Err(err) => {
                    warn!(%device, %err, "connection failed");
                    self.keep_alive.connect_failed(&attempt);
                    return;
                }
            };

        if !self.keep_alive.attach(&attempt, Arc::clone(&messenger)) {
            debug!(%mac, "connection attempt superseded, dropping connection");
            messenger.kill();
            return;
        }

        if let Err(err) = messenger.send(&query_command(MASTER_VOLUME)) {
            warn!(%mac, %err, "initial query failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, TcpListener};

    use super::*;
    use crate::test_support::{wait_until, FakeReceiver};

    const MAC: &str = "0009B0AABBCC";

    fn localhost() -> IpAddr {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    }

    fn payload(port: u16) -> String {
        format!("TX-NR616/{port}/DX/{MAC}")
    }

    fn intermediary() -> Intermediary {
        Intermediary::new(IntermediaryConfig {
            messenger: MessengerConfig {
                read_timeout: Duration::from_millis(50),
                query_timeout: Duration::from_millis(200),
                reply_timeout: Duration::from_millis(200),
                ..MessengerConfig::default()
            },
            ..IntermediaryConfig::default()
        })
    }

    fn volume_receiver() -> FakeReceiver {
        FakeReceiver::start(|frame| match &*frame.text() {
            "!1PWRQSTN" => vec!["!1PWR01".to_string()],
            "!1MVLQSTN" => vec!["!1MVL2A".to_string()],
            _ => Vec::new(),
        })
    }

    #[test]
    fn duplicate_responses_keep_one_entry() {
        let intermediary = intermediary();

        let first = intermediary.handle_discovery_response(&payload(60128), localhost()).unwrap();
        let second = intermediary.handle_discovery_response(&payload(60128), localhost()).unwrap();

        assert_eq!(first, RegistryUpdate::Inserted);
        assert_eq!(second, RegistryUpdate::Unchanged);
        assert_eq!(intermediary.devices().len(), 1);
        assert!(intermediary.device("0009b0aabbcc").is_some());
    }

    #[test]
    fn malformed_response_is_rejected() {
        let intermediary = intermediary();
        let err = intermediary.handle_discovery_response("TX-NR616/60128", localhost()).unwrap_err();
        assert!(matches!(err, DeviceError::InvalidResponse(_)));
        assert!(intermediary.devices().is_empty());
    }

    #[test]
    fn keep_alive_of_discovered_device_connects_and_queries_volume() {
        let receiver = volume_receiver();
        let intermediary = intermediary();
        intermediary.handle_discovery_response(&payload(receiver.addr().port()), localhost()).unwrap();

        assert!(intermediary.keep_alive(MAC));
        assert!(!intermediary.keep_alive(MAC));

        let messenger = intermediary.wait_for_messenger(MAC, Duration::from_secs(3)).unwrap();
        assert!(wait_until(Duration::from_secs(3), || messenger.cached("MVL").is_some()));
        assert_eq!(messenger.state(), MessengerState::Active(eiscp_frame::Terminator::EofCrLf));
        intermediary.forget(MAC).unwrap();
    }

    #[test]
    fn discovery_of_requested_device_connects() {
        let receiver = volume_receiver();
        let intermediary = intermediary();
        intermediary.keep_alive(MAC);
        assert!(intermediary.messenger(MAC).is_none());

        intermediary.handle_discovery_response(&payload(receiver.addr().port()), localhost()).unwrap();

        let messenger = intermediary.wait_for_messenger(MAC, Duration::from_secs(3)).unwrap();
        for _ in 0..5 {
            intermediary.handle_discovery_response(&payload(receiver.addr().port()), localhost()).unwrap();
        }
        let current = intermediary.messenger(MAC).unwrap();
        assert!(Arc::ptr_eq(&messenger, &current));
        intermediary.forget(MAC).unwrap();
    }

    #[test]
    fn default_device_is_kept_alive() {
        let intermediary = Intermediary::new(IntermediaryConfig {
            keep_alive: Some("0009b0aabbcc".to_string()),
            ..IntermediaryConfig::default()
        });
        let statuses = intermediary.keep_alive_status();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].mac, MAC);
    }

    #[test]
    fn forget_kills_messenger_and_removes_entry() {
        let receiver = volume_receiver();
        let intermediary = intermediary();
        intermediary.keep_alive(MAC);
        intermediary.handle_discovery_response(&payload(receiver.addr().port()), localhost()).unwrap();
        let messenger = intermediary.wait_for_messenger(MAC, Duration::from_secs(3)).unwrap();

        intermediary.forget(MAC).unwrap();

        assert!(messenger.is_terminated());
        assert!(intermediary.keep_alive_status().is_empty());
        assert!(wait_until(Duration::from_secs(2), || receiver.disconnected()));
        assert!(matches!(intermediary.forget(MAC), Err(DeviceError::UnknownDevice(_))));
    }

    #[test]
    fn lost_connection_detaches_and_rediscovery_reconnects() {
        let receiver = volume_receiver();
        let intermediary = intermediary();
        intermediary.keep_alive(MAC);
        intermediary.handle_discovery_response(&payload(receiver.addr().port()), localhost()).unwrap();
        let first = intermediary.wait_for_messenger(MAC, Duration::from_secs(3)).unwrap();

        receiver.drop_connection();
        assert!(wait_until(Duration::from_secs(3), || intermediary.messenger(MAC).is_none()));
        assert!(first.is_terminated());
        let status = &intermediary.keep_alive_status()[0];
        assert!(!status.connected);

        let replacement = volume_receiver();
        let update = intermediary
            .handle_discovery_response(&payload(replacement.addr().port()), localhost())
            .unwrap();
        assert_eq!(update, RegistryUpdate::Superseded);

        let second = intermediary.wait_for_messenger(MAC, Duration::from_secs(3)).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.device().port, replacement.addr().port());
        intermediary.forget(MAC).unwrap();
    }

    #[test]
    fn re_request_after_failed_negotiation_reconnects() {
        let stuck = FakeReceiver::start(|frame| {
            if frame.text() == "!1PWRQSTN" {
                vec!["!1PWRN/A".to_string()]
            } else {
                Vec::new()
            }
        });
        let intermediary = intermediary();
        intermediary.keep_alive(MAC);
        intermediary.handle_discovery_response(&payload(stuck.addr().port()), localhost()).unwrap();
        let first = intermediary.wait_for_messenger(MAC, Duration::from_secs(3)).unwrap();
        assert!(wait_until(Duration::from_secs(5), || {
            first.state() == MessengerState::NegotiationFailed
        }));

        let healthy = volume_receiver();
        intermediary.handle_discovery_response(&payload(healthy.addr().port()), localhost()).unwrap();
        assert!(Arc::ptr_eq(&intermediary.messenger(MAC).unwrap(), &first));

        assert!(!intermediary.keep_alive(MAC));
        assert!(first.is_terminated());

        let second = intermediary.wait_for_messenger(MAC, Duration::from_secs(3)).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.device().port, healthy.addr().port());
        assert!(wait_until(Duration::from_secs(3), || second.cached("MVL").is_some()));
        intermediary.forget(MAC).unwrap();
    }

    #[test]
    fn failed_connect_is_retried_on_next_response() {
        let closed = TcpListener::bind("127.0.0.1:0").unwrap();
        let closed_port = closed.local_addr().unwrap().port();
        drop(closed);

        let intermediary = intermediary();
        intermediary.keep_alive(MAC);
        intermediary.handle_discovery_response(&payload(closed_port), localhost()).unwrap();

        let receiver = volume_receiver();
        let live = payload(receiver.addr().port());
        assert!(wait_until(Duration::from_secs(5), || {
            intermediary.handle_discovery_response(&live, localhost()).unwrap();
            intermediary.messenger(MAC).is_some()
        }));
        intermediary.forget(MAC).unwrap();
    }

    #[test]
    fn wait_for_messenger_reports_unknown_and_timeout() {
        let intermediary = intermediary();

        let err = intermediary.wait_for_messenger(MAC, Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, DeviceError::UnknownDevice(_)));

        intermediary.keep_alive(MAC);
        let start = Instant::now();
        let err = intermediary.wait_for_messenger(MAC, Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, DeviceError::Timeout(_)));
        assert!(start.elapsed() >= Duration::from_millis(100));
    }
}
