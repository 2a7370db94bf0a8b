use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use eiscp_frame::message::{is_defined, query_command, set_command, split_property, POWER};
use eiscp_frame::{Frame, FrameConfig, FrameError, FrameReader, FrameWriter, Terminator};
use eiscp_transport::{is_timeout, DeviceStream};
use tracing::{debug, info, trace, warn};

use crate::error::{DeviceError, Result};
use crate::info::DeviceInfo;
use crate::lock;

/// Called once when a messenger terminates, whatever the cause.
pub type ExitHook = Box<dyn FnOnce(&DeviceMessenger) + Send>;

/// Timing configuration for a messenger.
#[derive(Debug, Clone)]
pub struct MessengerConfig {
    /// Read timeout of the receive loop; bounds how long a kill takes to be observed.
    pub read_timeout: Duration,
    /// How long a property query waits for the receiver to answer.
    pub query_timeout: Duration,
    /// How long each terminator candidate waits for a power status during negotiation.
    pub reply_timeout: Duration,
    /// Write timeout on the control connection.
    pub write_timeout: Duration,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
}

impl Default for MessengerConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(1),
            query_timeout: Duration::from_secs(1),
            reply_timeout: Duration::from_secs(1),
            write_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Lifecycle of a messenger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessengerState {
    /// No terminator chosen yet; the first send negotiates one.
    Negotiating,
    /// Outbound frames use this terminator.
    Active(Terminator),
    /// No terminator produced a defined power status. Sends fail until the
    /// device is re-requested.
    NegotiationFailed,
    /// Killed or disconnected.
    Terminated,
}

impl fmt::Display for MessengerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessengerState::Negotiating => f.write_str("negotiating"),
            MessengerState::Active(terminator) => write!(f, "active ({terminator})"),
            MessengerState::NegotiationFailed => f.write_str("negotiation-failed"),
            MessengerState::Terminated => f.write_str("terminated"),
        }
    }
}

/// Point-in-time counters of a messenger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessengerStats {
    pub state: MessengerState,
    /// Frames decoded by the receive loop.
    pub received: u64,
    /// Frames written.
    pub sent: u64,
    /// Distinct property codes cached.
    pub properties: usize,
}

struct CachedValue {
    value: String,
    /// Value of the received counter when this was written.
    seq: u64,
}

struct Cache {
    properties: HashMap<String, CachedValue>,
    received: u64,
    state: MessengerState,
}

/// Owns the control connection to one receiver.
///
/// A background receive loop is the only writer of the property cache;
/// queries read it and wait on a condition variable for updates. Teardown
/// (kill, concurrent kills, or connection loss) closes the connection and
/// runs the exit hook exactly once.
pub struct DeviceMessenger {
    device: Arc<DeviceInfo>,
    config: MessengerConfig,
    writer: Mutex<FrameWriter<DeviceStream>>,
    closer: DeviceStream,
    cache: Mutex<Cache>,
    updated: Condvar,
    negotiation: Mutex<()>,
    sent: AtomicU64,
    killed: AtomicBool,
    torn_down: AtomicBool,
    on_exit: Mutex<Option<ExitHook>>,
}

impl DeviceMessenger {
    /// Connect to the device's control port and start the receive loop.
    pub fn connect(
        device: Arc<DeviceInfo>,
        config: MessengerConfig,
        on_exit: Option<ExitHook>,
    ) -> Result<Arc<Self>> {
        let stream = DeviceStream::connect(device.control_addr(), config.connect_timeout)?;
        Self::spawn(device, stream, config, on_exit)
    }

    /// Start a messenger over an established connection.
    ///
    /// The receive loop runs before any negotiation so no reply is missed.
    pub fn spawn(
        device: Arc<DeviceInfo>,
        stream: DeviceStream,
        config: MessengerConfig,
        on_exit: Option<ExitHook>,
    ) -> Result<Arc<Self>> {
        let frame_config = FrameConfig {
            read_timeout: Some(config.read_timeout),
            write_timeout: Some(config.write_timeout),
            ..FrameConfig::default()
        };
        let reader = FrameReader::with_config_stream(stream.try_clone()?, frame_config.clone())?;
        let closer = stream.try_clone()?;
        let writer = FrameWriter::with_config_stream(stream, frame_config)?;

        let messenger = Arc::new(Self {
            device,
            config,
            writer: Mutex::new(writer),
            closer,
            cache: Mutex::new(Cache {
                properties: HashMap::new(),
                received: 0,
                state: MessengerState::Negotiating,
            }),
            updated: Condvar::new(),
            negotiation: Mutex::new(()),
            sent: AtomicU64::new(0),
            killed: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
            on_exit: Mutex::new(on_exit),
        });

        let runner = Arc::clone(&messenger);
        let spawned = thread::Builder::new()
            .name(format!("eiscp-recv-{}", messenger.device.mac))
            .spawn(move || runner.receive_loop(reader));
        if let Err(err) = spawned {
            messenger.teardown();
            return Err(eiscp_transport::TransportError::Io(err).into());
        }

        info!(device = %messenger.device, "messenger started");
        Ok(messenger)
    }

    /// The device this messenger talks to.
    pub fn device(&self) -> &Arc<DeviceInfo> {
        &self.device
    }

    pub fn state(&self) -> MessengerState {
        self.lock_cache().state
    }

    pub fn is_terminated(&self) -> bool {
        self.state() == MessengerState::Terminated
    }

    pub fn stats(&self) -> MessengerStats {
        let cache = self.lock_cache();
        MessengerStats {
            state: cache.state,
            received: cache.received,
            sent: self.sent.load(Ordering::Relaxed),
            properties: cache.properties.len(),
        }
    }

    /// Copy of every cached property.
    pub fn properties(&self) -> BTreeMap<String, String> {
        self.lock_cache()
            .properties
            .iter()
            .map(|(code, cached)| (code.clone(), cached.value.clone()))
            .collect()
    }

    /// Cached value of a property, without any I/O.
    pub fn cached(&self, code: &str) -> Option<String> {
        self.lock_cache()
            .properties
            .get(code)
            .map(|cached| cached.value.clone())
    }

    /// Send a raw command such as `!1PWR01`, negotiating the terminator first
    /// if none is chosen yet.
    pub fn send(&self, command: &str) -> Result<()> {
        let terminator = self.terminator()?;
        self.write(command, terminator)
    }

    /// Set a property, e.g. `set_property("MVL", "28")`.
    pub fn set_property(&self, code: &str, value: &str) -> Result<()> {
        self.send(&set_command(code, value))
    }

    /// Value of a property.
    ///
    /// A cached value is returned immediately. Otherwise the property is
    /// queried and `Ok(None)` is returned if no answer arrives within the
    /// query timeout.
    pub fn property(&self, code: &str) -> Result<Option<String>> {
        if let Some(value) = self.cached(code) {
            return Ok(Some(value));
        }

        self.send(&query_command(code))?;

        let cache = self.lock_cache();
        let (cache, _) = self
            .updated
            .wait_timeout_while(cache, self.config.query_timeout, |cache| {
                cache.state != MessengerState::Terminated && !cache.properties.contains_key(code)
            })
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(cached) = cache.properties.get(code) {
            return Ok(Some(cached.value.clone()));
        }
        if cache.state == MessengerState::Terminated {
            return Err(DeviceError::Terminated(self.device.mac.clone()));
        }
        debug!(mac = %self.device.mac, code, timeout = ?self.config.query_timeout, "property unavailable");
        Ok(None)
    }

    /// Stop the messenger. Returns `true` for the call that performed the teardown.
    pub fn kill(&self) -> bool {
        if !self.torn_down.load(Ordering::Acquire) {
            info!(mac = %self.device.mac, "killing connection");
        }
        self.teardown()
    }

    fn lock_cache(&self) -> MutexGuard<'_, Cache> {
        lock(&self.cache)
    }

    fn terminator(&self) -> Result<Terminator> {
        let _negotiating = lock(&self.negotiation);
        match self.state() {
            MessengerState::Active(terminator) => Ok(terminator),
            MessengerState::NegotiationFailed => {
                Err(DeviceError::NegotiationFailed(self.device.mac.clone()))
            }
            MessengerState::Terminated => Err(DeviceError::Terminated(self.device.mac.clone())),
            MessengerState::Negotiating => self.negotiate(),
        }
    }

    /// Probe each terminator with a power query until one yields a defined
    /// power status. Caller holds the negotiation lock.
    fn negotiate(&self) -> Result<Terminator> {
        let probe = query_command(POWER);
        for &candidate in Terminator::all() {
            let snapshot = self.lock_cache().received;
            trace!(mac = %self.device.mac, %candidate, "probing terminator");
            self.write(&probe, candidate)?;

            let deadline = Instant::now() + self.config.reply_timeout;
            let mut cache = self.lock_cache();
            loop {
                if cache.state == MessengerState::Terminated {
                    return Err(DeviceError::Terminated(self.device.mac.clone()));
                }
                let answered = cache
                    .properties
                    .get(POWER)
                    .filter(|cached| cached.seq > snapshot);
                if let Some(cached) = answered {
                    if is_defined(&cached.value) {
                        cache.state = MessengerState::Active(candidate);
                        info!(mac = %self.device.mac, terminator = %candidate, "terminator negotiated");
                        return Ok(candidate);
                    }
                    break;
                }
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                cache = self
                    .updated
                    .wait_timeout(cache, remaining)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
            }
        }

        let mut cache = self.lock_cache();
        if cache.state == MessengerState::Terminated {
            return Err(DeviceError::Terminated(self.device.mac.clone()));
        }
        cache.state = MessengerState::NegotiationFailed;
        warn!(mac = %self.device.mac, "no terminator produced a power status");
        Err(DeviceError::NegotiationFailed(self.device.mac.clone()))
    }

    fn write(&self, command: &str, terminator: Terminator) -> Result<()> {
        if self.killed.load(Ordering::Acquire) {
            return Err(DeviceError::Terminated(self.device.mac.clone()));
        }
        let written = lock(&self.writer).send(command, terminator);
        if let Err(err) = written {
            warn!(mac = %self.device.mac, command, %err, "write failed");
            self.teardown();
            return Err(err.into());
        }
        self.sent.fetch_add(1, Ordering::Relaxed);
        debug!(mac = %self.device.mac, command, %terminator, "sent");
        Ok(())
    }

    fn receive_loop(&self, mut reader: FrameReader<DeviceStream>) {
        while !self.killed.load(Ordering::Acquire) {
            match reader.read_frame() {
                Ok(frame) => self.record(&frame),
                Err(FrameError::Io(err)) if is_timeout(&err) => {}
                Err(err) if err.is_malformed() => {
                    trace!(mac = %self.device.mac, %err, "discarded malformed frame");
                }
                Err(err) => {
                    if !self.killed.load(Ordering::Acquire) {
                        warn!(mac = %self.device.mac, %err, "connection lost");
                    }
                    break;
                }
            }
        }
        debug!(mac = %self.device.mac, "receive loop exited");
        self.teardown();
    }

    fn record(&self, frame: &Frame) {
        let text = frame.text();
        let mut cache = self.lock_cache();
        cache.received += 1;
        let seq = cache.received;
        match split_property(&text) {
            Some((code, value)) => {
                debug!(mac = %self.device.mac, code, value, "received");
                cache.properties.insert(
                    code.to_string(),
                    CachedValue {
                        value: value.to_string(),
                        seq,
                    },
                );
            }
            None => trace!(mac = %self.device.mac, text = %text, "frame without property"),
        }
        drop(cache);
        self.updated.notify_all();
    }

    fn teardown(&self) -> bool {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.killed.store(true, Ordering::Release);
        if let Err(err) = self.closer.shutdown() {
            debug!(mac = %self.device.mac, %err, "shutdown failed");
        }
        self.lock_cache().state = MessengerState::Terminated;
        self.updated.notify_all();

        let hook = lock(&self.on_exit).take();
        if let Some(hook) = hook {
            hook(self);
        }
        info!(mac = %self.device.mac, "messenger terminated");
        true
    }
}

impl fmt::Debug for DeviceMessenger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceMessenger")
            .field("device", &self.device.mac)
            .field("stats", &self.stats())
            .finish()
    }
}
