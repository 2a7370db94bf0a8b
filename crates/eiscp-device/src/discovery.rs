use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use eiscp_frame::message::{discovery_payload, DISCOVERY_QUERY};
use eiscp_frame::{decode_packet, encode_packet, Terminator};
use eiscp_transport::{DiscoverySocket, TransportError, DEFAULT_PORT};
use tracing::{debug, info, trace, warn};

use crate::lock;

/// Largest datagram we expect from a receiver.
const DATAGRAM_BUFFER: usize = 1024;

/// Configuration of the discovery loop.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Port receivers listen on for probes.
    pub device_port: u16,
    /// Local address the discovery socket binds to.
    pub bind_ip: Ipv4Addr,
    /// Local port the discovery socket binds to. Zero picks an ephemeral port.
    pub bind_port: u16,
    /// Destination address of probes.
    pub broadcast: IpAddr,
    /// How long to collect answers after each probe.
    pub listen_window: Duration,
    /// Pause between probe cycles.
    pub probe_interval: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            device_port: DEFAULT_PORT,
            bind_ip: Ipv4Addr::UNSPECIFIED,
            bind_port: DEFAULT_PORT,
            broadcast: IpAddr::V4(Ipv4Addr::BROADCAST),
            listen_window: Duration::from_millis(50),
            probe_interval: Duration::from_secs(5),
        }
    }
}

impl DiscoveryConfig {
    fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(self.bind_ip), self.bind_port)
    }

    fn broadcast_addr(&self) -> SocketAddr {
        SocketAddr::new(self.broadcast, self.device_port)
    }
}

#[derive(Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl StopSignal {
    fn raise(&self) {
        *lock(&self.stopped) = true;
        self.wake.notify_all();
    }

    fn is_raised(&self) -> bool {
        *lock(&self.stopped)
    }

    /// Sleep for `timeout` unless raised first. Returns whether it was raised.
    fn wait(&self, timeout: Duration) -> bool {
        let stopped = lock(&self.stopped);
        let (stopped, _) = self
            .wake
            .wait_timeout_while(stopped, timeout, |stopped| !*stopped)
            .unwrap_or_else(PoisonError::into_inner);
        *stopped
    }
}

/// Handle to a running discovery loop.
///
/// Dropping the handle leaves the loop running for the life of the process.
pub struct DiscoveryHandle {
    signal: Arc<StopSignal>,
    thread: JoinHandle<()>,
}

impl DiscoveryHandle {
    /// End the loop at its next wait boundary and join its thread.
    pub fn stop(self) {
        self.signal.raise();
        if self.thread.join().is_err() {
            warn!("discovery thread panicked");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }
}

/// Start the discovery loop on its own thread.
///
/// `on_response` receives the `model/port/region/mac` payload of every valid
/// answer together with the address it came from. Duplicates are passed on;
/// deduplication belongs to the registry.
pub fn spawn<F>(config: DiscoveryConfig, on_response: F) -> Result<DiscoveryHandle, TransportError>
where
    F: Fn(&str, IpAddr) + Send + 'static,
{
    let signal = Arc::new(StopSignal::default());
    let loop_signal = Arc::clone(&signal);
    let thread = thread::Builder::new()
        .name("eiscp-discovery".to_string())
        .spawn(move || run(&config, &loop_signal, &on_response))?;
    Ok(DiscoveryHandle { signal, thread })
}

fn run<F>(config: &DiscoveryConfig, signal: &StopSignal, on_response: &F)
where
    F: Fn(&str, IpAddr),
{
    info!(
        bind = %config.bind_addr(),
        target = %config.broadcast_addr(),
        interval = ?config.probe_interval,
        "discovery started"
    );
    let mut socket: Option<DiscoverySocket> = None;
    let mut buf = [0u8; DATAGRAM_BUFFER];

    for &terminator in Terminator::all().iter().cycle() {
        if signal.is_raised() {
            break;
        }

        if socket.is_none() {
            match DiscoverySocket::bind(config.bind_addr(), config.broadcast_addr()) {
                Ok(bound) => socket = Some(bound),
                Err(err) => warn!(%err, "discovery socket unavailable, retrying next cycle"),
            }
        }
        if let Some(socket) = &socket {
            probe(socket, terminator, config.listen_window, &mut buf, on_response);
        }

        if signal.wait(config.probe_interval) {
            break;
        }
    }
    info!("discovery stopped");
}

/// Broadcast one probe and collect answers until the listen window closes.
fn probe<F>(
    socket: &DiscoverySocket,
    terminator: Terminator,
    window: Duration,
    buf: &mut [u8],
    on_response: &F,
) where
    F: Fn(&str, IpAddr),
{
    let packet = match encode_packet(DISCOVERY_QUERY, terminator) {
        Ok(packet) => packet,
        Err(err) => {
            warn!(%err, "failed to encode probe");
            return;
        }
    };
    if let Err(err) = socket.broadcast(&packet) {
        warn!(%err, %terminator, "probe broadcast failed");
        return;
    }

    let deadline = Instant::now() + window;
    loop {
        match socket.recv_until(buf, deadline) {
            Ok(Some((len, from))) => handle_datagram(&buf[..len], from.ip(), on_response),
            Ok(None) => break,
            Err(err) => {
                warn!(%err, "discovery receive failed");
                break;
            }
        }
    }
}

fn handle_datagram<F>(data: &[u8], ip: IpAddr, on_response: &F)
where
    F: Fn(&str, IpAddr),
{
    let frame = match decode_packet(data) {
        Ok(frame) => frame,
        Err(err) => {
            trace!(%ip, %err, "discarded undecodable datagram");
            return;
        }
    };
    let text = frame.text();
    match discovery_payload(&text) {
        Some(payload) => {
            debug!(%ip, payload, "discovery response");
            on_response(payload, ip);
        }
        None => trace!(%ip, text = %text, "ignored non-discovery datagram"),
    }
}
