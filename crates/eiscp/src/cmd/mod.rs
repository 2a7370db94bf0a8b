use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::{Args, Subcommand};
use eiscp_device::{
    DeviceMessenger, DiscoveryConfig, DiscoveryHandle, Intermediary, IntermediaryConfig,
    MessengerConfig,
};
use eiscp_frame::message::CODE_LEN;
use eiscp_transport::DEFAULT_PORT;

use crate::exit::{device_error, CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod discover;
pub mod get;
pub mod send;
pub mod set;
pub mod version;
pub mod watch;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Broadcast discovery probes and list the receivers that answer.
    Discover(DiscoverArgs),
    /// Keep a receiver connected and print its properties periodically.
    Watch(WatchArgs),
    /// Query one property of a receiver.
    Get(GetArgs),
    /// Set one property of a receiver.
    Set(SetArgs),
    /// Send a raw ISCP command to a receiver.
    Send(SendArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, network: &NetworkArgs, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Discover(args) => discover::run(args, network, format),
        Command::Watch(args) => watch::run(args, network, format),
        Command::Get(args) => get::run(args, network, format),
        Command::Set(args) => set::run(args, network, format),
        Command::Send(args) => send::run(args, network, format),
        Command::Version(args) => version::run(args),
    }
}

/// Discovery and connection settings shared by every subcommand.
#[derive(Args, Debug)]
pub struct NetworkArgs {
    /// Port receivers listen on for discovery probes.
    #[arg(long, env = "EISCP_PORT", default_value_t = DEFAULT_PORT, global = true)]
    pub port: u16,
    /// Local port for the discovery socket (default: same as --port, 0 for ephemeral).
    #[arg(long, value_name = "PORT", global = true)]
    pub bind_port: Option<u16>,
    /// Destination address of discovery probes.
    #[arg(long, value_name = "ADDR", default_value_t = IpAddr::V4(Ipv4Addr::BROADCAST), global = true)]
    pub broadcast: IpAddr,
    /// Pause between discovery probes (e.g. 5s, 500ms).
    #[arg(long, value_name = "DURATION", default_value = "5s", global = true)]
    pub probe_interval: String,
    /// Hardware address of the default receiver.
    #[arg(long, env = "EISCP_DEVICE", value_name = "MAC", global = true)]
    pub device: Option<String>,
    /// How long a property query waits for the receiver (e.g. 1s).
    #[arg(long, value_name = "DURATION", default_value = "1s", global = true)]
    pub query_timeout: String,
}

impl NetworkArgs {
    pub fn intermediary_config(&self, keep_alive: Option<String>) -> CliResult<IntermediaryConfig> {
        let discovery = DiscoveryConfig {
            device_port: self.port,
            bind_port: self.bind_port.unwrap_or(self.port),
            broadcast: self.broadcast,
            probe_interval: parse_duration(&self.probe_interval)?,
            ..DiscoveryConfig::default()
        };
        let messenger = MessengerConfig {
            query_timeout: parse_duration(&self.query_timeout)?,
            ..MessengerConfig::default()
        };
        Ok(IntermediaryConfig {
            discovery,
            messenger,
            keep_alive,
        })
    }

    /// The explicit device argument, or `--device` when absent.
    pub fn resolve_device(&self, explicit: Option<String>) -> CliResult<String> {
        explicit.or_else(|| self.device.clone()).ok_or_else(|| {
            CliError::new(USAGE, "no device given (pass a MAC address or --device)")
        })
    }
}

#[derive(Args, Debug)]
pub struct DiscoverArgs {
    /// How long to listen for receivers (e.g. 6s, 500ms).
    #[arg(long, default_value = "6s")]
    pub duration: String,
}

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Hardware address of the receiver (default: --device).
    pub mac: Option<String>,
    /// Pause between reports (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub interval: String,
    /// Exit after N reports.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct GetArgs {
    /// Hardware address of the receiver.
    pub mac: String,
    /// Three-letter property code, e.g. PWR or MVL.
    pub code: String,
    /// Maximum time to wait for the receiver to be discovered and connected.
    #[arg(long, default_value = "30s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct SetArgs {
    /// Hardware address of the receiver.
    pub mac: String,
    /// Three-letter property code, e.g. PWR or MVL.
    pub code: String,
    /// New value, e.g. 01 or 2A.
    pub value: String,
    /// Maximum time to wait for the receiver to be discovered and connected.
    #[arg(long, default_value = "30s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Hardware address of the receiver.
    pub mac: String,
    /// Complete ISCP command, e.g. !1PWR01.
    pub command: String,
    /// Maximum time to wait for the receiver to be discovered and connected.
    #[arg(long, default_value = "30s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// A running intermediary with discovery and one kept-alive device.
pub struct Session {
    pub intermediary: Intermediary,
    pub discovery: DiscoveryHandle,
    pub mac: String,
}

impl Session {
    pub fn start(network: &NetworkArgs, mac: String) -> CliResult<Self> {
        let config = network.intermediary_config(Some(mac.clone()))?;
        let intermediary = Intermediary::new(config);
        let discovery = intermediary
            .spawn_discovery()
            .map_err(|err| device_error("discovery failed to start", err))?;
        let mac = eiscp_device::normalize_mac(&mac);
        Ok(Self {
            intermediary,
            discovery,
            mac,
        })
    }

    /// Wait for the device's messenger.
    pub fn messenger(&self, timeout: Duration) -> CliResult<Arc<DeviceMessenger>> {
        self.intermediary
            .wait_for_messenger(&self.mac, timeout)
            .map_err(|err| device_error(&format!("device {} unavailable", self.mac), err))
    }

    pub fn close(self) {
        if let Err(err) = self.intermediary.forget(&self.mac) {
            tracing::debug!(%err, "forget on close");
        }
        self.discovery.stop();
    }
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

/// Upper-case a property code, rejecting anything but three alphanumerics.
pub fn parse_code(code: &str) -> CliResult<String> {
    let code = code.trim();
    if code.len() != CODE_LEN || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(CliError::new(
            USAGE,
            format!("property code must be {CODE_LEN} letters or digits, got {code:?}"),
        ));
    }
    Ok(code.to_ascii_uppercase())
}

pub fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

/// Sleep for `duration`, returning early once `running` is cleared.
/// Returns whether the process should keep running.
pub fn sleep_while_running(running: &AtomicBool, duration: Duration) -> bool {
    let deadline = Instant::now() + duration;
    while running.load(Ordering::SeqCst) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return true;
        }
        thread::sleep(remaining.min(Duration::from_millis(50)));
    }
    false
}
