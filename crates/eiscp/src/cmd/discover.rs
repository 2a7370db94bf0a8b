use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use eiscp_device::Intermediary;
use tracing::info;

use crate::cmd::{install_ctrlc_handler, parse_duration, sleep_while_running, DiscoverArgs, NetworkArgs};
use crate::exit::{device_error, CliResult, SUCCESS};
use crate::output::{print_devices, OutputFormat};

pub fn run(args: DiscoverArgs, network: &NetworkArgs, format: OutputFormat) -> CliResult<i32> {
    let duration = parse_duration(&args.duration)?;
    let intermediary = Intermediary::new(network.intermediary_config(None)?);

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(Arc::clone(&running))?;

    let discovery = intermediary
        .spawn_discovery()
        .map_err(|err| device_error("discovery failed to start", err))?;
    sleep_while_running(&running, duration);
    discovery.stop();

    let devices = intermediary.devices();
    info!(count = devices.len(), "discovery finished");
    print_devices(&devices, format);
    Ok(SUCCESS)
}
