use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::cmd::{install_ctrlc_handler, parse_duration, sleep_while_running, NetworkArgs, Session, WatchArgs};
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_watch, OutputFormat, WatchOutput};

pub fn run(args: WatchArgs, network: &NetworkArgs, format: OutputFormat) -> CliResult<i32> {
    let interval = parse_duration(&args.interval)?;
    let mac = network.resolve_device(args.mac)?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(Arc::clone(&running))?;

    let session = Session::start(network, mac)?;
    let mut printed = 0usize;

    while sleep_while_running(&running, interval) {
        if let Some(report) = report(&session) {
            print_watch(&report, format);
        }
        printed = printed.saturating_add(1);

        if let Some(count) = args.count {
            if printed >= count {
                break;
            }
        }
    }

    session.close();
    Ok(SUCCESS)
}

fn report(session: &Session) -> Option<WatchOutput> {
    let status = session
        .intermediary
        .keep_alive_status()
        .into_iter()
        .find(|status| status.mac == session.mac)?;
    let messenger = session.intermediary.messenger(&session.mac);
    let stats = messenger.as_ref().map(|messenger| messenger.stats());
    let properties = messenger
        .map(|messenger| messenger.properties())
        .unwrap_or_default();
    Some(WatchOutput::new(status, stats, properties))
}
