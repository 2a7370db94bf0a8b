use std::collections::BTreeMap;
use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use eiscp_device::{DeviceInfo, KeepAliveStatus, MessengerStats};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

pub fn print_devices(devices: &[DeviceInfo], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(devices),
        OutputFormat::Table => {
            let mut table = new_table(vec!["MODEL", "MAC", "ADDRESS", "PORT", "REGION"]);
            for device in devices {
                table.add_row(vec![
                    device.model.clone(),
                    device.mac.clone(),
                    device.ip.to_string(),
                    device.port.to_string(),
                    device.region.clone(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            if devices.is_empty() {
                println!("no devices found");
            }
            for device in devices {
                println!(
                    "{} mac={} addr={} region={}",
                    device.model,
                    device.mac,
                    device.control_addr(),
                    device.region
                );
            }
        }
    }
}

#[derive(Serialize)]
pub struct PropertyOutput<'a> {
    pub mac: &'a str,
    pub code: &'a str,
    pub value: &'a str,
}

pub fn print_property(property: &PropertyOutput<'_>, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(property),
        OutputFormat::Table => {
            let mut table = new_table(vec!["MAC", "CODE", "VALUE"]);
            table.add_row(vec![property.mac, property.code, property.value]);
            println!("{table}");
        }
        OutputFormat::Pretty => println!("{}={}", property.code, property.value),
    }
}

#[derive(Serialize)]
pub struct SentOutput<'a> {
    pub mac: &'a str,
    pub command: &'a str,
    pub state: String,
}

pub fn print_sent(sent: &SentOutput<'_>, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(sent),
        OutputFormat::Table => {
            let mut table = new_table(vec!["MAC", "COMMAND", "STATE"]);
            table.add_row(vec![sent.mac, sent.command, sent.state.as_str()]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("sent {} to {} ({})", sent.command, sent.mac, sent.state)
        }
    }
}

/// One periodic report of a watched device.
#[derive(Serialize)]
pub struct WatchOutput {
    pub mac: String,
    pub connected: bool,
    pub state: Option<String>,
    pub address: Option<String>,
    pub received: u64,
    pub sent: u64,
    pub properties: BTreeMap<String, String>,
}

impl WatchOutput {
    pub fn new(
        status: KeepAliveStatus,
        stats: Option<MessengerStats>,
        properties: BTreeMap<String, String>,
    ) -> Self {
        Self {
            mac: status.mac,
            connected: status.connected,
            state: status.state,
            address: status.device.map(|device| device.control_addr().to_string()),
            received: stats.map_or(0, |stats| stats.received),
            sent: stats.map_or(0, |stats| stats.sent),
            properties,
        }
    }
}

pub fn print_watch(report: &WatchOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(report),
        OutputFormat::Table => {
            let mut table = new_table(vec!["CODE", "VALUE"]);
            for (code, value) in &report.properties {
                table.add_row(vec![code, value]);
            }
            println!("{} {}", report.mac, status_line(report));
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let properties: Vec<String> = report
                .properties
                .iter()
                .map(|(code, value)| format!("{code}={value}"))
                .collect();
            println!(
                "{} {} {}",
                report.mac,
                status_line(report),
                properties.join(" ")
            );
        }
    }
}

fn status_line(report: &WatchOutput) -> String {
    match (&report.state, &report.address) {
        (Some(state), Some(address)) => format!(
            "{state} at {address} rx={} tx={}",
            report.received, report.sent
        ),
        (_, Some(address)) => format!("disconnected, last seen at {address}"),
        _ => "not discovered yet".to_string(),
    }
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}
