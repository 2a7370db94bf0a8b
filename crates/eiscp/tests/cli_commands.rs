#![cfg(feature = "cli")]

use std::io::Write;
use std::net::{TcpListener, UdpSocket};
use std::process::{Command, Output};
use std::thread;

use eiscp_frame::{decode_packet, encode_packet, FrameReader, Terminator};

const MAC: &str = "0009B0AABBCC";

/// Answers every discovery probe on a loopback port with `answer`.
fn spawn_responder(answer: String) -> u16 {
    let socket = UdpSocket::bind("127.0.0.1:0").expect("responder should bind");
    let port = socket.local_addr().unwrap().port();
    thread::spawn(move || {
        let mut buf = [0u8; 512];
        while let Ok((len, from)) = socket.recv_from(&mut buf) {
            let Ok(frame) = decode_packet(&buf[..len]) else {
                continue;
            };
            if frame.text() != "!xECNQSTN" {
                continue;
            }
            let packet = encode_packet(&answer, Terminator::EofCrLf).unwrap();
            let _ = socket.send_to(&packet, from);
        }
    });
    port
}

/// A control port that reports power on, volume 2A and records set commands.
fn spawn_receiver() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("receiver should bind");
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        for conn in listener.incoming() {
            let Ok(conn) = conn else {
                continue;
            };
            thread::spawn(move || {
                let mut writer = conn.try_clone().unwrap();
                let mut reader = FrameReader::new(conn);
                while let Ok(frame) = reader.read_frame() {
                    let reply = match &*frame.text() {
                        "!1PWRQSTN" => "!1PWR01".to_string(),
                        "!1MVLQSTN" => "!1MVL2A".to_string(),
                        other if other.starts_with("!1MVL") => other.to_string(),
                        _ => continue,
                    };
                    let packet = encode_packet(&reply, Terminator::EofCrLf).unwrap();
                    if writer.write_all(&packet).is_err() {
                        break;
                    }
                }
            });
        }
    });
    port
}

fn eiscp(discovery_port: u16, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_eiscp"))
        .args(["--log-level", "error", "--format", "json"])
        .args(["--broadcast", "127.0.0.1", "--bind-port", "0"])
        .args(["--port", &discovery_port.to_string()])
        .args(["--probe-interval", "100ms"])
        .args(args)
        .output()
        .expect("eiscp should run")
}

fn unused_udp_port() -> u16 {
    UdpSocket::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

#[test]
fn version_prints_package_version() {
    let output = Command::new(env!("CARGO_BIN_EXE_eiscp"))
        .arg("version")
        .output()
        .expect("version should run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), format!("eiscp {}", env!("CARGO_PKG_VERSION")));
}

#[test]
fn discover_lists_responding_receiver_once() {
    let port = spawn_responder(format!("!1ECNTX-NR616/60128/DX/{MAC}"));

    let output = eiscp(port, &["discover", "--duration", "1s"]);

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let devices: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("discover should emit json");
    let devices = devices.as_array().expect("json array");
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0]["mac"], MAC);
    assert_eq!(devices[0]["model"], "TX-NR616");
    assert_eq!(devices[0]["ip"], "127.0.0.1");
}

#[test]
fn discover_with_no_receivers_prints_empty_list() {
    let output = eiscp(unused_udp_port(), &["discover", "--duration", "300ms"]);

    assert!(output.status.success());
    let devices: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(devices, serde_json::json!([]));
}

#[test]
fn get_queries_discovered_receiver() {
    let control = spawn_receiver();
    let port = spawn_responder(format!("!1ECNTX-NR616/{control}/DX/{MAC}"));

    let output = eiscp(port, &["get", &MAC.to_lowercase(), "mvl", "--timeout", "10s"]);

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let property: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(property["mac"], MAC);
    assert_eq!(property["code"], "MVL");
    assert_eq!(property["value"], "2A");
}

#[test]
fn set_reports_negotiated_state() {
    let control = spawn_receiver();
    let port = spawn_responder(format!("!1ECNTX-NR616/{control}/DX/{MAC}"));

    let output = eiscp(port, &["set", MAC, "MVL", "28", "--timeout", "10s"]);

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let sent: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(sent["command"], "!1MVL28");
    assert_eq!(sent["state"], "active (0x1A0D0A)");
}

#[test]
fn get_without_receiver_times_out_with_124() {
    let output = eiscp(unused_udp_port(), &["get", MAC, "PWR", "--timeout", "300ms"]);

    assert_eq!(output.status.code(), Some(124));
}

#[test]
fn invalid_property_code_is_usage_error() {
    let output = eiscp(unused_udp_port(), &["get", MAC, "VOLUME"]);

    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn watch_without_device_is_usage_error() {
    let output = Command::new(env!("CARGO_BIN_EXE_eiscp"))
        .env_remove("EISCP_DEVICE")
        .args(["watch", "--count", "1"])
        .output()
        .expect("watch should run");

    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn watch_reports_cached_properties() {
    let control = spawn_receiver();
    let port = spawn_responder(format!("!1ECNTX-NR616/{control}/DX/{MAC}"));

    let output = eiscp(
        port,
        &["--device", MAC, "watch", "--interval", "1s", "--count", "2"],
    );

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    let last = stdout.lines().last().expect("at least one report");
    let report: serde_json::Value = serde_json::from_str(last).unwrap();
    assert_eq!(report["mac"], MAC);
    assert_eq!(report["connected"], true);
    assert_eq!(report["properties"]["PWR"], "01");
    assert_eq!(report["properties"]["MVL"], "2A");
}
