//! Fake receivers for exercising messengers over loopback sockets.

use std::io::Write;
use std::net::{IpAddr, Ipv4Addr, Shutdown, SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use eiscp_frame::{decode_packet, encode_packet, Frame, FrameReader, Terminator};

use crate::info::DeviceInfo;

pub fn device_info(mac: &str, addr: SocketAddr) -> DeviceInfo {
    DeviceInfo::from_discovery(&format!("TX-NR616/{}/DX/{mac}", addr.port()), addr.ip())
        .expect("test payload is valid")
}

pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

/// A TCP control port that accepts one connection, records every frame and
/// answers through a handler.
pub struct FakeReceiver {
    addr: SocketAddr,
    stream: Arc<Mutex<Option<TcpStream>>>,
    frames: Arc<Mutex<Vec<Frame>>>,
    disconnected: Arc<AtomicBool>,
}

impl FakeReceiver {
    pub fn start<F>(handler: F) -> Self
    where
        F: Fn(&Frame) -> Vec<String> + Send + 'static,
    {
        Self::start_with_greeting(&[], handler)
    }

    /// Like [`FakeReceiver::start`], pushing `greeting` as soon as a client connects.
    pub fn start_with_greeting<F>(greeting: &[&str], handler: F) -> Self
    where
        F: Fn(&Frame) -> Vec<String> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let stream: Arc<Mutex<Option<TcpStream>>> = Arc::new(Mutex::new(None));
        let frames = Arc::new(Mutex::new(Vec::new()));
        let disconnected = Arc::new(AtomicBool::new(false));
        let greeting: Vec<String> = greeting.iter().map(|s| s.to_string()).collect();

        let shared_stream = Arc::clone(&stream);
        let shared_frames = Arc::clone(&frames);
        let shared_disconnected = Arc::clone(&disconnected);
        thread::spawn(move || {
            let Ok((conn, _)) = listener.accept() else {
                return;
            };
            let reader_stream = conn.try_clone().unwrap();
            *shared_stream.lock().unwrap() = Some(conn);
            for message in &greeting {
                write_message(&shared_stream, message);
            }

            let mut reader = FrameReader::new(reader_stream);
            while let Ok(frame) = reader.read_frame() {
                let replies = handler(&frame);
                shared_frames.lock().unwrap().push(frame);
                for reply in replies {
                    write_message(&shared_stream, &reply);
                }
            }
            shared_disconnected.store(true, Ordering::SeqCst);
        });

        Self {
            addr,
            stream,
            frames,
            disconnected,
        }
    }

    /// Answers power queries with "on" and ignores everything else.
    pub fn power_only(frame: &Frame) -> Vec<String> {
        if frame.text() == "!1PWRQSTN" {
            vec!["!1PWR01".to_string()]
        } else {
            Vec::new()
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Frames received so far.
    pub fn frames(&self) -> Vec<Frame> {
        self.frames.lock().unwrap().clone()
    }

    /// Whether the client closed the connection.
    pub fn disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    /// Push an unsolicited status message.
    pub fn push(&self, message: &str) {
        write_message(&self.stream, message);
    }

    pub fn write_raw(&self, bytes: &[u8]) {
        if let Some(stream) = self.stream.lock().unwrap().as_mut() {
            let _ = stream.write_all(bytes);
        }
    }

    /// Close the connection from the receiver's side.
    pub fn drop_connection(&self) {
        if let Some(stream) = self.stream.lock().unwrap().as_ref() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

fn write_message(stream: &Mutex<Option<TcpStream>>, message: &str) {
    let packet = encode_packet(message, Terminator::EofCrLf).unwrap();
    if let Some(stream) = stream.lock().unwrap().as_mut() {
        let _ = stream.write_all(&packet);
    }
}

/// A UDP discovery responder that answers each probe with fixed payloads.
pub struct FakeResponder {
    addr: SocketAddr,
    probes: Arc<Mutex<usize>>,
}

impl FakeResponder {
    pub fn start(answers: Vec<String>) -> Self {
        let socket = UdpSocket::bind((IpAddr::V4(Ipv4Addr::LOCALHOST), 0)).unwrap();
        let addr = socket.local_addr().unwrap();
        let probes = Arc::new(Mutex::new(0));

        let counter = Arc::clone(&probes);
        thread::spawn(move || {
            let mut buf = [0u8; 512];
            while let Ok((n, from)) = socket.recv_from(&mut buf) {
                let Ok(frame) = decode_packet(&buf[..n]) else {
                    continue;
                };
                if frame.text() != "!xECNQSTN" {
                    continue;
                }
                *counter.lock().unwrap() += 1;
                for answer in &answers {
                    let packet = encode_packet(answer, Terminator::EofCrLf).unwrap();
                    let _ = socket.send_to(&packet, from);
                }
            }
        });

        Self { addr, probes }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn probes(&self) -> usize {
        *self.probes.lock().unwrap()
    }
}
