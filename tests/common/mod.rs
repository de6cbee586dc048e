#![allow(dead_code)]

use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};

use board_probe_lib::config::ScannerConfig;
use board_probe_lib::serial::protocol::Bus;
use board_probe_lib::serial::{BoxedTransport, LineAssembler, PortOpener, SerialDeviceInfo, SerialError};

pub const PROMPT: &str = "eeprom> ";

/// What the fake board does with one command line.
pub enum Reply {
    Text(String),
    Silent,
    /// Close the board's end of the stream.
    Hangup,
}

pub type Responder = Box<dyn FnMut(&str) -> Reply + Send>;

/// `body` followed by a fresh prompt with no line terminator, the way the
/// firmware leaves it.
pub fn answer(body: &str) -> Reply {
    Reply::Text(format!("{}{}", body, PROMPT))
}

/// Hex-dump rows holding `text`, NUL padded to `rows` rows of 16 bytes.
pub fn hex_rows(text: &str, rows: usize) -> String {
    let mut bytes = text.as_bytes().to_vec();
    bytes.resize(rows * 16, 0);
    bytes
        .chunks(16)
        .enumerate()
        .map(|(i, chunk)| {
            let hex: Vec<String> = chunk.iter().map(|b| format!("{:02x}", b)).collect();
            let ascii: String = chunk
                .iter()
                .map(|b| if b.is_ascii_graphic() { *b as char } else { '.' })
                .collect();
            format!("{:02x}: {}  {}\r\n", i * 16, hex.join(" "), ascii)
        })
        .collect()
}

/// Board that acknowledges every select and read, and dumps `contents` for
/// the channels that have an entry.
pub fn board_with(contents: Vec<(&'static str, &'static str)>) -> Responder {
    let mut selected = String::new();
    Box::new(move |command: &str| {
        let words: Vec<&str> = command.split_whitespace().collect();
        match words.as_slice() {
            ["sm", bus, index] => {
                selected = format!("{}{}", bus, index);
                answer(&format!("mux {} {} selected\r\n", bus, index))
            }
            ["er", ..] => answer("OK\r\n"),
            ["hd", ..] => match contents.iter().find(|(ch, _)| *ch == selected) {
                Some((_, text)) => answer(&hex_rows(text, 2)),
                None => answer(""),
            },
            _ => answer("unknown command\r\n"),
        }
    })
}

pub fn test_config(buses: &[Bus], indices_per_bus: u8) -> ScannerConfig {
    let mut config = ScannerConfig::default();
    config.scan.buses = buses.to_vec();
    config.scan.indices_per_bus = indices_per_bus;
    config
}

pub fn port(name: &str, usb: bool) -> SerialDeviceInfo {
    SerialDeviceInfo {
        port_name: name.to_string(),
        port_type: if usb { "USB".into() } else { "PCI".into() },
        vid: usb.then_some(0x2341),
        pid: usb.then_some(0x0043),
        serial_number: None,
        manufacturer: None,
        product: None,
    }
}

/// Port opener whose ports are in-memory pipes to a scripted board.
pub struct FakeOpener {
    ports: Vec<SerialDeviceInfo>,
    open_delay: Duration,
    opens: AtomicUsize,
    make_board: Box<dyn Fn() -> Responder + Send + Sync>,
    events: Arc<Mutex<Vec<&'static str>>>,
    received: Arc<Mutex<Vec<String>>>,
}

impl FakeOpener {
    pub fn new(make_board: impl Fn() -> Responder + Send + Sync + 'static) -> Self {
        Self {
            ports: vec![port("fake0", true)],
            open_delay: Duration::ZERO,
            opens: AtomicUsize::new(0),
            make_board: Box::new(make_board),
            events: Arc::new(Mutex::new(Vec::new())),
            received: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_ports(mut self, ports: Vec<SerialDeviceInfo>) -> Self {
        self.ports = ports;
        self
    }

    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Transport lifecycle events, in order: "shutdown" when the write side
    /// is closed, "closed" when the transport is dropped.
    pub fn events(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().clone()
    }

    /// Command lines the board has received, across all opens.
    pub fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }
}

#[async_trait]
impl PortOpener for FakeOpener {
    async fn list_ports(&self) -> Result<Vec<SerialDeviceInfo>, SerialError> {
        Ok(self.ports.clone())
    }

    async fn open(&self, port_name: &str) -> Result<BoxedTransport, SerialError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if !self.ports.iter().any(|p| p.port_name == port_name) {
            return Err(SerialError::PortNotFound(port_name.to_string()));
        }
        tokio::time::sleep(self.open_delay).await;

        let (host, device) = tokio::io::duplex(4096);
        tokio::spawn(run_board(device, (self.make_board)(), self.received.clone()));

        let transport: BoxedTransport = Box::new(RecordingTransport {
            inner: host,
            events: self.events.clone(),
        });
        Ok(transport)
    }
}

async fn run_board(mut stream: DuplexStream, mut responder: Responder, received: Arc<Mutex<Vec<String>>>) {
    if stream.write_all(PROMPT.as_bytes()).await.is_err() {
        return;
    }
    let mut assembler = LineAssembler::new();
    let mut buf = [0u8; 256];

    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        for command in assembler.push(&buf[..n]) {
            received.lock().unwrap().push(command.clone());
            match responder(&command) {
                Reply::Text(text) => {
                    // Two writes, so lines straddle read boundaries
                    let (head, tail) = text.as_bytes().split_at(text.len() / 2);
                    if stream.write_all(head).await.is_err() {
                        return;
                    }
                    tokio::task::yield_now().await;
                    if stream.write_all(tail).await.is_err() {
                        return;
                    }
                }
                Reply::Silent => {}
                Reply::Hangup => return,
            }
        }
    }
}

struct RecordingTransport {
    inner: DuplexStream,
    events: Arc<Mutex<Vec<&'static str>>>,
}

impl AsyncRead for RecordingTransport {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for RecordingTransport {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.events.lock().unwrap().push("shutdown");
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

impl Drop for RecordingTransport {
    fn drop(&mut self) {
        self.events.lock().unwrap().push("closed");
    }
}
