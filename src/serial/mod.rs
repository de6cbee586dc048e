pub mod coordinator;
pub mod interface;
pub mod pipeline;
pub mod protocol;
pub mod transcript;

pub use coordinator::{Coordinator, Exchange, WaitOutcome, WaitStrategy};
pub use interface::{PortOpener, PortSelection, SerialPortOpener};
pub use pipeline::LineAssembler;
pub use protocol::DeviceCommand;
pub use transcript::Transcript;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};

/// Byte stream to the board. Real sessions use a `tokio_serial::SerialStream`;
/// tests plug in an in-memory duplex.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

pub type BoxedTransport = Box<dyn Transport>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialDeviceInfo {
    pub port_name: String,
    pub port_type: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

impl SerialDeviceInfo {
    pub fn is_usb(&self) -> bool {
        self.vid.is_some()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SerialError {
    #[error("Port not found: {0}")]
    PortNotFound(String),

    #[error("No serial ports available")]
    NoPorts,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialport error: {0}")]
    SerialportError(#[from] serialport::Error),
}

pub type Result<T> = std::result::Result<T, SerialError>;
