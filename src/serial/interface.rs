use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serialport::SerialPortType;
use tokio_serial::SerialPortBuilderExt;

use super::{BoxedTransport, Result, SerialDeviceInfo, SerialError};

// Fixed line settings of the board firmware
pub const BAUD_RATE: u32 = 115200;
pub const DATA_BITS: tokio_serial::DataBits = tokio_serial::DataBits::Eight;
pub const PARITY: tokio_serial::Parity = tokio_serial::Parity::None;
pub const STOP_BITS: tokio_serial::StopBits = tokio_serial::StopBits::One;
pub const FLOW_CONTROL: tokio_serial::FlowControl = tokio_serial::FlowControl::None;

/// Which port a connect request should open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "port", rename_all = "snake_case")]
pub enum PortSelection {
    /// First enumerated USB serial port, falling back to the first port of any type.
    Auto,
    Named(String),
}

impl PortSelection {
    pub fn from_option(port: Option<String>) -> Self {
        match port {
            Some(name) => PortSelection::Named(name),
            None => PortSelection::Auto,
        }
    }

    /// Pick a port name out of an enumeration.
    pub fn resolve(&self, ports: &[SerialDeviceInfo]) -> Result<String> {
        match self {
            PortSelection::Named(name) => Ok(name.clone()),
            PortSelection::Auto => ports
                .iter()
                .find(|p| p.is_usb())
                .or_else(|| ports.first())
                .map(|p| p.port_name.clone())
                .ok_or(SerialError::NoPorts),
        }
    }
}

/// Opens the transport for a session. The production implementation talks to
/// a real serial port; tests substitute in-memory streams.
#[async_trait]
pub trait PortOpener: Send + Sync {
    async fn list_ports(&self) -> Result<Vec<SerialDeviceInfo>>;

    async fn open(&self, port_name: &str) -> Result<BoxedTransport>;
}

#[derive(Debug, Default, Clone)]
pub struct SerialPortOpener;

impl SerialPortOpener {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PortOpener for SerialPortOpener {
    async fn list_ports(&self) -> Result<Vec<SerialDeviceInfo>> {
        discover_ports()
    }

    async fn open(&self, port_name: &str) -> Result<BoxedTransport> {
        let known = discover_ports()?;
        if !known.iter().any(|p| p.port_name == port_name) {
            return Err(SerialError::PortNotFound(port_name.to_string()));
        }

        let stream = tokio_serial::new(port_name, BAUD_RATE)
            .data_bits(DATA_BITS)
            .parity(PARITY)
            .stop_bits(STOP_BITS)
            .flow_control(FLOW_CONTROL)
            .timeout(Duration::from_millis(1000))
            .open_native_async()
            .map_err(|e| SerialError::ConnectionFailed(e.to_string()))?;

        log::info!("Opened {} at {} baud (8N1, no flow control)", port_name, BAUD_RATE);
        let transport: BoxedTransport = Box::new(stream);
        Ok(transport)
    }
}

/// Enumerate the serial ports visible to the OS.
pub fn discover_ports() -> Result<Vec<SerialDeviceInfo>> {
    let ports = serialport::available_ports()?;
    let devices = ports
        .into_iter()
        .map(|port| match port.port_type {
            SerialPortType::UsbPort(usb_info) => SerialDeviceInfo {
                port_name: port.port_name,
                port_type: "usb".to_string(),
                vid: Some(usb_info.vid),
                pid: Some(usb_info.pid),
                serial_number: usb_info.serial_number,
                manufacturer: usb_info.manufacturer,
                product: usb_info.product,
            },
            other => SerialDeviceInfo {
                port_name: port.port_name,
                port_type: match other {
                    SerialPortType::PciPort => "pci",
                    SerialPortType::BluetoothPort => "bluetooth",
                    _ => "unknown",
                }
                .to_string(),
                vid: None,
                pid: None,
                serial_number: None,
                manufacturer: None,
                product: None,
            },
        })
        .collect();

    Ok(devices)
}
