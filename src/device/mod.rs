pub mod manager;
pub mod models;

pub use manager::{ConnectionManager, Session};
pub use models::*;

use crate::serial::SerialError;

#[derive(Debug, thiserror::Error)]
pub enum ConnError {
    #[error("A connection attempt is already in progress")]
    Busy,

    #[error("No serial ports found")]
    NoPorts,

    #[error("Port not found: {0}")]
    PortNotFound(String),

    #[error("Failed to open port: {0}")]
    OpenFailed(String),

    #[error("Device not connected")]
    NotConnected,

    #[error("Serial communication error: {0}")]
    SerialError(SerialError),
}

impl ConnError {
    /// Short hint for whoever has to fix the setup.
    pub fn remediation_hint(&self) -> &'static str {
        match self {
            ConnError::Busy => "Wait for the current connection attempt to finish, then retry.",
            ConnError::NoPorts => "Plug the board in over USB and check that its driver is installed.",
            ConnError::PortNotFound(_) => "Check the port name, or omit it to pick the board automatically.",
            ConnError::OpenFailed(_) => {
                "Close any other program using the port (serial monitors, IDEs) and check permissions."
            }
            ConnError::NotConnected => "Connect to the board before issuing commands.",
            ConnError::SerialError(_) => "Reconnect the board and retry.",
        }
    }
}

impl From<SerialError> for ConnError {
    fn from(err: SerialError) -> Self {
        match err {
            SerialError::NoPorts => ConnError::NoPorts,
            SerialError::PortNotFound(name) => ConnError::PortNotFound(name),
            SerialError::ConnectionFailed(msg) => ConnError::OpenFailed(msg),
            other => ConnError::SerialError(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConnError>;
