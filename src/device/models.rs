use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::serial::pipeline::ReaderExit;

/// Connection state as seen by a caller
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected(String),
    /// The port is still held but the read loop has stopped.
    Stale(String),
}

/// Identity of the open session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionInfo {
    pub id: Uuid,
    pub port_name: String,
    pub baud_rate: u32,
    pub opened_at: DateTime<Utc>,
}

impl SessionInfo {
    pub fn new(port_name: String, baud_rate: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            port_name,
            baud_rate,
            opened_at: Utc::now(),
        }
    }
}

/// What happened during a best-effort teardown. Every step runs even when an
/// earlier one failed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TeardownReport {
    pub port_name: String,
    pub cancel_error: Option<String>,
    pub reader_exit: Option<ReaderExit>,
    pub reader_error: Option<String>,
    pub writer_closed: bool,
    pub writer_error: Option<String>,
    pub port_closed: bool,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.cancel_error.is_none()
            && self.reader_error.is_none()
            && self.writer_error.is_none()
            && self.port_closed
    }
}
