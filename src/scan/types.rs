use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::diagnostics::DiagnosticReport;
use crate::serial::protocol::ChannelCoordinate;
use crate::serial::WaitOutcome;

/// What happened on one channel during a sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelReport {
    pub channel: ChannelCoordinate,
    pub key: String,
    pub selected: bool,
    pub select_outcome: WaitOutcome,
    pub read_outcome: Option<WaitOutcome>,
    pub dump_attempts: usize,
    pub dump_retries: usize,
    /// Hex rows produced by the last dump attempt.
    pub hex_rows: Vec<String>,
    /// Why the channel was given up on, if it was.
    pub abandoned: Option<String>,
}

impl ChannelReport {
    pub(crate) fn new(channel: ChannelCoordinate) -> Self {
        Self {
            channel,
            key: channel.key(),
            selected: false,
            select_outcome: WaitOutcome::NotSent,
            read_outcome: None,
            dump_attempts: 0,
            dump_retries: 0,
            hex_rows: Vec::new(),
            abandoned: None,
        }
    }

    pub fn has_data(&self) -> bool {
        !self.hex_rows.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStats {
    pub select_attempts: usize,
    pub select_successes: usize,
    pub dump_attempts: usize,
    pub dump_successes: usize,
    pub dump_retries: usize,
    pub hex_rows: usize,
    pub failed_reads: usize,
    pub channels_with_data: usize,
    pub component_count: usize,
}

impl ScanStats {
    pub(crate) fn record(&mut self, report: &ChannelReport) {
        if report.select_outcome != WaitOutcome::NotSent {
            self.select_attempts += 1;
        }
        if report.selected {
            self.select_successes += 1;
        }
        self.dump_attempts += report.dump_attempts;
        self.dump_retries += report.dump_retries;
        if report.has_data() {
            self.dump_successes += 1;
        }
        self.hex_rows += report.hex_rows.len();
    }
}

/// Result of a full sweep, as handed to whatever renders it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResult {
    /// Component identifiers per channel key. Channels without any are absent.
    pub channel_data: BTreeMap<String, Vec<String>>,
    pub channels: BTreeMap<String, ChannelReport>,
    pub stats: ScanStats,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// A sweep plus everything needed to explain it afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanOutcome {
    pub result: ScanResult,
    pub transcript: Vec<String>,
    pub diagnosis: DiagnosticReport,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticOutcome {
    pub channels: BTreeMap<String, ChannelReport>,
    pub report: DiagnosticReport,
    pub transcript: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}
