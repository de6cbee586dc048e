use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{ConfigError, Result};
use crate::serial::protocol::{Bus, ChannelCoordinate, CommandKind, CHANNELS_PER_BUS};
use crate::serial::WaitStrategy;

/// Top-level scanner settings. Every field has a default, so a config file
/// only needs to name what it changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub timing: TimingConfig,
    pub scan: ScanPlan,
    pub diagnostic: DiagnosticPlan,
}

impl ScannerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_json(&raw)?;
        log::debug!("Loaded scanner config from {}", path.display());
        Ok(config)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.scan.buses.is_empty() || self.scan.indices_per_bus == 0 {
            return Err(ConfigError::Invalid("scan address space is empty".into()));
        }
        if self.scan.indices_per_bus > CHANNELS_PER_BUS {
            return Err(ConfigError::Invalid(format!(
                "indices_per_bus must be at most {}, got {}",
                CHANNELS_PER_BUS, self.scan.indices_per_bus
            )));
        }
        if self.scan.buffer_length == 0 || self.diagnostic.buffer_length == 0 {
            return Err(ConfigError::Invalid("buffer length must be non-zero".into()));
        }
        if self.diagnostic.channels.is_empty() {
            return Err(ConfigError::Invalid("diagnostic channel set is empty".into()));
        }
        if let Some(channel) = self.diagnostic.channels.iter().find(|c| c.index >= CHANNELS_PER_BUS) {
            return Err(ConfigError::Invalid(format!(
                "diagnostic channel {} is out of range, indices run 0..{}",
                channel, CHANNELS_PER_BUS
            )));
        }

        let t = &self.timing;
        let timeouts = [
            ("poll_interval_ms", t.poll_interval_ms),
            ("stability_timeout_ms", t.stability_timeout_ms),
            ("prompt_timeout_ms", t.prompt_timeout_ms),
            ("read_timeout_ms", t.read_timeout_ms),
            ("diagnostic_read_timeout_ms", t.diagnostic_read_timeout_ms),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Invalid(format!("{} must be non-zero", name)));
        }
        if t.quiet_polls == 0 || t.prompt_window == 0 {
            return Err(ConfigError::Invalid("quiet_polls and prompt_window must be non-zero".into()));
        }
        Ok(())
    }
}

/// Delays and timeouts, all in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Opening the port resets the board; nothing may be sent before this elapses.
    pub open_settle_ms: u64,
    pub post_write_delay_ms: u64,
    pub poll_interval_ms: u64,
    /// Consecutive polls without growth that count as "response complete".
    pub quiet_polls: u32,
    pub stability_timeout_ms: u64,
    /// How many of the most recent lines are searched for the prompt.
    pub prompt_window: usize,
    pub prompt_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub diagnostic_read_timeout_ms: u64,
    /// How many of the select's most recent lines are checked for a failure marker.
    pub failure_window: usize,
    pub dump_retry_delay_ms: u64,
    /// Lets the addressed sub-device release the shared bus.
    pub channel_settle_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            open_settle_ms: 2000,
            post_write_delay_ms: 50,
            poll_interval_ms: 100,
            quiet_polls: 3,
            stability_timeout_ms: 2000,
            prompt_window: 5,
            prompt_timeout_ms: 3000,
            read_timeout_ms: 1500,
            diagnostic_read_timeout_ms: 3000,
            failure_window: 4,
            dump_retry_delay_ms: 500,
            channel_settle_ms: 200,
        }
    }
}

impl TimingConfig {
    pub fn open_settle(&self) -> Duration {
        Duration::from_millis(self.open_settle_ms)
    }

    pub fn post_write_delay(&self) -> Duration {
        Duration::from_millis(self.post_write_delay_ms)
    }

    pub fn dump_retry_delay(&self) -> Duration {
        Duration::from_millis(self.dump_retry_delay_ms)
    }

    pub fn channel_settle(&self) -> Duration {
        Duration::from_millis(self.channel_settle_ms)
    }

    /// Completion strategy for a command kind. Selects and dumps end with the
    /// shell prompt; buffer reads and probes print an unpredictable amount.
    pub fn strategy_for(&self, kind: CommandKind) -> WaitStrategy {
        match kind {
            CommandKind::Select | CommandKind::Dump => self.prompt_wait(),
            CommandKind::Read => self.read_wait(),
            CommandKind::Probe => self.stability_wait(),
        }
    }

    pub fn prompt_wait(&self) -> WaitStrategy {
        WaitStrategy::Prompt {
            window: self.prompt_window,
            timeout: Duration::from_millis(self.prompt_timeout_ms),
        }
    }

    pub fn stability_wait(&self) -> WaitStrategy {
        self.stability_with_timeout(self.stability_timeout_ms)
    }

    pub fn read_wait(&self) -> WaitStrategy {
        self.stability_with_timeout(self.read_timeout_ms)
    }

    pub fn diagnostic_read_wait(&self) -> WaitStrategy {
        self.stability_with_timeout(self.diagnostic_read_timeout_ms)
    }

    fn stability_with_timeout(&self, timeout_ms: u64) -> WaitStrategy {
        WaitStrategy::Stability {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            quiet_polls: self.quiet_polls,
            timeout: Duration::from_millis(timeout_ms),
        }
    }
}

/// Which lines decide whether a hex dump "produced data" for the retry check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryScope {
    /// Only lines produced since the dump command was issued.
    #[default]
    SinceCommand,
    /// Any hex row anywhere in the transcript so far. Earlier channels' rows
    /// count, so a silent channel can look successful.
    WholeTranscript,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanPlan {
    pub buses: Vec<Bus>,
    pub indices_per_bus: u8,
    pub buffer_address: u16,
    pub buffer_length: u16,
    pub retry_scope: RetryScope,
    /// Record `> <command>` in the transcript for every command sent. Turn
    /// off for firmware that echoes input itself.
    pub echo_commands: bool,
}

impl Default for ScanPlan {
    fn default() -> Self {
        Self {
            buses: Bus::ALL.to_vec(),
            indices_per_bus: CHANNELS_PER_BUS,
            buffer_address: 0,
            buffer_length: 128,
            retry_scope: RetryScope::SinceCommand,
            echo_commands: true,
        }
    }
}

impl ScanPlan {
    /// Channel coordinates in sweep order, bus-major.
    pub fn channels(&self) -> Vec<ChannelCoordinate> {
        self.buses
            .iter()
            .flat_map(|bus| (0..self.indices_per_bus).filter_map(move |i| ChannelCoordinate::new(*bus, i)))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticPlan {
    pub channels: Vec<ChannelCoordinate>,
    pub buffer_address: u16,
    pub buffer_length: u16,
}

impl Default for DiagnosticPlan {
    fn default() -> Self {
        let channels = [(Bus::A, 0), (Bus::A, 1), (Bus::B, 0), (Bus::B, 1)]
            .into_iter()
            .filter_map(|(bus, index)| ChannelCoordinate::new(bus, index))
            .collect();
        Self {
            channels,
            buffer_address: 0,
            buffer_length: 256,
        }
    }
}
