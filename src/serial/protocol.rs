use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Number of addressable positions behind each multiplexer.
pub const CHANNELS_PER_BUS: u8 = 16;

/// Address-prefixed row with at least eight byte columns.
pub static HEX_ROW: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9A-Fa-f]{2,4}:\s+(?:[0-9A-Fa-f]{2}\s+){8,}").unwrap());

static SELECT_ECHO: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\S*>\s*sm\s+([ab])\s+(\d+)").unwrap());

static DUMP_ECHO: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^\S*>\s*hd\b").unwrap());

static COMMAND_ECHO: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\S*>\s*\S").unwrap());

static SELECT_ACK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(ok|ack|selected|switched|mux\s+[ab]\s*[:=]?\s*\d+)\b").unwrap());

static FAILURE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(error|err|fail|failed|failure|nack|invalid|timeout)\b").unwrap());

/// One of the two multiplexed buses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Bus {
    A,
    B,
}

impl Bus {
    pub const ALL: [Bus; 2] = [Bus::A, Bus::B];

    pub fn letter(&self) -> char {
        match self {
            Bus::A => 'a',
            Bus::B => 'b',
        }
    }
}

impl fmt::Display for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter().to_ascii_uppercase())
    }
}

impl FromStr for Bus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "a" | "A" => Ok(Bus::A),
            "b" | "B" => Ok(Bus::B),
            other => Err(format!("unknown bus '{}'", other)),
        }
    }
}

/// A (bus, index) pair addressing one sub-device behind the multiplexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelCoordinate {
    pub bus: Bus,
    pub index: u8,
}

impl ChannelCoordinate {
    pub fn new(bus: Bus, index: u8) -> Option<Self> {
        (index < CHANNELS_PER_BUS).then_some(Self { bus, index })
    }

    /// Canonical key used in scan results, e.g. `MUX_A_CH_3`.
    pub fn key(&self) -> String {
        format!("MUX_{}_CH_{}", self.bus, self.index)
    }
}

impl fmt::Display for ChannelCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.bus, self.index)
    }
}

/// Text commands understood by the board shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCommand {
    /// `sm <bus> <index>`
    SelectChannel(ChannelCoordinate),
    /// `er <addr> <len>`: pull the EEPROM into the board's buffer.
    ReadBuffer { address: u16, length: u16 },
    /// `hd <addr> <len>`: print the buffer as hex rows.
    HexDump { address: u16, length: u16 },
    /// Free-form text, used to check whether anything answers at all.
    Probe(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandKind {
    Select,
    Read,
    Dump,
    Probe,
}

impl DeviceCommand {
    pub fn kind(&self) -> CommandKind {
        match self {
            DeviceCommand::SelectChannel(_) => CommandKind::Select,
            DeviceCommand::ReadBuffer { .. } => CommandKind::Read,
            DeviceCommand::HexDump { .. } => CommandKind::Dump,
            DeviceCommand::Probe(_) => CommandKind::Probe,
        }
    }
}

impl fmt::Display for DeviceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceCommand::SelectChannel(ch) => write!(f, "sm {} {}", ch.bus.letter(), ch.index),
            DeviceCommand::ReadBuffer { address, length } => write!(f, "er {} {}", address, length),
            DeviceCommand::HexDump { address, length } => write!(f, "hd {} {}", address, length),
            DeviceCommand::Probe(text) => write!(f, "{}", text),
        }
    }
}

/// Line that the coordinator records for a sent command.
pub fn echo_line(command: &str) -> String {
    format!("> {}", command)
}

pub fn is_hex_row(line: &str) -> bool {
    HEX_ROW.is_match(line)
}

pub fn count_hex_rows<S: AsRef<str>>(lines: &[S]) -> usize {
    lines.iter().filter(|l| is_hex_row(l.as_ref())).count()
}

/// Shell prompt: a line ending in `>` or carrying a `$`.
pub fn is_prompt(line: &str) -> bool {
    let line = line.trim_end();
    !line.is_empty() && (line.ends_with('>') || line.contains('$'))
}

pub fn is_select_ack(line: &str) -> bool {
    !is_command_echo(line) && !FAILURE.is_match(line) && SELECT_ACK.is_match(line)
}

pub fn is_failure(line: &str) -> bool {
    !is_command_echo(line) && FAILURE.is_match(line)
}

/// A command as echoed into the transcript, optionally behind a shell prompt
/// (`> hd 0 128`, `eeprom> sm a 3`).
pub fn is_command_echo(line: &str) -> bool {
    COMMAND_ECHO.is_match(line)
}

pub fn is_dump_echo(line: &str) -> bool {
    DUMP_ECHO.is_match(line)
}

/// Channel named by a `> sm <bus> <index>` echo line.
pub fn parse_select_echo(line: &str) -> Option<ChannelCoordinate> {
    let caps = SELECT_ECHO.captures(line)?;
    let bus = caps.get(1)?.as_str().parse().ok()?;
    let index = caps.get(2)?.as_str().parse().ok()?;
    ChannelCoordinate::new(bus, index)
}
