//! Turns hex-dump rows in a transcript into component identifiers per channel.
use std::collections::{BTreeMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::serial::protocol;

static DUMP_ROW: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([0-9A-Fa-f]{2,4}):\s*(.+)").unwrap());

/// Where the byte columns end and the ASCII gutter begins.
static GUTTER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s{3,}|\.{3,}").unwrap());

/// Leftmost-first alternation: longer names are listed before the short
/// fragments they contain, so `promoter_a` never also yields `omo` or `r_a`.
/// Matching each name pattern separately would report those overlapping
/// fragments too, grouped by pattern. Here every match is reported once,
/// in the order it appears in the dump.
static COMPONENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"promotor_[a-f]|promoter_[a-f]|rbs_[a-h]|cds_[a-h]|terminator_[a-f]|r_[ab]|omo|termi").unwrap()
});

/// Line the board prints when a buffer read gets no answer.
const FAILED_READ: &str = "fail";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterpretStats {
    /// Dump rows plus failed reads seen after a channel select.
    pub total_scans: usize,
    pub failed_reads: usize,
    pub successful_channels: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterpretedBoard {
    /// Component identifiers per channel key, in first-seen order.
    pub channel_data: BTreeMap<String, Vec<String>>,
    pub stats: InterpretStats,
}

impl InterpretedBoard {
    pub fn component_count(&self) -> usize {
        self.channel_data.values().map(Vec::len).sum()
    }
}

/// Parser collaborator that receives the finished transcript of a sweep.
pub trait TranscriptInterpreter: Send + Sync {
    fn interpret(&self, lines: &[String]) -> InterpretedBoard;
}

/// Reads EEPROM contents out of `hd` rows and matches known part names.
#[derive(Debug, Clone, Copy, Default)]
pub struct HexDumpInterpreter;

impl TranscriptInterpreter for HexDumpInterpreter {
    fn interpret(&self, lines: &[String]) -> InterpretedBoard {
        let mut stats = InterpretStats::default();
        let mut bytes_by_channel: BTreeMap<String, Vec<u8>> = BTreeMap::new();
        let mut current: Option<String> = None;

        for line in lines.iter().map(|l| l.trim()) {
            if let Some(channel) = protocol::parse_select_echo(line) {
                let key = channel.key();
                bytes_by_channel.entry(key.clone()).or_default();
                current = Some(key);
                continue;
            }
            let Some(key) = current.as_ref() else {
                continue;
            };

            if line == FAILED_READ {
                stats.failed_reads += 1;
                stats.total_scans += 1;
                continue;
            }

            if let Some(row) = row_bytes(line) {
                stats.total_scans += 1;
                bytes_by_channel.entry(key.clone()).or_default().extend(row);
            }
        }

        let channel_data: BTreeMap<String, Vec<String>> = bytes_by_channel
            .into_iter()
            .filter_map(|(key, bytes)| {
                let components = extract_components(&decode_ascii(&bytes));
                if components.is_empty() {
                    None
                } else {
                    log::debug!("{}: {:?}", key, components);
                    Some((key, components))
                }
            })
            .collect();

        stats.successful_channels = channel_data.len();
        log::info!(
            "Interpreted transcript: {} channels with data, {} failed reads, {} total scans",
            stats.successful_channels,
            stats.failed_reads,
            stats.total_scans
        );

        InterpretedBoard { channel_data, stats }
    }
}

/// Byte columns of an address-prefixed row, ignoring the ASCII gutter.
/// `None` when the line is not a row or carries no byte columns.
fn row_bytes(line: &str) -> Option<Vec<u8>> {
    let caps = DUMP_ROW.captures(line)?;
    let body = caps.get(2)?.as_str();
    let columns = GUTTER.split(body).next().unwrap_or_default();

    let tokens: String = columns
        .split_whitespace()
        .take_while(|t| t.len() == 2 && t.chars().all(|c| c.is_ascii_hexdigit()))
        .collect();
    if tokens.is_empty() {
        return None;
    }
    hex::decode(tokens).ok()
}

/// Printable bytes are kept. NULs before the first printable byte are
/// dropped, later ones and any other byte become a space.
fn decode_ascii(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    let mut started = false;
    for &b in bytes {
        match b {
            0x20..=0x7e => {
                out.push(b as char);
                started = true;
            }
            0 if !started => {}
            _ => out.push(' '),
        }
    }
    out
}

fn extract_components(text: &str) -> Vec<String> {
    let compact: String = text
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect::<String>()
        .to_ascii_lowercase();

    let mut seen = HashSet::new();
    COMPONENT
        .find_iter(&compact)
        .map(|m| m.as_str().replacen("promotor_", "promoter_", 1))
        .filter(|name| seen.insert(name.clone()))
        .collect()
}
