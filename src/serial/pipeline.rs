//! Line reconstruction for the board's text stream.
//!
//! The firmware writes whatever it has whenever it has it, so a single hex-dump
//! row can arrive split over several reads. Nothing is emitted until its
//! terminator has been seen.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::oneshot;

use super::protocol;
use super::transcript::Transcript;

const LINE_TERMINATOR: u8 = b'\n';
const READ_CHUNK: usize = 512;

/// Splits an arbitrarily chunked byte stream into complete lines.
#[derive(Debug, Default, Clone)]
pub struct LineAssembler {
    residual: Vec<u8>,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed, trimmed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.residual.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(pos) = self.residual[start..].iter().position(|b| *b == LINE_TERMINATOR) {
            let end = start + pos;
            lines.push(decode_line(&self.residual[start..end]));
            start = end + 1;
        }
        self.residual.drain(..start);
        lines
    }

    pub fn push_str(&mut self, chunk: &str) -> Vec<String> {
        self.push(chunk.as_bytes())
    }

    /// Bytes received since the last terminator, decoded.
    pub fn residual(&self) -> String {
        String::from_utf8_lossy(&self.residual).into_owned()
    }

    pub fn has_residual(&self) -> bool {
        !self.residual.is_empty()
    }

    /// Emit the unterminated tail as a final line. Used when the stream closes.
    pub fn flush(&mut self) -> Option<String> {
        if self.residual.is_empty() {
            return None;
        }
        let line = decode_line(&self.residual);
        self.residual.clear();
        Some(line)
    }
}

fn decode_line(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_string()
}

/// Assembler shared by the read loop and the write side of a session.
pub(crate) type SharedAssembler = Arc<Mutex<LineAssembler>>;

/// Move the unterminated tail into the line log. Used when the stream closes.
pub(crate) fn close_pending_line(assembler: &SharedAssembler, transcript: &Transcript) {
    let mut asm = assembler.lock();
    flush_into(&mut asm, transcript);
}

/// Close the unterminated tail only when it is a shell prompt. Called when the
/// host starts a new command line, so the prompt does not run into the
/// response. Any other partial line stays pending until its terminator.
pub(crate) fn close_pending_prompt(assembler: &SharedAssembler, transcript: &Transcript) {
    let mut asm = assembler.lock();
    if protocol::is_prompt(&asm.residual()) {
        flush_into(&mut asm, transcript);
    }
}

fn flush_into(asm: &mut LineAssembler, transcript: &Transcript) {
    if let Some(line) = asm.flush() {
        if !line.is_empty() {
            transcript.push_line(line);
        }
        transcript.set_fragment(String::new());
    }
}

fn feed(assembler: &SharedAssembler, transcript: &Transcript, chunk: &[u8]) {
    let mut asm = assembler.lock();
    for line in asm.push(chunk) {
        if !line.is_empty() {
            transcript.push_line(line);
        }
    }
    transcript.set_fragment(asm.residual());
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReaderExit {
    Cancelled,
    EndOfStream,
    ReadError,
}

/// Continuous read loop for one session. Runs until cancelled or the stream
/// ends, then hands the read half back so the port can be reassembled and
/// closed.
pub(crate) async fn read_loop<R>(
    mut reader: R,
    assembler: SharedAssembler,
    transcript: Transcript,
    mut cancel: oneshot::Receiver<()>,
    alive: Arc<AtomicBool>,
) -> (R, ReaderExit)
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; READ_CHUNK];

    let exit = loop {
        tokio::select! {
            _ = &mut cancel => {
                log::debug!("Read loop cancelled");
                break ReaderExit::Cancelled;
            }
            read_res = reader.read(&mut buf) => {
                match read_res {
                    Ok(0) => {
                        log::info!("Serial stream ended");
                        break ReaderExit::EndOfStream;
                    }
                    Ok(n) => feed(&assembler, &transcript, &buf[..n]),
                    Err(e) => {
                        log::warn!("Serial read failed, stopping read loop: {}", e);
                        break ReaderExit::ReadError;
                    }
                }
            }
        }
    };

    close_pending_line(&assembler, &transcript);
    alive.store(false, Ordering::SeqCst);

    (reader, exit)
}
