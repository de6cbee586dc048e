//! Command/response handling for the board shell.
//!
//! The protocol has no framing and no sequence numbers. A response is over
//! either when the transcript stops growing for a while or when the shell
//! prompt shows up again.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::time::Instant;

use super::pipeline::{self, SharedAssembler};
use super::protocol::{self, DeviceCommand};
use super::transcript::{Mark, Transcript};
use super::BoxedTransport;

/// How to decide that a command's response is complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStrategy {
    /// Done once the transcript length holds still for `quiet_polls`
    /// consecutive polls.
    Stability {
        poll_interval: Duration,
        quiet_polls: u32,
        timeout: Duration,
    },
    /// Done once a prompt appears among the last `window` lines produced
    /// since the command, or in the unterminated tail.
    Prompt { window: usize, timeout: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitOutcome {
    Settled,
    PromptSeen,
    TimedOut,
    /// The command never left the host.
    NotSent,
}

impl WaitOutcome {
    pub fn timed_out(&self) -> bool {
        matches!(self, WaitOutcome::TimedOut)
    }
}

impl WaitStrategy {
    pub async fn wait(&self, transcript: &Transcript, mark: Mark) -> WaitOutcome {
        match *self {
            WaitStrategy::Stability { poll_interval, quiet_polls, timeout } => {
                wait_for_stability(transcript, poll_interval, quiet_polls, timeout).await
            }
            WaitStrategy::Prompt { window, timeout } => {
                wait_for_prompt(transcript, mark, window, timeout).await
            }
        }
    }
}

pub async fn wait_for_stability(
    transcript: &Transcript,
    poll_interval: Duration,
    quiet_polls: u32,
    timeout: Duration,
) -> WaitOutcome {
    let deadline = Instant::now() + timeout;
    let mut last_len = transcript.len();
    let mut quiet = 0;

    loop {
        let now = Instant::now();
        if now >= deadline {
            return WaitOutcome::TimedOut;
        }
        tokio::time::sleep_until((now + poll_interval).min(deadline)).await;

        let len = transcript.len();
        if len == last_len {
            quiet += 1;
            if quiet >= quiet_polls {
                return WaitOutcome::Settled;
            }
        } else {
            quiet = 0;
            last_len = len;
        }
    }
}

pub async fn wait_for_prompt(
    transcript: &Transcript,
    mark: Mark,
    window: usize,
    timeout: Duration,
) -> WaitOutcome {
    let mut changes = transcript.subscribe();
    let deadline = Instant::now() + timeout;

    loop {
        changes.borrow_and_update();
        if prompt_visible(transcript, mark, window) {
            return WaitOutcome::PromptSeen;
        }
        match tokio::time::timeout_at(deadline, changes.changed()).await {
            Ok(Ok(())) => continue,
            Ok(Err(_)) | Err(_) => return WaitOutcome::TimedOut,
        }
    }
}

fn prompt_visible(transcript: &Transcript, mark: Mark, window: usize) -> bool {
    transcript
        .tail_since(mark.line, window)
        .iter()
        .any(|line| protocol::is_prompt(line))
        || transcript
            .fragment_since(mark)
            .map_or(false, |tail| protocol::is_prompt(&tail))
}

/// One command and the slice of transcript it produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub command: String,
    pub sent: bool,
    pub outcome: WaitOutcome,
    pub start: usize,
    pub end: usize,
}

impl Exchange {
    pub fn lines(&self, transcript: &Transcript) -> Vec<String> {
        transcript.range(self.start, self.end)
    }
}

/// Write side of a session. Commands go out strictly one at a time.
pub struct Coordinator {
    writer: Option<WriteHalf<BoxedTransport>>,
    assembler: SharedAssembler,
    transcript: Transcript,
    reader_alive: Arc<AtomicBool>,
    post_write_delay: Duration,
    echo_commands: bool,
}

impl Coordinator {
    pub(crate) fn new(
        writer: WriteHalf<BoxedTransport>,
        assembler: SharedAssembler,
        transcript: Transcript,
        reader_alive: Arc<AtomicBool>,
        post_write_delay: Duration,
    ) -> Self {
        Self {
            writer: Some(writer),
            assembler,
            transcript,
            reader_alive,
            post_write_delay,
            echo_commands: true,
        }
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn set_echo_commands(&mut self, echo: bool) {
        self.echo_commands = echo;
    }

    /// True while the write side exists and the read loop is still running.
    pub fn is_open(&self) -> bool {
        self.writer.is_some() && self.reader_alive.load(Ordering::SeqCst)
    }

    /// Write `command` plus a line terminator. Never raises: a missing or
    /// dead transport and write failures all come back as `false`.
    pub async fn send(&mut self, command: &str) -> bool {
        self.send_marked(command).await.is_some()
    }

    /// Like `send`, returning the transcript position the response starts at.
    async fn send_marked(&mut self, command: &str) -> Option<Mark> {
        if !self.reader_alive.load(Ordering::SeqCst) {
            log::warn!("Cannot send '{}': read loop has stopped", command);
            return None;
        }
        let Some(writer) = self.writer.as_mut() else {
            log::warn!("Cannot send '{}': no transport open", command);
            return None;
        };

        // The echo goes in before the write so it precedes the response.
        let echo = self.echo_commands.then(|| {
            pipeline::close_pending_prompt(&self.assembler, &self.transcript);
            self.transcript.push_line(protocol::echo_line(command))
        });
        let mark = self.transcript.mark();

        let line = format!("{}\n", command);
        let written = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        }
        .await;

        if let Err(e) = written {
            log::warn!("Failed to write '{}': {}", command, e);
            if let Some(index) = echo {
                self.transcript.remove_line(index);
            }
            return None;
        }
        log::debug!("Sent '{}'", command);

        tokio::time::sleep(self.post_write_delay).await;
        Some(mark)
    }

    /// Send a command and wait for its response to finish.
    pub async fn execute(&mut self, command: &DeviceCommand, strategy: &WaitStrategy) -> Exchange {
        let text = command.to_string();
        self.execute_raw(&text, strategy).await
    }

    pub async fn execute_raw(&mut self, command: &str, strategy: &WaitStrategy) -> Exchange {
        let Some(mark) = self.send_marked(command).await else {
            let end = self.transcript.len();
            return Exchange {
                command: command.to_string(),
                sent: false,
                outcome: WaitOutcome::NotSent,
                start: end,
                end,
            };
        };

        let outcome = strategy.wait(&self.transcript, mark).await;
        if outcome.timed_out() {
            log::debug!("'{}' timed out waiting for {:?}", command, strategy);
        }

        Exchange {
            command: command.to_string(),
            sent: true,
            outcome,
            start: mark.line,
            end: self.transcript.len(),
        }
    }

    pub(crate) fn take_writer(&mut self) -> Option<WriteHalf<BoxedTransport>> {
        self.writer.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROMPT: WaitStrategy = WaitStrategy::Prompt {
        window: 3,
        timeout: Duration::from_secs(2),
    };

    #[tokio::test(start_paused = true)]
    async fn stability_settles_after_quiet_polls() {
        let t = Transcript::new();
        let feed = t.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            for i in 0..4 {
                feed.push_line(format!("line {}", i));
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        });

        let started = Instant::now();
        let outcome = wait_for_stability(&t, Duration::from_millis(100), 3, Duration::from_secs(5)).await;
        assert_eq!(outcome, WaitOutcome::Settled);
        assert_eq!(t.len(), 4);
        // last line lands at 180ms; quiet polls at 300, 400 and 500
        assert_eq!(started.elapsed(), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn stability_gives_up_at_the_deadline() {
        let t = Transcript::new();
        let feed = t.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(40)).await;
                feed.push_line("00: 00 00 00 00 00 00 00 00 00");
            }
        });

        let started = Instant::now();
        let outcome = wait_for_stability(&t, Duration::from_millis(100), 3, Duration::from_millis(700)).await;
        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert_eq!(started.elapsed(), Duration::from_millis(700));
    }

    #[tokio::test(start_paused = true)]
    async fn prompt_wait_ignores_lines_before_the_mark() {
        let t = Transcript::from_lines(["eeprom>"]);
        let mark = t.mark();
        let feed = t.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            feed.push_line("OK");
            feed.push_line("eeprom>");
        });

        let started = Instant::now();
        assert_eq!(PROMPT.wait(&t, mark).await, WaitOutcome::PromptSeen);
        assert_eq!(started.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn prompt_in_unterminated_tail_completes() {
        let t = Transcript::new();
        t.set_fragment("> ".into());
        let mark = t.mark();
        let feed = t.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            feed.push_line("mux a 2 selected");
            feed.set_fragment("> ".into());
        });

        assert_eq!(PROMPT.wait(&t, mark).await, WaitOutcome::PromptSeen);
    }

    struct Wired {
        device: tokio::io::DuplexStream,
        coordinator: Coordinator,
        transcript: Transcript,
        _cancel: tokio::sync::oneshot::Sender<()>,
    }

    fn wired() -> Wired {
        let (host, device) = tokio::io::duplex(256);
        let transport: BoxedTransport = Box::new(host);
        let (reader, writer) = tokio::io::split(transport);
        let assembler = SharedAssembler::default();
        let transcript = Transcript::new();
        let alive = Arc::new(AtomicBool::new(true));
        let (cancel, cancel_rx) = tokio::sync::oneshot::channel();
        tokio::spawn(pipeline::read_loop(
            reader,
            assembler.clone(),
            transcript.clone(),
            cancel_rx,
            alive.clone(),
        ));
        let coordinator = Coordinator::new(writer, assembler, transcript.clone(), alive, Duration::ZERO);
        Wired {
            device,
            coordinator,
            transcript,
            _cancel: cancel,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn send_keeps_a_half_received_row_whole() {
        let Wired {
            mut device,
            mut coordinator,
            transcript,
            _cancel,
        } = wired();

        device.write_all(b"00: 70 72 6f 6d 6f").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(coordinator.send("hd 0 128").await);

        device
            .write_all(b" 74 6f 72 5f 61 00 00 00 00 00 00  promotor_a......\r\neeprom> ")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let lines = transcript.snapshot();
        assert_eq!(
            lines,
            vec![
                "> hd 0 128",
                "00: 70 72 6f 6d 6f 74 6f 72 5f 61 00 00 00 00 00 00  promotor_a......",
            ]
        );
        assert_eq!(protocol::count_hex_rows(&lines), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn send_closes_a_pending_prompt_before_the_echo() {
        let Wired {
            mut device,
            mut coordinator,
            transcript,
            _cancel,
        } = wired();

        device.write_all(b"OK\r\neeprom> ").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(coordinator.send("sm a 1").await);
        device.write_all(b"mux a 1 selected\r\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(transcript.snapshot(), vec!["OK", "eeprom>", "> sm a 1", "mux a 1 selected"]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_write_leaves_no_echo_behind() {
        let (host, device) = tokio::io::duplex(64);
        drop(device);
        let transport: BoxedTransport = Box::new(host);
        let (_reader, writer) = tokio::io::split(transport);
        let transcript = Transcript::from_lines(["eeprom>"]);
        let mut coordinator = Coordinator::new(
            writer,
            SharedAssembler::default(),
            transcript.clone(),
            Arc::new(AtomicBool::new(true)),
            Duration::ZERO,
        );

        let exchange = coordinator.execute_raw("sm a 0", &PROMPT).await;
        assert!(!exchange.sent);
        assert_eq!(exchange.outcome, WaitOutcome::NotSent);
        assert_eq!(transcript.snapshot(), vec!["eeprom>"]);
    }

    #[tokio::test(start_paused = true)]
    async fn prompt_outside_the_window_is_missed() {
        let t = Transcript::new();
        let mark = t.mark();
        t.push_line("$ ready");
        for _ in 0..3 {
            t.push_line("noise");
        }
        assert_eq!(PROMPT.wait(&t, mark).await, WaitOutcome::TimedOut);
    }
}
