//! Address-space sweep over the multiplexed buses.
//!
//! Every channel goes through the same three commands: select, read the
//! EEPROM into the board's buffer, dump the buffer. The board gives no status
//! codes, so each step is judged from the lines it produced.
use std::collections::BTreeMap;

use chrono::Utc;

use super::types::{ChannelReport, DiagnosticOutcome, ScanOutcome, ScanResult, ScanStats};
use crate::config::{RetryScope, ScannerConfig, TimingConfig};
use crate::device::Session;
use crate::diagnostics;
use crate::interpret::TranscriptInterpreter;
use crate::serial::protocol::{self, ChannelCoordinate, CommandKind, DeviceCommand};
use crate::serial::{Coordinator, Transcript, WaitStrategy};

/// Per-sweep parameters shared by full scans and diagnostic runs.
struct SweepPlan {
    buffer_address: u16,
    buffer_length: u16,
    read_wait: WaitStrategy,
    /// `None` disables the second dump attempt.
    retry: Option<RetryScope>,
}

/// Sweep every configured channel, then interpret and diagnose the
/// transcript. A channel that does not answer is recorded and skipped.
pub async fn run_scan(
    session: &mut Session,
    config: &ScannerConfig,
    interpreter: &dyn TranscriptInterpreter,
) -> ScanOutcome {
    let started_at = Utc::now();
    let transcript = session.transcript().clone();
    transcript.clear();

    let plan = SweepPlan {
        buffer_address: config.scan.buffer_address,
        buffer_length: config.scan.buffer_length,
        read_wait: config.timing.strategy_for(CommandKind::Read),
        retry: Some(config.scan.retry_scope),
    };
    let channels = config.scan.channels();
    log::info!("Starting board scan on {} ({} channels)", session.info().port_name, channels.len());

    let (channel_reports, mut stats) =
        sweep(session.coordinator(), &transcript, &channels, &plan, &config.timing).await;

    let lines = transcript.snapshot();
    let interpreted = interpreter.interpret(&lines);
    let diagnosis = diagnostics::analyze(&lines);

    stats.failed_reads = interpreted.stats.failed_reads;
    stats.channels_with_data = interpreted.stats.successful_channels;
    stats.component_count = interpreted.component_count();

    log::info!(
        "Scan finished: {}/{} selects, {}/{} dumps with data, {} retries, {} components; {}",
        stats.select_successes,
        stats.select_attempts,
        stats.dump_successes,
        stats.dump_attempts,
        stats.dump_retries,
        stats.component_count,
        diagnosis.classification
    );

    ScanOutcome {
        result: ScanResult {
            channel_data: interpreted.channel_data,
            channels: channel_reports,
            stats,
            started_at,
            finished_at: Utc::now(),
        },
        transcript: lines,
        diagnosis,
    }
}

/// Reduced sweep for troubleshooting: a handful of channels, a longer buffer
/// read, and a single dump with no retry.
pub async fn run_diagnostic(session: &mut Session, config: &ScannerConfig) -> DiagnosticOutcome {
    let started_at = Utc::now();
    let transcript = session.transcript().clone();
    transcript.clear();

    let plan = SweepPlan {
        buffer_address: config.diagnostic.buffer_address,
        buffer_length: config.diagnostic.buffer_length,
        read_wait: config.timing.diagnostic_read_wait(),
        retry: None,
    };
    let channels = &config.diagnostic.channels;
    log::info!("Starting diagnostic run on {} ({} channels)", session.info().port_name, channels.len());

    let (channel_reports, _) =
        sweep(session.coordinator(), &transcript, channels, &plan, &config.timing).await;

    let lines = transcript.snapshot();
    let report = diagnostics::analyze(&lines);
    log::info!("Diagnostic result: {}", report.classification);

    DiagnosticOutcome {
        channels: channel_reports,
        report,
        transcript: lines,
        started_at,
        finished_at: Utc::now(),
    }
}

async fn sweep(
    coordinator: &mut Coordinator,
    transcript: &Transcript,
    channels: &[ChannelCoordinate],
    plan: &SweepPlan,
    timing: &TimingConfig,
) -> (BTreeMap<String, ChannelReport>, ScanStats) {
    let mut reports = BTreeMap::new();
    let mut stats = ScanStats::default();

    for (i, channel) in channels.iter().enumerate() {
        let report = scan_channel(coordinator, transcript, *channel, plan, timing).await;
        stats.record(&report);
        reports.insert(report.key.clone(), report);

        if i + 1 < channels.len() {
            tokio::time::sleep(timing.channel_settle()).await;
        }
    }
    (reports, stats)
}

async fn scan_channel(
    coordinator: &mut Coordinator,
    transcript: &Transcript,
    channel: ChannelCoordinate,
    plan: &SweepPlan,
    timing: &TimingConfig,
) -> ChannelReport {
    let mut report = ChannelReport::new(channel);

    let select = coordinator
        .execute(&DeviceCommand::SelectChannel(channel), &timing.strategy_for(CommandKind::Select))
        .await;
    report.select_outcome = select.outcome;
    if !select.sent {
        return abandon(report, "select was not sent");
    }
    let failed = transcript
        .tail_since(select.start, timing.failure_window)
        .iter()
        .any(|line| protocol::is_failure(line));
    if failed {
        return abandon(report, "multiplexer reported a failure");
    }
    report.selected = true;

    let read = coordinator
        .execute(
            &DeviceCommand::ReadBuffer {
                address: plan.buffer_address,
                length: plan.buffer_length,
            },
            &plan.read_wait,
        )
        .await;
    report.read_outcome = Some(read.outcome);
    if !read.sent {
        return abandon(report, "buffer read was not sent");
    }

    let dump_command = DeviceCommand::HexDump {
        address: plan.buffer_address,
        length: plan.buffer_length,
    };
    let dump_wait = timing.strategy_for(CommandKind::Dump);

    let mut dump = coordinator.execute(&dump_command, &dump_wait).await;
    report.dump_attempts = 1;
    if !dump.sent {
        return abandon(report, "hex dump was not sent");
    }

    if let Some(scope) = plan.retry {
        if !dump_produced_data(transcript, dump.start, scope) {
            log::info!("{}: dump returned no data, retrying once", report.key);
            tokio::time::sleep(timing.dump_retry_delay()).await;
            dump = coordinator.execute(&dump_command, &dump_wait).await;
            report.dump_attempts += 1;
            report.dump_retries = 1;
        }
    }

    report.hex_rows = dump
        .lines(transcript)
        .into_iter()
        .filter(|line| protocol::is_hex_row(line))
        .collect();
    if report.has_data() {
        log::debug!("{}: {} hex rows", report.key, report.hex_rows.len());
    } else {
        log::info!("{}: no data", report.key);
    }
    report
}

fn dump_produced_data(transcript: &Transcript, start: usize, scope: RetryScope) -> bool {
    let lines = match scope {
        RetryScope::SinceCommand => transcript.since(start),
        RetryScope::WholeTranscript => transcript.snapshot(),
    };
    protocol::count_hex_rows(&lines) > 0
}

fn abandon(mut report: ChannelReport, reason: &str) -> ChannelReport {
    log::warn!("{}: abandoning channel, {}", report.key, reason);
    report.abandoned = Some(reason.to_string());
    report
}
