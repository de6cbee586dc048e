//! Request/response entry points for a presentation layer. Every function
//! reports failures as a readable message that includes a remediation hint.
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::device::{ConnError, ConnectionManager, ConnectionState, SessionInfo, TeardownReport};
use crate::diagnostics::{self, DiagnosticReport};
use crate::interpret::{InterpretedBoard, TranscriptInterpreter};
use crate::scan::{DiagnosticOutcome, ScanResult};
use crate::serial::protocol::DeviceCommand;
use crate::serial::{PortSelection, SerialDeviceInfo, WaitOutcome};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanRequest {
    /// Explicit port, or `None` to pick the board automatically.
    pub port: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResponse {
    pub session: SessionInfo,
    pub result: ScanResult,
    pub diagnosis: DiagnosticReport,
    pub transcript: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeRequest {
    pub port: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResponse {
    pub command: String,
    pub sent: bool,
    pub outcome: WaitOutcome,
    pub reply: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResponse {
    pub report: DiagnosticReport,
    pub board: InterpretedBoard,
}

fn describe(action: &str, e: ConnError) -> String {
    format!("Failed to {}: {}. {}", action, e, e.remediation_hint())
}

/// List serial ports that could carry the board
pub async fn list_ports(manager: &ConnectionManager) -> Result<Vec<SerialDeviceInfo>, String> {
    manager
        .list_ports()
        .await
        .map_err(|e| describe("list serial ports", e))
}

pub async fn connect_device(manager: &ConnectionManager, port: Option<String>) -> Result<SessionInfo, String> {
    manager
        .connect(PortSelection::from_option(port))
        .await
        .map_err(|e| describe("connect to board", e))
}

/// Close the current session. Teardown problems are reported, not raised.
pub async fn disconnect_device(manager: &ConnectionManager) -> Result<Option<TeardownReport>, String> {
    Ok(manager.disconnect().await)
}

pub async fn get_connection_state(manager: &ConnectionManager) -> Result<ConnectionState, String> {
    Ok(manager.state().await)
}

/// Connect if needed, sweep the board, and return the result together with
/// the transcript it came from.
pub async fn scan_board(
    manager: &ConnectionManager,
    request: ScanRequest,
    interpreter: Arc<dyn TranscriptInterpreter>,
) -> Result<ScanResponse, String> {
    let session = manager
        .ensure_connected(PortSelection::from_option(request.port))
        .await
        .map_err(|e| describe("connect to board", e))?;

    let outcome = manager
        .scan(interpreter)
        .await
        .map_err(|e| describe("scan board", e))?;

    Ok(ScanResponse {
        session,
        result: outcome.result,
        diagnosis: outcome.diagnosis,
        transcript: outcome.transcript,
    })
}

pub async fn run_diagnostics(manager: &ConnectionManager, request: ScanRequest) -> Result<DiagnosticOutcome, String> {
    manager
        .ensure_connected(PortSelection::from_option(request.port))
        .await
        .map_err(|e| describe("connect to board", e))?;

    manager
        .diagnose()
        .await
        .map_err(|e| describe("run diagnostics", e))
}

/// Send free-form text and collect whatever comes back until the line log
/// goes quiet.
pub async fn probe(manager: &ConnectionManager, request: ProbeRequest) -> Result<ProbeResponse, String> {
    let text = request.text.trim().to_string();
    if text.is_empty() {
        return Err("Probe text is empty".to_string());
    }

    manager
        .ensure_connected(PortSelection::from_option(request.port))
        .await
        .map_err(|e| describe("connect to board", e))?;

    let strategy = manager.config().timing.stability_wait();
    manager
        .execute_with_session(|session| {
            Box::pin(async move {
                session.transcript().clear();
                let exchange = session
                    .coordinator()
                    .execute(&DeviceCommand::Probe(text), &strategy)
                    .await;
                ProbeResponse {
                    reply: exchange.lines(session.transcript()),
                    command: exchange.command,
                    sent: exchange.sent,
                    outcome: exchange.outcome,
                }
            })
        })
        .await
        .map_err(|e| describe("probe board", e))
}

/// Diagnose and interpret a transcript captured earlier. Needs no hardware.
pub fn analyze_transcript(lines: &[String], interpreter: &dyn TranscriptInterpreter) -> AnalysisResponse {
    AnalysisResponse {
        report: diagnostics::analyze(lines),
        board: interpreter.interpret(lines),
    }
}
