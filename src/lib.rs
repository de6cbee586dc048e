pub mod commands;
pub mod config;
pub mod device;
pub mod diagnostics;
pub mod interpret;
pub mod scan;
pub mod serial;

pub use config::ScannerConfig;
pub use device::{ConnError, ConnectionManager, Session};
pub use diagnostics::{analyze, DiagnosticReport, FailureClass};
pub use interpret::{HexDumpInterpreter, InterpretedBoard, TranscriptInterpreter};
pub use scan::{ScanOutcome, ScanResult};
