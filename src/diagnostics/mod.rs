pub mod analyzer;

pub use analyzer::{analyze, DiagnosticReport, FailureClass};
