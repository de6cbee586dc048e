pub mod orchestrator;
pub mod types;

pub use orchestrator::{run_diagnostic, run_scan};
pub use types::*;
