use serde::{Deserialize, Serialize};

use crate::serial::protocol;

/// Overall verdict for a transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureClass {
    NoHardwareDetected,
    NoDeviceResponse,
    PartialOrIntermittent,
    Healthy,
}

const REMEDIATION: [(FailureClass, &[&str]); 4] = [
    (
        FailureClass::NoHardwareDetected,
        &[
            "Check that the board is powered and the USB cable carries data.",
            "Make sure the right serial port is selected.",
            "Reset the board and reconnect; opening the port reboots it.",
        ],
    ),
    (
        FailureClass::NoDeviceResponse,
        &[
            "The multiplexer answers but no module returned data.",
            "Check that modules are seated firmly in their slots.",
            "Inspect the module EEPROMs and the I2C pull-ups on the shared bus.",
        ],
    ),
    (
        FailureClass::PartialOrIntermittent,
        &[
            "Some channels answered and some did not.",
            "Reseat the modules on the failing channels and rescan.",
            "Increase the prompt and read timeouts if the board is slow to respond.",
        ],
    ),
    (FailureClass::Healthy, &["All selects were acknowledged and every dump returned data."]),
];

impl FailureClass {
    pub fn remediation_hints(&self) -> &'static [&'static str] {
        REMEDIATION
            .iter()
            .find(|(class, _)| class == self)
            .map(|(_, hints)| *hints)
            .unwrap_or(&[])
    }
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            FailureClass::NoHardwareDetected => "no hardware detected",
            FailureClass::NoDeviceResponse => "no device response",
            FailureClass::PartialOrIntermittent => "partial or intermittent",
            FailureClass::Healthy => "healthy",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticReport {
    pub select_attempts: usize,
    pub select_successes: usize,
    pub dump_attempts: usize,
    pub dump_successes: usize,
    pub hex_rows: usize,
    pub classification: FailureClass,
    pub hints: Vec<String>,
}

/// Which command the lines being walked belong to.
enum Owner {
    Nothing,
    Select { acknowledged: bool },
    Dump { rows: usize },
    Other,
}

#[derive(Default)]
struct Tally {
    select_attempts: usize,
    select_successes: usize,
    dump_attempts: usize,
    dump_successes: usize,
    hex_rows: usize,
}

impl Tally {
    fn close(&mut self, owner: &Owner) {
        if let Owner::Dump { rows } = owner {
            if *rows > 0 {
                self.dump_successes += 1;
            }
        }
    }
}

/// Count selects and dumps in a transcript and classify the outcome. Pure:
/// the same transcript always gives the same report.
pub fn analyze<S: AsRef<str>>(lines: &[S]) -> DiagnosticReport {
    let mut tally = Tally::default();
    let mut owner = Owner::Nothing;

    for line in lines.iter().map(AsRef::as_ref) {
        if protocol::is_command_echo(line) {
            tally.close(&owner);
            owner = if protocol::parse_select_echo(line).is_some() {
                tally.select_attempts += 1;
                Owner::Select { acknowledged: false }
            } else if protocol::is_dump_echo(line) {
                tally.dump_attempts += 1;
                Owner::Dump { rows: 0 }
            } else {
                Owner::Other
            };
            continue;
        }

        if protocol::is_hex_row(line) {
            tally.hex_rows += 1;
            if let Owner::Dump { rows } = &mut owner {
                *rows += 1;
            }
        } else if let Owner::Select { acknowledged } = &mut owner {
            if !*acknowledged && protocol::is_select_ack(line) {
                *acknowledged = true;
                tally.select_successes += 1;
            }
        }
    }
    tally.close(&owner);

    let classification = classify(&tally);
    DiagnosticReport {
        select_attempts: tally.select_attempts,
        select_successes: tally.select_successes,
        dump_attempts: tally.dump_attempts,
        dump_successes: tally.dump_successes,
        hex_rows: tally.hex_rows,
        classification,
        hints: classification.remediation_hints().iter().map(|h| h.to_string()).collect(),
    }
}

fn classify(tally: &Tally) -> FailureClass {
    if tally.select_successes == 0 {
        FailureClass::NoHardwareDetected
    } else if tally.dump_successes == 0 {
        FailureClass::NoDeviceResponse
    } else if tally.select_successes == tally.select_attempts && tally.dump_successes == tally.dump_attempts {
        FailureClass::Healthy
    } else {
        FailureClass::PartialOrIntermittent
    }
}
