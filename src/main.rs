//! board-probe - discover the modules plugged into a multiplexed cell board

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use board_probe_lib::commands::{self, ProbeRequest, ScanRequest};
use board_probe_lib::{ConnectionManager, HexDumpInterpreter, ScannerConfig};

#[derive(Parser)]
#[command(name = "board-probe")]
#[command(author, version, about = "Scan a cell board over its serial console")]
struct Cli {
    /// Scanner configuration file (JSON)
    #[arg(short, long, env = "BOARD_PROBE_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List serial ports
    Ports,

    /// Sweep every channel and print the scan result
    Scan {
        /// Serial port; picks the first USB port when omitted
        #[arg(short, long)]
        port: Option<String>,

        /// Also write the raw transcript to this file
        #[arg(short, long)]
        transcript: Option<PathBuf>,
    },

    /// Run the reduced diagnostic sweep
    Diagnose {
        #[arg(short, long)]
        port: Option<String>,
    },

    /// Analyze a transcript saved by `scan --transcript`
    Analyze {
        file: PathBuf,
    },

    /// Send free-form text and print the reply
    Probe {
        #[arg(short, long)]
        port: Option<String>,

        text: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config = match &cli.config {
        Some(path) => ScannerConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ScannerConfig::default(),
    };

    match cli.command {
        Commands::Ports => {
            let manager = ConnectionManager::new(config);
            let ports = commands::list_ports(&manager).await.map_err(|e| anyhow!(e))?;
            if ports.is_empty() {
                eprintln!("No serial ports found");
            }
            print_json(&ports)?;
        }
        Commands::Scan { port, transcript } => {
            let manager = ConnectionManager::new(config);
            let response = commands::scan_board(&manager, ScanRequest { port }, Arc::new(HexDumpInterpreter)).await;
            manager.disconnect().await;
            let response = response.map_err(|e| anyhow!(e))?;

            if let Some(path) = transcript {
                save_transcript(&path, &response.transcript)?;
            }
            print_json(&response)?;
        }
        Commands::Diagnose { port } => {
            let manager = ConnectionManager::new(config);
            let outcome = commands::run_diagnostics(&manager, ScanRequest { port }).await;
            manager.disconnect().await;
            print_json(&outcome.map_err(|e| anyhow!(e))?)?;
        }
        Commands::Analyze { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read transcript {}", file.display()))?;
            let lines: Vec<String> = raw.lines().map(str::to_string).collect();
            print_json(&commands::analyze_transcript(&lines, &HexDumpInterpreter))?;
        }
        Commands::Probe { port, text } => {
            let manager = ConnectionManager::new(config);
            let response = commands::probe(&manager, ProbeRequest { port, text }).await;
            manager.disconnect().await;
            print_json(&response.map_err(|e| anyhow!(e))?)?;
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", json);
    Ok(())
}

fn save_transcript(path: &Path, lines: &[String]) -> Result<()> {
    let mut body = lines.join("\n");
    body.push('\n');
    std::fs::write(path, body).with_context(|| format!("Failed to write transcript to {}", path.display()))?;
    log::info!("Transcript saved to {}", path.display());
    Ok(())
}
