//! QC-WAL: consensus write-ahead log operator tool
//!
//! Reads a WAL directory without taking the writer lock, so it is safe to
//! point at the directory of a running node.

mod report;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use qc_18_consensus_wal::domain::config::DEFAULT_MAX_RECORD_BYTES;
use qc_18_consensus_wal::WalConfig;

/// QC-WAL: inspect, verify and dump a consensus WAL directory
#[derive(Parser, Debug)]
#[command(name = "qc-wal")]
#[command(about = "Operator tool for the consensus write-ahead log")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List segments and count entries by kind
    Inspect(Source),
    /// Scan every frame; exit non-zero on corruption or malformed entries
    Verify(Source),
    /// Print decoded entries
    Dump {
        #[command(flatten)]
        source: Source,
        /// Global offset of the first frame to print
        #[arg(long, default_value = "0")]
        from: u64,
        /// One JSON object per line
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug)]
struct Source {
    /// WAL directory
    #[arg(short, long, required_unless_present = "config")]
    dir: Option<PathBuf>,

    /// JSON WAL configuration file (directory and limits are read from it)
    #[arg(short, long, conflicts_with = "dir")]
    config: Option<PathBuf>,

    /// Largest frame body accepted while scanning
    #[arg(long, conflicts_with = "config")]
    max_record_bytes: Option<usize>,
}

/// Where to read and with which limits.
pub struct Target {
    pub dir: PathBuf,
    pub max_record_bytes: usize,
}

impl Source {
    fn resolve(self) -> Result<Target> {
        if let Some(path) = self.config {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config {}", path.display()))?;
            let config: WalConfig = serde_json::from_str(&raw)
                .with_context(|| format!("parsing config {}", path.display()))?;
            config.validate()?;
            return Ok(Target {
                dir: config.dir,
                max_record_bytes: config.max_record_bytes,
            });
        }
        let dir = self.dir.context("either --dir or --config is required")?;
        Ok(Target {
            dir,
            max_record_bytes: self.max_record_bytes.unwrap_or(DEFAULT_MAX_RECORD_BYTES),
        })
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match run(Cli::parse()) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::from(2)
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let mut out = std::io::stdout().lock();
    match cli.command {
        Command::Inspect(source) => {
            let target = source.resolve()?;
            let inspection = report::inspect(&target)?;
            report::write_inspection(&mut out, &inspection)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Verify(source) => {
            let target = source.resolve()?;
            let verdict = report::verify(&target)?;
            report::write_verdict(&mut out, &verdict)?;
            Ok(if verdict.is_healthy() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Dump { source, from, json } => {
            let target = source.resolve()?;
            report::dump(&target, from, json, &mut out)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
