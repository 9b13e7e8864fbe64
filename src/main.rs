//! Command-line entry point for puzzlebench.

use std::{path::PathBuf, process::ExitCode, sync::Arc};

use clap::Parser;
use puzzlebench::config::{ConfigError, RunConfig, Settings};
use puzzlebench::logging;
use puzzlebench::pipeline::Pipeline;
use puzzlebench::shutdown::{self, ShutdownPhase, ShutdownState};
use puzzlebench::worker::ExternalTools;

const EXIT_FAILURE: u8 = 1;
const EXIT_INTERRUPTED: u8 = 130;

/// Benchmark a jigsaw solver over an image dataset, resuming from a CSV ledger.
#[derive(Debug, Parser)]
#[command(name = "puzzlebench", version, about)]
struct Cli {
    /// Root of the image dataset.
    #[arg(long)]
    directory: Option<PathBuf>,
    /// Side length of a square piece in pixels.
    #[arg(long, alias = "piece_size")]
    piece_size: Option<u32>,
    /// Results ledger (CSV), created if missing.
    #[arg(long)]
    csv: Option<PathBuf>,
    /// Global seed for ordering and per-item seeds.
    #[arg(long)]
    seed: Option<u64>,
    /// Number of worker threads.
    #[arg(long, env = "PUZZLEBENCH_WORKERS")]
    workers: Option<usize>,
    /// Optional TOML file with the same keys as these flags.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Parent directory for per-worker scratch folders.
    #[arg(long)]
    scratch: Option<PathBuf>,
    /// Partition executable.
    #[arg(long)]
    partition_tool: Option<PathBuf>,
    /// Solver executable.
    #[arg(long)]
    solver_tool: Option<PathBuf>,
    /// Side length images are normalized to.
    #[arg(long)]
    canonical_side: Option<u32>,
    /// Maximum number of queued items.
    #[arg(long)]
    queue_capacity: Option<usize>,
    /// Directory for log files.
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

impl Cli {
    fn settings(&self) -> Settings {
        Settings {
            directory: self.directory.clone(),
            piece_size: self.piece_size,
            csv: self.csv.clone(),
            seed: self.seed,
            workers: self.workers,
            scratch: self.scratch.clone(),
            partition_tool: self.partition_tool.clone(),
            solver_tool: self.solver_tool.clone(),
            canonical_side: self.canonical_side,
            queue_capacity: self.queue_capacity,
            log_dir: self.log_dir.clone(),
        }
    }

    fn resolve(&self) -> Result<RunConfig, ConfigError> {
        let file = match &self.config {
            Some(path) => Settings::load(path)?,
            None => Settings::default(),
        };
        RunConfig::resolve(self.settings().or(file))
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match cli.resolve() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Invalid configuration: {err}");
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    if let Err(err) = logging::init(config.log_dir.as_deref()) {
        eprintln!("Logging disabled: {err}");
    }

    let state = ShutdownState::shared();
    if let Err(err) = shutdown::install_signal_handlers(Arc::clone(&state)) {
        tracing::warn!("Interrupt handling unavailable: {err}");
    }

    let tools = Arc::new(ExternalTools::new(
        config.partition_tool.clone(),
        config.solver_tool.clone(),
    ));
    let pipeline = Pipeline::new(config, tools, Arc::clone(&state));
    match pipeline.run() {
        Ok(summary) if summary.shutdown == ShutdownPhase::Running => ExitCode::SUCCESS,
        Ok(_) => ExitCode::from(EXIT_INTERRUPTED),
        Err(err) => {
            tracing::error!("Run failed: {err}");
            eprintln!("Run failed: {err}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}
