//! Run configuration.
//!
//! Settings come from three layers, highest priority first: command-line
//! flags (which clap also fills from `PUZZLEBENCH_*` environment variables),
//! an optional TOML file, and built-in defaults. `RunConfig::resolve`
//! collapses the layers and rejects configurations that cannot work.

mod errors;

use std::path::{Path, PathBuf};

use serde::Deserialize;

pub use errors::ConfigError;

pub const DEFAULT_PIECE_SIZE: u32 = 16;
pub const DEFAULT_CANONICAL_SIDE: u32 = 224;
pub const DEFAULT_GLOBAL_SEED: u64 = 42;
pub const DEFAULT_LEDGER_FILE: &str = "results.csv";
pub const DEFAULT_SCRATCH_DIR: &str = "scratch";
pub const DEFAULT_PARTITION_TOOL: &str = "./generate_pieces";
pub const DEFAULT_SOLVER_TOOL: &str = "./solver";
/// Queue slots per worker when no capacity is configured.
pub const QUEUE_SLOTS_PER_WORKER: usize = 4;

/// One layer of optional settings, as found in a TOML file or on the CLI.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub directory: Option<PathBuf>,
    pub piece_size: Option<u32>,
    pub csv: Option<PathBuf>,
    pub seed: Option<u64>,
    pub workers: Option<usize>,
    pub scratch: Option<PathBuf>,
    pub partition_tool: Option<PathBuf>,
    pub solver_tool: Option<PathBuf>,
    pub canonical_side: Option<u32>,
    pub queue_capacity: Option<usize>,
    pub log_dir: Option<PathBuf>,
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::ParseToml {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Fill every unset field from `lower`.
    pub fn or(self, lower: Settings) -> Settings {
        Settings {
            directory: self.directory.or(lower.directory),
            piece_size: self.piece_size.or(lower.piece_size),
            csv: self.csv.or(lower.csv),
            seed: self.seed.or(lower.seed),
            workers: self.workers.or(lower.workers),
            scratch: self.scratch.or(lower.scratch),
            partition_tool: self.partition_tool.or(lower.partition_tool),
            solver_tool: self.solver_tool.or(lower.solver_tool),
            canonical_side: self.canonical_side.or(lower.canonical_side),
            queue_capacity: self.queue_capacity.or(lower.queue_capacity),
            log_dir: self.log_dir.or(lower.log_dir),
        }
    }
}

/// Fully resolved configuration for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub dataset_root: PathBuf,
    pub piece_size: u32,
    pub ledger_path: PathBuf,
    pub global_seed: u64,
    pub worker_count: usize,
    pub scratch_root: PathBuf,
    pub partition_tool: PathBuf,
    pub solver_tool: PathBuf,
    pub canonical_side: u32,
    pub queue_capacity: usize,
    pub log_dir: Option<PathBuf>,
}

impl RunConfig {
    /// Apply defaults to `settings` and validate the result.
    pub fn resolve(settings: Settings) -> Result<Self, ConfigError> {
        let dataset_root = settings
            .directory
            .ok_or(ConfigError::MissingDatasetRoot)?;
        let worker_count = settings.workers.unwrap_or_else(default_worker_count);
        let config = Self {
            dataset_root,
            piece_size: settings.piece_size.unwrap_or(DEFAULT_PIECE_SIZE),
            ledger_path: settings
                .csv
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LEDGER_FILE)),
            global_seed: settings.seed.unwrap_or(DEFAULT_GLOBAL_SEED),
            worker_count,
            scratch_root: settings
                .scratch
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SCRATCH_DIR)),
            partition_tool: settings
                .partition_tool
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PARTITION_TOOL)),
            solver_tool: settings
                .solver_tool
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SOLVER_TOOL)),
            canonical_side: settings.canonical_side.unwrap_or(DEFAULT_CANONICAL_SIDE),
            queue_capacity: settings
                .queue_capacity
                .unwrap_or(worker_count.saturating_mul(QUEUE_SLOTS_PER_WORKER)),
            log_dir: settings.log_dir,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.canonical_side == 0 {
            return Err(ConfigError::ZeroCanonicalSide);
        }
        if self.piece_size == 0 || self.canonical_side % self.piece_size != 0 {
            return Err(ConfigError::InvalidPieceSize {
                piece_size: self.piece_size,
                canonical_side: self.canonical_side,
            });
        }
        if self.worker_count == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }
        Ok(())
    }

    /// Pieces per side handed to the solver.
    pub fn piece_count(&self) -> u32 {
        self.canonical_side / self.piece_size
    }

    /// Scratch directory owned by one worker.
    pub fn scratch_dir(&self, worker_index: usize) -> PathBuf {
        self.scratch_root.join(worker_index.to_string())
    }
}

/// One worker per available core.
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
