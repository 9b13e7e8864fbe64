use std::path::PathBuf;

use thiserror::Error;

/// Errors that may occur while loading or validating run configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a config file.
    #[error("Failed to read {path}: {source}")]
    Read {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },
    /// Failed to parse TOML config.
    #[error("Invalid config at {path}: {source}")]
    ParseToml {
        /// TOML file path.
        path: PathBuf,
        /// TOML parse error.
        source: toml::de::Error,
    },
    /// Neither the command line nor the config file named a dataset.
    #[error("No dataset directory given (use --directory or set `directory` in the config file)")]
    MissingDatasetRoot,
    /// Piece size is zero or leaves a remainder.
    #[error("Piece size {piece_size} must be non-zero and evenly divide the canonical side {canonical_side}")]
    InvalidPieceSize {
        piece_size: u32,
        canonical_side: u32,
    },
    #[error("Canonical side must be greater than zero")]
    ZeroCanonicalSide,
    #[error("Worker count must be at least 1")]
    ZeroWorkers,
    #[error("Queue capacity must be at least 1")]
    ZeroQueueCapacity,
}
