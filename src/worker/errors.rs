use std::path::PathBuf;

use thiserror::Error;

use crate::ledger::LedgerError;

/// Failures of one external tool invocation.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Failed to launch {program}: {source}")]
    Spawn {
        program: PathBuf,
        source: std::io::Error,
    },
    #[error("{program} exited unsuccessfully ({status})")]
    Failed { program: PathBuf, status: String },
    #[error("{program} was killed by a forced shutdown")]
    Killed { program: PathBuf },
    #[error("Lost track of {program}: {source}")]
    Io {
        program: PathBuf,
        source: std::io::Error,
    },
}

/// Why a single item produced no ledger entry.
#[derive(Debug, Error)]
pub enum ItemError {
    /// The file is not a decodable image. Expected for stray files.
    #[error("Not an image: {reason}")]
    NotAnImage { reason: String },
    #[error("Failed to write normalized image {path}: {source}")]
    Normalize {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("Partition tool failed: {0}")]
    Partition(#[source] ToolError),
    #[error("Solver failed: {0}")]
    Solver(#[source] ToolError),
    #[error("Solver output has no usable score: {0}")]
    ScoreParse(String),
    #[error("Ledger append failed: {0}")]
    Ledger(#[from] LedgerError),
}
