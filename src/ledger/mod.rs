//! Append-only results ledger that doubles as the resumption checkpoint.
//!
//! The ledger is a headerless CSV file with one `identifier,score,duration`
//! row per completed item. It is read once before any worker starts and then
//! only ever appended to, one locked write per result.

mod csv_row;

use std::{
    collections::HashSet,
    fs::{self, File, OpenOptions},
    io::{Read, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

use thiserror::Error;
use tracing::{debug, warn};

/// One completed item.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    /// Dataset-relative identifier of the image.
    pub identifier: String,
    /// Accuracy score reported by the solver, in `[0, 1]`.
    pub score: f64,
    /// Wall-clock seconds spent in the partition and solve steps.
    pub duration_seconds: f64,
}

/// Errors raised while reading or appending to the ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Failed to create ledger directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to open ledger {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to read ledger {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to append to ledger {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Shared append handle. All workers write through one instance.
#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    file: Mutex<File>,
}

impl Ledger {
    /// Open (or create) the ledger for appending.
    ///
    /// A file whose last row was cut short by a crash is truncated back to its
    /// last complete record, so the next row starts on a fresh line and the
    /// torn item is simply retried.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|source| LedgerError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        if let Some(keep) = torn_tail_offset(&path)? {
            warn!(
                ledger = %path.display(),
                keep_bytes = keep,
                "Ledger ends with a partial row; truncating it"
            );
            OpenOptions::new()
                .write(true)
                .open(&path)
                .and_then(|file| file.set_len(keep).and_then(|_| file.sync_data()))
                .map_err(|source| LedgerError::Write {
                    path: path.clone(),
                    source,
                })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| LedgerError::Open {
                path: path.clone(),
                source,
            })?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Location of the ledger file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one row and flush it to disk.
    ///
    /// The whole row is written with a single `write_all` while the lock is
    /// held, so concurrent appends never interleave.
    pub fn append(&self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        let row = csv_row::format_row(entry);
        let mut file = self.file.lock().unwrap_or_else(|err| err.into_inner());
        file.write_all(row.as_bytes())
            .and_then(|_| file.flush())
            .and_then(|_| file.sync_data())
            .map_err(|source| LedgerError::Write {
                path: self.path.clone(),
                source,
            })
    }
}

/// Identifiers already recorded in the ledger. Missing file means none.
pub fn load_known_keys(path: impl AsRef<Path>) -> Result<HashSet<String>, LedgerError> {
    Ok(read_entries(path)?
        .into_iter()
        .map(|entry| entry.identifier)
        .collect())
}

/// Every complete, well-formed entry in file order.
pub fn read_entries(path: impl AsRef<Path>) -> Result<Vec<LedgerEntry>, LedgerError> {
    let path = path.as_ref();
    let text = match fs::read(path) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(LedgerError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    let mut entries = Vec::new();
    for (index, record) in csv_row::parse_records(&text).iter().enumerate() {
        if !record.terminated {
            debug!(ledger = %path.display(), "Ignoring unterminated trailing ledger row");
            continue;
        }
        match csv_row::record_to_entry(record) {
            Some(entry) => entries.push(entry),
            None => warn!(
                ledger = %path.display(),
                record = index + 1,
                "Skipping malformed ledger row"
            ),
        }
    }
    Ok(entries)
}

/// Where a torn trailing row starts, if the ledger has one.
///
/// Only regular files are inspected; devices and pipes are left alone.
fn torn_tail_offset(path: &Path) -> Result<Option<u64>, LedgerError> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(LedgerError::Open {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    let map_read = |source| LedgerError::Read {
        path: path.to_path_buf(),
        source,
    };
    let metadata = file.metadata().map_err(map_read)?;
    if !metadata.is_file() || metadata.len() == 0 {
        return Ok(None);
    }
    let mut bytes = Vec::with_capacity(metadata.len() as usize);
    file.read_to_end(&mut bytes).map_err(map_read)?;
    let keep = csv_row::complete_prefix_len(&bytes);
    Ok((keep < bytes.len()).then_some(keep as u64))
}
