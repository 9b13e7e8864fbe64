//! Producer side of the pipeline.
//!
//! The scheduler enumerates the dataset, orders it with a seeded shuffle,
//! drops anything the ledger already has and feeds the rest to the queue.
//! Whatever happens, it finishes by sending one sentinel per worker.
//!
//! Ordering policy: the full enumeration is sorted by identifier and shuffled
//! *before* already-recorded items are filtered out. A resumed run therefore
//! processes the remaining items in the same relative order the first run
//! would have used.

mod walk;

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::queue::WorkQueue;
use crate::shutdown::ShutdownState;
use crate::types::WorkItem;

pub use walk::DatasetWalk;

/// Errors that can occur while enumerating the dataset.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Dataset root is not a directory: {0}")]
    InvalidRoot(PathBuf),
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// What the scheduler did during one run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SchedulerReport {
    /// Files found under the dataset root.
    pub enumerated: usize,
    /// Files skipped because the ledger already records them.
    pub already_done: usize,
    /// Items handed to the queue.
    pub enqueued: usize,
    /// True when a stop request cut enumeration or enqueueing short.
    pub aborted: bool,
}

/// Start a lazy walk over `root`.
pub fn enumerate(root: impl AsRef<Path>) -> Result<DatasetWalk, ScanError> {
    DatasetWalk::new(root)
}

/// Put items into their run order: sorted by identifier, then shuffled with
/// a generator seeded by `global_seed`.
pub fn shuffled_order(mut items: Vec<WorkItem>, global_seed: u64) -> Vec<WorkItem> {
    items.sort_by(|a, b| a.identifier.cmp(&b.identifier));
    let mut rng = StdRng::seed_from_u64(global_seed);
    items.shuffle(&mut rng);
    items
}

/// Feed the queue for one run, then release every worker.
///
/// `known` is the ledger's skip-set as loaded before any worker started.
/// Exactly `worker_count` sentinels are enqueued on every path, including a
/// stop request and an unreadable dataset root.
pub fn run(
    root: &Path,
    known: &HashSet<String>,
    global_seed: u64,
    queue: &WorkQueue,
    worker_count: usize,
    shutdown: &ShutdownState,
) -> Result<SchedulerReport, ScanError> {
    let result = feed(root, known, global_seed, queue, shutdown);
    for _ in 0..worker_count {
        queue.push_sentinel();
    }
    debug!(worker_count, "Scheduler released workers");
    match &result {
        Ok(report) => info!(
            enumerated = report.enumerated,
            already_done = report.already_done,
            enqueued = report.enqueued,
            aborted = report.aborted,
            "Scheduler finished"
        ),
        Err(err) => warn!("Scheduler failed: {err}"),
    }
    result
}

fn feed(
    root: &Path,
    known: &HashSet<String>,
    global_seed: u64,
    queue: &WorkQueue,
    shutdown: &ShutdownState,
) -> Result<SchedulerReport, ScanError> {
    let mut report = SchedulerReport::default();
    let mut items = Vec::new();
    for item in enumerate(root)? {
        if shutdown.stop_requested() {
            report.aborted = true;
            report.enumerated = items.len();
            return Ok(report);
        }
        items.push(item);
    }
    report.enumerated = items.len();
    info!(
        root = %root.display(),
        files = report.enumerated,
        "Dataset enumerated"
    );

    for item in shuffled_order(items, global_seed) {
        if shutdown.stop_requested() {
            report.aborted = true;
            break;
        }
        if known.contains(&item.identifier) {
            report.already_done += 1;
            continue;
        }
        if !queue.push_item(item, shutdown.stop_flag()) {
            report.aborted = true;
            break;
        }
        report.enqueued += 1;
    }
    Ok(report)
}
