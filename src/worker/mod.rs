//! Consumer side of the pipeline.
//!
//! A worker clears its scratch directory, then pulls items until it sees its
//! sentinel or a stop request. Every item failure is contained: it is logged,
//! counted and the loop moves on to the next dequeue.

mod errors;
mod normalize;
mod scratch;
mod tools;

use std::{path::PathBuf, sync::Arc, time::Instant};

use tracing::{debug, error, info, warn};

use crate::ledger::{Ledger, LedgerEntry};
use crate::queue::WorkQueue;
use crate::seed;
use crate::shutdown::ShutdownState;
use crate::types::{QueueMessage, WorkItem};

pub use errors::{ItemError, ToolError};
pub use normalize::normalize;
pub use scratch::{NORMALIZED_IMAGE_NAME, TempImage};
pub use tools::{ExternalTools, PartitionRequest, PuzzleTools, SCORE_MARKER, parse_score};

/// Per-run parameters every worker shares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemSettings {
    pub canonical_side: u32,
    pub piece_size: u32,
    pub global_seed: u64,
}

impl ItemSettings {
    pub fn piece_count(&self) -> u32 {
        self.canonical_side / self.piece_size
    }
}

/// Lifecycle of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Startup,
    Ready,
    Processing,
    Done,
}

/// Outcome counters for one worker.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WorkerStats {
    pub recorded: usize,
    pub not_images: usize,
    pub failed: usize,
    /// Sentinels consumed; 1 on a normal exit.
    pub sentinels: usize,
    /// True when the worker left because of a stop request.
    pub stopped: bool,
}

impl WorkerStats {
    pub fn merge(&mut self, other: &WorkerStats) {
        self.recorded += other.recorded;
        self.not_images += other.not_images;
        self.failed += other.failed;
        self.sentinels += other.sentinels;
        self.stopped |= other.stopped;
    }
}

/// One consumer with exclusive use of its scratch directory.
pub struct Worker<T: PuzzleTools + ?Sized> {
    index: usize,
    scratch_dir: PathBuf,
    settings: ItemSettings,
    queue: Arc<WorkQueue>,
    ledger: Arc<Ledger>,
    tools: Arc<T>,
    shutdown: Arc<ShutdownState>,
    state: WorkerState,
}

impl<T: PuzzleTools + ?Sized> Worker<T> {
    pub fn new(
        index: usize,
        scratch_dir: PathBuf,
        settings: ItemSettings,
        queue: Arc<WorkQueue>,
        ledger: Arc<Ledger>,
        tools: Arc<T>,
        shutdown: Arc<ShutdownState>,
    ) -> Self {
        Self {
            index,
            scratch_dir,
            settings,
            queue,
            ledger,
            tools,
            shutdown,
            state: WorkerState::Startup,
        }
    }

    /// Run the worker until its sentinel or a stop request.
    pub fn run(mut self) -> WorkerStats {
        scratch::prepare(&self.scratch_dir);
        self.state = WorkerState::Ready;
        debug!(worker = self.index, scratch = %self.scratch_dir.display(), "Worker ready");

        let mut stats = WorkerStats::default();
        while self.state == WorkerState::Ready {
            if self.shutdown.stop_requested() {
                stats.stopped = true;
                break;
            }
            let item = match self.queue.pop(self.shutdown.stop_flag()) {
                Some(QueueMessage::Item(item)) => item,
                Some(QueueMessage::Sentinel) => {
                    stats.sentinels += 1;
                    break;
                }
                None => {
                    stats.stopped = true;
                    break;
                }
            };
            self.state = WorkerState::Processing;
            self.record_outcome(&item, &mut stats);
            self.state = WorkerState::Ready;
        }
        self.state = WorkerState::Done;
        debug!(
            worker = self.index,
            recorded = stats.recorded,
            failed = stats.failed,
            "Worker done"
        );
        stats
    }

    fn record_outcome(&self, item: &WorkItem, stats: &mut WorkerStats) {
        match self.process(item) {
            Ok(entry) => {
                stats.recorded += 1;
                info!(
                    worker = self.index,
                    "{} was solved in {:.2} seconds with accuracy of {:.2}%.",
                    entry.identifier,
                    entry.duration_seconds,
                    entry.score * 100.0
                );
            }
            Err(ItemError::NotAnImage { reason }) => {
                stats.not_images += 1;
                debug!(worker = self.index, item = %item.identifier, "Skipping non-image: {reason}");
            }
            Err(err @ ItemError::Ledger(_)) => {
                stats.failed += 1;
                error!(worker = self.index, item = %item.identifier, "Result lost: {err}");
            }
            Err(err) => {
                stats.failed += 1;
                warn!(worker = self.index, item = %item.identifier, "Item failed: {err}");
            }
        }
    }

    /// Normalize, partition, solve and record one item.
    fn process(&self, item: &WorkItem) -> Result<LedgerEntry, ItemError> {
        let temp = TempImage::in_dir(&self.scratch_dir);
        normalize(&item.path, self.settings.canonical_side, temp.path())?;

        let piece_count = self.settings.piece_count();
        let item_seed = seed::derive(&item.identifier, self.settings.global_seed);
        let force = self.shutdown.force_flag();

        let started = Instant::now();
        self.tools
            .partition(
                &PartitionRequest {
                    image_path: temp.path(),
                    piece_size: self.settings.piece_size,
                    output_dir: &self.scratch_dir,
                    seed: item_seed,
                },
                force,
            )
            .map_err(ItemError::Partition)?;
        let stdout = self
            .tools
            .solve(piece_count, &self.scratch_dir, force)
            .map_err(ItemError::Solver)?;
        let score = parse_score(&stdout)?;
        let elapsed = started.elapsed().as_secs_f64();

        let entry = LedgerEntry {
            identifier: item.identifier.clone(),
            score,
            duration_seconds: elapsed,
        };
        self.ledger.append(&entry)?;
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger;
    use image::{Rgb, RgbImage};
    use std::path::Path;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicBool;
    use tempfile::tempdir;

    /// Records partition calls and reports a fixed score.
    #[derive(Default)]
    struct ScriptedTools {
        seeds: Mutex<Vec<u32>>,
        fail_partition: bool,
        solver_output: Option<String>,
    }

    impl PuzzleTools for ScriptedTools {
        fn partition(
            &self,
            request: &PartitionRequest<'_>,
            _force: &AtomicBool,
        ) -> Result<(), ToolError> {
            assert!(request.image_path.is_file());
            self.seeds.lock().unwrap().push(request.seed);
            if self.fail_partition {
                return Err(ToolError::Failed {
                    program: PathBuf::from("partition"),
                    status: "exit status: 1".into(),
                });
            }
            Ok(())
        }

        fn solve(
            &self,
            piece_count: u32,
            _artifacts_dir: &Path,
            _force: &AtomicBool,
        ) -> Result<String, ToolError> {
            Ok(self
                .solver_output
                .clone()
                .unwrap_or_else(|| format!("N = {piece_count}\nNCS: 0.5\n")))
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        data: PathBuf,
        scratch: PathBuf,
        ledger_path: PathBuf,
        queue: Arc<WorkQueue>,
        ledger: Arc<Ledger>,
        shutdown: Arc<ShutdownState>,
    }

    impl Harness {
        fn new() -> Self {
            let dir = tempdir().unwrap();
            let data = dir.path().join("data");
            std::fs::create_dir_all(&data).unwrap();
            let ledger_path = dir.path().join("results.csv");
            Self {
                data,
                scratch: dir.path().join("scratch").join("0"),
                ledger: Arc::new(Ledger::open(&ledger_path).unwrap()),
                ledger_path,
                queue: Arc::new(WorkQueue::new(16)),
                shutdown: ShutdownState::shared(),
                _dir: dir,
            }
        }

        fn image(&self, name: &str) -> WorkItem {
            let path = self.data.join(name);
            RgbImage::from_pixel(20, 20, Rgb([10, 200, 10]))
                .save(&path)
                .unwrap();
            WorkItem::from_root(&self.data, &path).unwrap()
        }

        fn text(&self, name: &str) -> WorkItem {
            let path = self.data.join(name);
            std::fs::write(&path, b"hello").unwrap();
            WorkItem::from_root(&self.data, &path).unwrap()
        }

        fn worker(&self, tools: Arc<ScriptedTools>) -> Worker<ScriptedTools> {
            Worker::new(
                0,
                self.scratch.clone(),
                ItemSettings {
                    canonical_side: 32,
                    piece_size: 8,
                    global_seed: 42,
                },
                Arc::clone(&self.queue),
                Arc::clone(&self.ledger),
                tools,
                Arc::clone(&self.shutdown),
            )
        }

        fn push(&self, item: WorkItem) {
            assert!(self.queue.push_item(item, self.shutdown.stop_flag()));
        }
    }

    #[test]
    fn processes_items_until_sentinel() {
        let harness = Harness::new();
        let tools = Arc::new(ScriptedTools::default());
        let first = harness.image("a.png");
        let second = harness.image("b.png");
        harness.push(first.clone());
        harness.push(harness.text("readme.txt"));
        harness.push(second.clone());
        harness.queue.push_sentinel();
        harness.queue.push_sentinel();

        let stats = harness.worker(Arc::clone(&tools)).run();

        assert_eq!(stats.recorded, 2);
        assert_eq!(stats.not_images, 1);
        assert_eq!(stats.sentinels, 1);
        assert!(!stats.stopped);
        // The second sentinel belongs to another worker.
        assert_eq!(harness.queue.len(), 1);

        let entries = ledger::read_entries(&harness.ledger_path).unwrap();
        let ids: Vec<_> = entries.iter().map(|e| e.identifier.as_str()).collect();
        assert_eq!(ids, vec!["a.png", "b.png"]);
        assert!(entries.iter().all(|e| e.score == 0.5));

        let seeds = tools.seeds.lock().unwrap().clone();
        assert_eq!(
            seeds,
            vec![
                seed::derive(&first.identifier, 42),
                seed::derive(&second.identifier, 42)
            ]
        );
        assert!(!harness.scratch.join(NORMALIZED_IMAGE_NAME).exists());
    }

    #[test]
    fn startup_clears_stale_scratch() {
        let harness = Harness::new();
        std::fs::create_dir_all(&harness.scratch).unwrap();
        std::fs::write(harness.scratch.join("leftover.png"), b"old").unwrap();
        harness.queue.push_sentinel();

        harness.worker(Arc::new(ScriptedTools::default())).run();

        assert_eq!(std::fs::read_dir(&harness.scratch).unwrap().count(), 0);
    }

    #[test]
    fn tool_failures_do_not_stop_the_worker() {
        let harness = Harness::new();
        let tools = Arc::new(ScriptedTools {
            fail_partition: true,
            ..ScriptedTools::default()
        });
        harness.push(harness.image("a.png"));
        harness.push(harness.image("b.png"));
        harness.queue.push_sentinel();

        let stats = harness.worker(tools).run();

        assert_eq!(stats.failed, 2);
        assert_eq!(stats.recorded, 0);
        assert_eq!(stats.sentinels, 1);
        assert!(ledger::read_entries(&harness.ledger_path).unwrap().is_empty());
        assert!(!harness.scratch.join(NORMALIZED_IMAGE_NAME).exists());
    }

    #[test]
    fn unparsable_solver_output_is_a_failure() {
        let harness = Harness::new();
        let tools = Arc::new(ScriptedTools {
            solver_output: Some("segmentation fault\n".into()),
            ..ScriptedTools::default()
        });
        let item = harness.image("a.png");
        std::fs::create_dir_all(&harness.scratch).unwrap();
        let worker = harness.worker(Arc::clone(&tools));
        assert!(matches!(
            worker.process(&item),
            Err(ItemError::ScoreParse(_))
        ));
        assert_eq!(tools.seeds.lock().unwrap().len(), 1);

        harness.push(item);
        harness.queue.push_sentinel();
        let stats = worker.run();

        assert_eq!(stats.failed, 1);
        assert_eq!(stats.recorded, 0);
        assert_eq!(stats.sentinels, 1);
        assert!(ledger::read_entries(&harness.ledger_path).unwrap().is_empty());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn ledger_write_failures_do_not_stop_the_worker() {
        let mut harness = Harness::new();
        harness.ledger = Arc::new(Ledger::open("/dev/full").unwrap());
        let tools = Arc::new(ScriptedTools::default());
        harness.push(harness.image("a.png"));
        harness.push(harness.image("b.png"));
        harness.queue.push_sentinel();

        let stats = harness.worker(Arc::clone(&tools)).run();

        assert_eq!(stats.failed, 2);
        assert_eq!(stats.recorded, 0);
        assert_eq!(stats.sentinels, 1);
        assert!(!stats.stopped);
        // Both items reached the tools before the write was refused.
        assert_eq!(tools.seeds.lock().unwrap().len(), 2);
        assert!(harness.queue.is_empty());
    }

    #[test]
    fn stop_request_ends_the_loop_before_the_next_item() {
        let harness = Harness::new();
        harness.push(harness.image("a.png"));
        harness.queue.push_sentinel();
        harness.shutdown.request_stop();

        let stats = harness.worker(Arc::new(ScriptedTools::default())).run();

        assert!(stats.stopped);
        assert_eq!(stats.recorded, 0);
        assert_eq!(harness.queue.len(), 2);
    }

    #[test]
    fn merge_sums_counters() {
        let mut total = WorkerStats::default();
        total.merge(&WorkerStats {
            recorded: 2,
            not_images: 1,
            failed: 0,
            sentinels: 1,
            stopped: false,
        });
        total.merge(&WorkerStats {
            recorded: 1,
            not_images: 0,
            failed: 3,
            sentinels: 0,
            stopped: true,
        });
        assert_eq!(total.recorded, 3);
        assert_eq!(total.failed, 3);
        assert_eq!(total.sentinels, 1);
        assert!(total.stopped);
    }
}
