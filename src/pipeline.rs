//! One end-to-end run: skip-set, queue, worker pool, scheduler, join.

use std::{
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use thiserror::Error;
use tracing::{error, info};

use crate::config::RunConfig;
use crate::ledger::{self, Ledger, LedgerError};
use crate::queue::WorkQueue;
use crate::scheduler::{self, ScanError, SchedulerReport};
use crate::shutdown::{ShutdownPhase, ShutdownState};
use crate::worker::{ItemSettings, PuzzleTools, Worker, WorkerStats};

/// Errors that end a run as a whole.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("Dataset enumeration failed: {0}")]
    Enumeration(#[from] ScanError),
    #[error("Failed to spawn {name}: {source}")]
    Spawn {
        name: String,
        source: std::io::Error,
    },
    #[error("{0} panicked")]
    Panicked(String),
}

/// What happened during a completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub scheduler: SchedulerReport,
    pub workers: WorkerStats,
    pub worker_count: usize,
    pub shutdown: ShutdownPhase,
    pub elapsed: Duration,
}

/// Drives the scheduler and worker pool for one configuration.
pub struct Pipeline {
    config: RunConfig,
    tools: Arc<dyn PuzzleTools>,
    shutdown: Arc<ShutdownState>,
}

impl Pipeline {
    pub fn new(
        config: RunConfig,
        tools: Arc<dyn PuzzleTools>,
        shutdown: Arc<ShutdownState>,
    ) -> Self {
        Self {
            config,
            tools,
            shutdown,
        }
    }

    /// Run until the queue drains (or a stop request), then join every thread.
    pub fn run(&self) -> Result<RunSummary, PipelineError> {
        let started = Instant::now();
        let config = &self.config;
        let known = ledger::load_known_keys(&config.ledger_path)?;
        let ledger = Arc::new(Ledger::open(&config.ledger_path)?);
        let queue = Arc::new(WorkQueue::new(config.queue_capacity));
        info!(
            root = %config.dataset_root.display(),
            ledger = %config.ledger_path.display(),
            already_recorded = known.len(),
            workers = config.worker_count,
            seed = config.global_seed,
            piece_size = config.piece_size,
            "Starting run"
        );

        let settings = ItemSettings {
            canonical_side: config.canonical_side,
            piece_size: config.piece_size,
            global_seed: config.global_seed,
        };
        let mut workers = Vec::with_capacity(config.worker_count);
        for index in 0..config.worker_count {
            let worker = Worker::new(
                index,
                config.scratch_dir(index),
                settings,
                Arc::clone(&queue),
                Arc::clone(&ledger),
                Arc::clone(&self.tools),
                Arc::clone(&self.shutdown),
            );
            match spawn_named(format!("puzzlebench-worker-{index}"), move || worker.run()) {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    self.shutdown.request_stop();
                    join_all(workers);
                    return Err(err);
                }
            }
        }

        let scheduler = {
            let root = config.dataset_root.clone();
            let queue = Arc::clone(&queue);
            let shutdown = Arc::clone(&self.shutdown);
            let worker_count = config.worker_count;
            let global_seed = config.global_seed;
            spawn_named("puzzlebench-scheduler".to_string(), move || {
                scheduler::run(&root, &known, global_seed, &queue, worker_count, &shutdown)
            })
        };
        let scheduler = match scheduler {
            Ok(handle) => handle,
            Err(err) => {
                self.shutdown.request_stop();
                join_all(workers);
                return Err(err);
            }
        };

        let (report, stats) = join_threads(scheduler, workers, &self.shutdown)?;
        let summary = RunSummary {
            scheduler: report,
            workers: stats,
            worker_count: config.worker_count,
            shutdown: self.shutdown.phase(),
            elapsed: started.elapsed(),
        };
        info!(
            enqueued = summary.scheduler.enqueued,
            recorded = summary.workers.recorded,
            not_images = summary.workers.not_images,
            failed = summary.workers.failed,
            elapsed_secs = summary.elapsed.as_secs_f64(),
            "Run finished"
        );
        Ok(summary)
    }
}

fn spawn_named<F, R>(name: String, body: F) -> Result<JoinHandle<R>, PipelineError>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    thread::Builder::new()
        .name(name.clone())
        .spawn(body)
        .map_err(|source| PipelineError::Spawn { name, source })
}

/// Join the scheduler, then every worker.
///
/// A panicked scheduler never sent its sentinels, so the stop flag is raised
/// before waiting on the workers.
fn join_threads(
    scheduler: JoinHandle<Result<SchedulerReport, ScanError>>,
    workers: Vec<JoinHandle<WorkerStats>>,
    shutdown: &ShutdownState,
) -> Result<(SchedulerReport, WorkerStats), PipelineError> {
    let scheduled = scheduler.join().map_err(|_| {
        error!("puzzlebench-scheduler panicked");
        PipelineError::Panicked("puzzlebench-scheduler".to_string())
    });
    if scheduled.is_err() {
        shutdown.request_stop();
    }
    let (stats, panicked) = join_all(workers);

    let report = scheduled??;
    if let Some(name) = panicked {
        return Err(PipelineError::Panicked(name));
    }
    Ok((report, stats))
}

/// Join every worker, merging their stats. Reports the first panicked thread.
fn join_all(workers: Vec<JoinHandle<WorkerStats>>) -> (WorkerStats, Option<String>) {
    let mut total = WorkerStats::default();
    let mut panicked = None;
    for handle in workers {
        let name = handle
            .thread()
            .name()
            .unwrap_or("puzzlebench-worker")
            .to_string();
        match handle.join() {
            Ok(stats) => total.merge(&stats),
            Err(_) => {
                error!("{name} panicked");
                panicked.get_or_insert(name);
            }
        }
    }
    (total, panicked)
}
