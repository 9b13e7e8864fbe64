//! Shared FIFO between the scheduler and the worker pool.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, WaitTimeoutResult};
use std::time::Duration;

use tracing::warn;

use crate::types::{QueueMessage, WorkItem};

const WAIT_SLICE: Duration = Duration::from_millis(50);

/// Bounded multi-consumer queue of work items and sentinels.
///
/// Items respect the capacity bound so the scheduler cannot run arbitrarily
/// far ahead of the workers. Sentinels skip the bound: releasing the workers
/// must never depend on queue space.
pub struct WorkQueue {
    queue: Mutex<VecDeque<QueueMessage>>,
    ready: Condvar,
    max_size: usize,
    items_pushed: AtomicUsize,
    sentinels_pushed: AtomicUsize,
}

impl WorkQueue {
    /// Create an empty queue holding at most `max_size` items (minimum 1).
    pub fn new(max_size: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
            max_size: max_size.max(1),
            items_pushed: AtomicUsize::new(0),
            sentinels_pushed: AtomicUsize::new(0),
        }
    }

    /// Enqueue an item, blocking while the queue is full.
    ///
    /// Returns false without enqueuing if `stop` is set before space frees up.
    pub fn push_item(&self, item: WorkItem, stop: &AtomicBool) -> bool {
        let mut guard = self.lock_queue();
        while guard.len() >= self.max_size {
            if stop.load(Ordering::Relaxed) {
                return false;
            }
            let (next_guard, _) = self.wait_ready(guard);
            guard = next_guard;
        }
        guard.push_back(QueueMessage::Item(item));
        self.items_pushed.fetch_add(1, Ordering::Relaxed);
        self.ready.notify_all();
        true
    }

    /// Enqueue one sentinel. Never blocks.
    pub fn push_sentinel(&self) {
        let mut guard = self.lock_queue();
        guard.push_back(QueueMessage::Sentinel);
        self.sentinels_pushed.fetch_add(1, Ordering::Relaxed);
        self.ready.notify_all();
    }

    /// Dequeue the next message, blocking until one is available.
    ///
    /// Returns `None` once `stop` is set while waiting.
    pub fn pop(&self, stop: &AtomicBool) -> Option<QueueMessage> {
        let mut guard = self.lock_queue();
        loop {
            if let Some(message) = guard.pop_front() {
                self.ready.notify_all();
                return Some(message);
            }
            if stop.load(Ordering::Relaxed) {
                return None;
            }
            let (next_guard, _) = self.wait_ready(guard);
            guard = next_guard;
        }
    }

    /// Messages currently queued, sentinels included.
    pub fn len(&self) -> usize {
        self.lock_queue().len()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Capacity bound applied to items.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Total items ever enqueued.
    pub fn items_pushed(&self) -> usize {
        self.items_pushed.load(Ordering::Relaxed)
    }

    /// Total sentinels ever enqueued.
    pub fn sentinels_pushed(&self) -> usize {
        self.sentinels_pushed.load(Ordering::Relaxed)
    }

    fn lock_queue(&self) -> MutexGuard<'_, VecDeque<QueueMessage>> {
        self.queue.lock().unwrap_or_else(|poisoned| {
            warn!("Work queue lock poisoned; recovering.");
            poisoned.into_inner()
        })
    }

    fn wait_ready<'a>(
        &self,
        guard: MutexGuard<'a, VecDeque<QueueMessage>>,
    ) -> (MutexGuard<'a, VecDeque<QueueMessage>>, WaitTimeoutResult) {
        self.ready
            .wait_timeout(guard, WAIT_SLICE)
            .unwrap_or_else(|poisoned| {
                warn!("Work queue condvar poisoned; recovering.");
                poisoned.into_inner()
            })
    }
}
