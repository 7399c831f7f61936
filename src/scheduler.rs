//! The bounded priority queue, concurrency limiter, and worker loop (C11).
//!
//! Priority ordering follows the same `BinaryHeap` discipline as a
//! producer/consumer transfer queue: order by priority first (lower value
//! = earlier, so the heap compares on a reversed key), then break ties by
//! monotonically increasing sequence number for FIFO-within-priority.
//! Concurrency is capped by a `Semaphore`; a worker acquires a permit
//! before popping so the queue never dispatches more than the configured
//! number of concurrent extractor subprocesses.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify, Semaphore};
use tracing::warn;

use crate::error::ServiceError;

pub const METADATA_PRIORITY: u8 = 1;
pub const DOWNLOAD_PRIORITY: u8 = 10;

#[derive(Debug, Clone, Eq, PartialEq)]
struct QueueItem {
    priority: u8,
    seq: u64,
    job_id: String,
}

impl Ord for QueueItem {
    fn cmp(&self, other: &Self) -> Ordering {
        // Lower priority value sorts first; BinaryHeap is a max-heap, so
        // invert the priority comparison, then break ties by the lower
        // sequence number (earlier enqueue) sorting first.
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueueItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct QueueInner {
    heap: BinaryHeap<QueueItem>,
}

/// Bounded priority queue plus a concurrency-limiting semaphore. Workers
/// call `acquire_and_pop` which blocks until both a concurrency permit and
/// a queued job are available.
pub struct Scheduler {
    inner: Mutex<QueueInner>,
    capacity: usize,
    seq_counter: AtomicU64,
    concurrency: Arc<Semaphore>,
    notify: Notify,
}

impl Scheduler {
    pub fn new(capacity: usize, concurrency_limit: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                heap: BinaryHeap::new(),
            }),
            capacity,
            seq_counter: AtomicU64::new(0),
            concurrency: Arc::new(Semaphore::new(concurrency_limit)),
            notify: Notify::new(),
        }
    }

    /// Enqueues `job_id` at `priority`. Fails with `QUEUE_FULL` if the
    /// queue is already at capacity.
    pub async fn enqueue(&self, job_id: String, priority: u8) -> Result<(), ServiceError> {
        let mut inner = self.inner.lock().await;
        if inner.heap.len() >= self.capacity {
            return Err(ServiceError::QueueFull);
        }
        let seq = self.seq_counter.fetch_add(1, AtomicOrdering::SeqCst);
        inner.heap.push(QueueItem {
            priority,
            seq,
            job_id,
        });
        drop(inner);
        self.notify.notify_one();
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.heap.len()
    }

    /// Acquires a concurrency permit, then blocks until a job is queued.
    /// Returns `None` if `shutdown` resolves first (cooperative
    /// cancellation for idle workers).
    pub async fn acquire_and_pop(
        self: &Arc<Self>,
        shutdown: impl std::future::Future<Output = ()>,
    ) -> Option<(tokio::sync::OwnedSemaphorePermit, String)> {
        let permit = tokio::select! {
            permit = self.concurrency.clone().acquire_owned() => permit.ok()?,
            _ = shutdown => return None,
        };

        loop {
            {
                let mut inner = self.inner.lock().await;
                if let Some(item) = inner.heap.pop() {
                    return Some((permit, item.job_id));
                }
            }
            self.notify.notified().await;
        }
    }
}

/// Per-attempt outcome a worker reports back for diagnostics.
#[derive(Debug)]
pub struct DispatchFailure {
    pub job_id: String,
    pub reason: String,
}

impl DispatchFailure {
    pub fn log(&self) {
        warn!(job_id = %self.job_id, reason = %self.reason, "job dispatch failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_enqueue_at_capacity() {
        let scheduler = Scheduler::new(1, 1);
        scheduler.enqueue("a".to_string(), DOWNLOAD_PRIORITY).await.unwrap();
        let result = scheduler.enqueue("b".to_string(), DOWNLOAD_PRIORITY).await;
        assert!(matches!(result, Err(ServiceError::QueueFull)));
    }

    #[tokio::test]
    async fn pops_in_priority_order() {
        let scheduler = Arc::new(Scheduler::new(10, 1));
        scheduler.enqueue("download".to_string(), DOWNLOAD_PRIORITY).await.unwrap();
        scheduler.enqueue("metadata".to_string(), METADATA_PRIORITY).await.unwrap();

        let (permit_a, first) = scheduler
            .acquire_and_pop(std::future::pending())
            .await
            .unwrap();
        assert_eq!(first, "metadata");
        drop(permit_a);
    }

    #[tokio::test]
    async fn fifo_within_equal_priority() {
        let scheduler = Arc::new(Scheduler::new(10, 2));
        scheduler.enqueue("a".to_string(), DOWNLOAD_PRIORITY).await.unwrap();
        scheduler.enqueue("b".to_string(), DOWNLOAD_PRIORITY).await.unwrap();

        let (_p1, first) = scheduler.acquire_and_pop(std::future::pending()).await.unwrap();
        let (_p2, second) = scheduler.acquire_and_pop(std::future::pending()).await.unwrap();
        assert_eq!(first, "a");
        assert_eq!(second, "b");
    }

    #[tokio::test]
    async fn concurrency_cap_blocks_third_worker() {
        let scheduler = Arc::new(Scheduler::new(10, 1));
        scheduler.enqueue("a".to_string(), DOWNLOAD_PRIORITY).await.unwrap();
        scheduler.enqueue("b".to_string(), DOWNLOAD_PRIORITY).await.unwrap();

        let (_permit, first) = scheduler.acquire_and_pop(std::future::pending()).await.unwrap();
        assert_eq!(first, "a");

        // Second acquire should not resolve while the only permit is held;
        // race it against a short timeout to prove it blocks.
        let second = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            scheduler.acquire_and_pop(std::future::pending()),
        )
        .await;
        assert!(second.is_err(), "expected the second worker to block on concurrency cap");
    }
}
