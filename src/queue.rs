use crate::batch::ProducerBatch;
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::Notify;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// FIFO of closed batches waiting for a sender worker.
///
/// Unbounded: memory admission already caps what can sit in here.
#[derive(Debug, Default)]
pub struct ReadyQueue {
    batches: Mutex<VecDeque<ProducerBatch>>,
    notify: Notify,
    closed: AtomicBool,
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, batch: ProducerBatch) {
        lock(&self.batches).push_back(batch);
        self.notify.notify_one();
    }

    pub fn push_all(&self, batches: impl IntoIterator<Item = ProducerBatch>) {
        for batch in batches {
            self.push(batch);
        }
    }

    pub fn try_pop(&self) -> Option<ProducerBatch> {
        lock(&self.batches).pop_front()
    }

    /// Next batch, waiting while the queue is empty. `None` once the queue
    /// is closed and drained.
    pub async fn pop(&self) -> Option<ProducerBatch> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(batch) = self.try_pop() {
                // Pass the wake-up on in case more batches are queued.
                if !self.is_empty() {
                    self.notify.notify_one();
                }
                return Some(batch);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }

    /// Removes everything still queued.
    pub fn drain(&self) -> Vec<ProducerBatch> {
        lock(&self.batches).drain(..).collect()
    }

    /// Workers finish what is queued, then see `None`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn len(&self) -> usize {
        lock(&self.batches).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.batches).is_empty()
    }
}

struct RetryEntry {
    next_retry_ms: i64,
    seq: u64,
    batch: ProducerBatch,
}

impl PartialEq for RetryEntry {
    fn eq(&self, other: &Self) -> bool {
        self.next_retry_ms == other.next_retry_ms && self.seq == other.seq
    }
}

impl Eq for RetryEntry {}

impl PartialOrd for RetryEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for RetryEntry {
    // Reversed so the max-heap pops the earliest deadline first.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .next_retry_ms
            .cmp(&self.next_retry_ms)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct RetryHeap {
    entries: BinaryHeap<RetryEntry>,
    closed: bool,
}

/// Min-heap of batches waiting out their retry backoff, keyed on
/// `next_retry_ms`. Ties keep scheduling order.
#[derive(Default)]
pub struct RetryQueue {
    heap: Mutex<RetryHeap>,
    seq: AtomicU64,
    /// Wakes the mover when a deadline earlier than its current wait shows up.
    notify: Notify,
}

impl RetryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules the batch; hands it back once the queue has been closed.
    pub fn put(&self, batch: ProducerBatch) -> Result<(), ProducerBatch> {
        let mut heap = lock(&self.heap);
        if heap.closed {
            return Err(batch);
        }
        let entry = RetryEntry {
            next_retry_ms: batch.next_retry_ms(),
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            batch,
        };
        let earliest = heap
            .entries
            .peek()
            .map_or(true, |head| entry.next_retry_ms < head.next_retry_ms);
        heap.entries.push(entry);
        drop(heap);
        if earliest {
            self.notify.notify_one();
        }
        Ok(())
    }

    /// Pops every batch whose deadline has passed, earliest first.
    pub fn expired(&self, now_ms: i64) -> Vec<ProducerBatch> {
        let mut heap = lock(&self.heap);
        let mut expired = Vec::new();
        while heap
            .entries
            .peek()
            .map_or(false, |head| head.next_retry_ms <= now_ms)
        {
            if let Some(entry) = heap.entries.pop() {
                expired.push(entry.batch);
            }
        }
        expired
    }

    /// Milliseconds until the earliest deadline; `None` when empty.
    pub fn remaining_ms(&self, now_ms: i64) -> Option<i64> {
        lock(&self.heap)
            .entries
            .peek()
            .map(|head| head.next_retry_ms - now_ms)
    }

    /// Refuses further batches and returns everything still waiting,
    /// regardless of deadline.
    pub fn close(&self) -> Vec<ProducerBatch> {
        let mut heap = lock(&self.heap);
        heap.closed = true;
        let mut all = Vec::with_capacity(heap.entries.len());
        while let Some(entry) = heap.entries.pop() {
            all.push(entry.batch);
        }
        all
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.heap).closed
    }

    pub(crate) fn notified(&self) -> tokio::sync::futures::Notified<'_> {
        self.notify.notified()
    }

    pub fn len(&self) -> usize {
        lock(&self.heap).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.heap).entries.is_empty()
    }
}
