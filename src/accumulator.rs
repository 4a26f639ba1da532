use crate::batch::{PendingAppend, ProducerBatch};
use crate::error::ProducerError;
use crate::future::ResultFuture;
use crate::group_key::GroupKey;
use crate::queue::ReadyQueue;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

static PRODUCER_INSTANCE: AtomicU64 = AtomicU64::new(0);

/// Issues `{producer_hash}-{counter}` package ids.
///
/// The hash tells producers (processes, instances) apart in service-side
/// logs; the counter orders batches of one producer.
#[derive(Debug)]
pub struct PackageIdGenerator {
    producer_hash: String,
    next: AtomicU64,
}

impl PackageIdGenerator {
    pub fn new() -> Self {
        let seed = format!(
            "{}-{}-{}",
            std::process::id(),
            Utc::now().timestamp_nanos_opt().unwrap_or_default(),
            PRODUCER_INSTANCE.fetch_add(1, Ordering::Relaxed)
        );
        let digest = Sha256::digest(seed.as_bytes());
        let producer_hash = digest[..8].iter().map(|b| format!("{:02X}", b)).collect();
        PackageIdGenerator {
            producer_hash,
            next: AtomicU64::new(0),
        }
    }

    pub fn next_id(&self) -> String {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{}-{:X}", self.producer_hash, id)
    }
}

impl Default for PackageIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

struct Batches {
    open: HashMap<GroupKey, ProducerBatch>,
    closed: bool,
}

/// Holds at most one open batch per [`GroupKey`] and closes batches onto
/// the ready queue when they run out of room.
pub struct LogAccumulator {
    batches: Mutex<Batches>,
    ready_queue: Arc<ReadyQueue>,
    batch_size_threshold_in_bytes: usize,
    batch_count_threshold: usize,
    package_ids: PackageIdGenerator,
    batch_count: Arc<AtomicUsize>,
}

impl LogAccumulator {
    pub fn new(
        ready_queue: Arc<ReadyQueue>,
        batch_size_threshold_in_bytes: usize,
        batch_count_threshold: usize,
        batch_count: Arc<AtomicUsize>,
    ) -> Self {
        LogAccumulator {
            batches: Mutex::new(Batches {
                open: HashMap::new(),
                closed: false,
            }),
            ready_queue,
            batch_size_threshold_in_bytes,
            batch_count_threshold,
            package_ids: PackageIdGenerator::new(),
            batch_count,
        }
    }

    /// Adds the records to the open batch of `group_key`, rolling over to a
    /// fresh batch when the current one has no room.
    pub(crate) fn append(
        &self,
        group_key: GroupKey,
        pending: PendingAppend,
    ) -> Result<ResultFuture, ProducerError> {
        self.ensure_fits(&pending)?;
        let mut batches = self.lock();
        if batches.closed {
            return Err(ProducerError::ProducerClosed);
        }

        let pending = match batches.open.get_mut(&group_key) {
            Some(batch) => match batch.try_append(pending) {
                Ok(future) => {
                    if batch.has_reached_cap() {
                        if let Some(batch) = batches.open.remove(&group_key) {
                            self.close_batch(batch, "full");
                        }
                    }
                    return Ok(future);
                }
                Err(pending) => {
                    if let Some(batch) = batches.open.remove(&group_key) {
                        self.close_batch(batch, "no room");
                    }
                    pending
                }
            },
            None => pending,
        };

        let mut batch = ProducerBatch::new(
            group_key.clone(),
            self.package_ids.next_id(),
            self.batch_size_threshold_in_bytes,
            self.batch_count_threshold,
            Utc::now().timestamp_millis(),
        );
        let future = batch.try_append(pending).map_err(|p| {
            ProducerError::invalid_argument(format!(
                "{} records of {} bytes do not fit into an empty batch",
                p.count(),
                p.size_in_bytes
            ))
        })?;
        self.batch_count.fetch_add(1, Ordering::SeqCst);
        if batch.has_reached_cap() {
            self.close_batch(batch, "full");
        } else {
            batches.open.insert(group_key, batch);
        }
        Ok(future)
    }

    /// Removes and returns every open batch whose linger time has elapsed.
    pub fn expired(&self, now_ms: i64, linger_ms: i64) -> Vec<ProducerBatch> {
        let mut batches = self.lock();
        let keys: Vec<GroupKey> = batches
            .open
            .iter()
            .filter(|(_, b)| b.remaining_ms(now_ms, linger_ms) <= 0)
            .map(|(k, _)| k.clone())
            .collect();
        keys.iter()
            .filter_map(|k| batches.open.remove(k))
            .collect()
    }

    /// Milliseconds until the earliest open batch expires; `linger_ms` when
    /// nothing is open.
    pub fn remaining(&self, now_ms: i64, linger_ms: i64) -> i64 {
        self.lock()
            .open
            .values()
            .map(|b| b.remaining_ms(now_ms, linger_ms))
            .min()
            .unwrap_or(linger_ms)
    }

    /// Closes every open batch without refusing further appends.
    pub fn flush_all(&self) -> Vec<ProducerBatch> {
        self.lock().open.drain().map(|(_, b)| b).collect()
    }

    /// Closes every open batch and refuses all further appends.
    pub fn drain_all(&self) -> Vec<ProducerBatch> {
        let mut batches = self.lock();
        batches.closed = true;
        batches.open.drain().map(|(_, b)| b).collect()
    }

    pub fn open_batch_count(&self) -> usize {
        self.lock().open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().open.is_empty()
    }

    pub(crate) fn ensure_fits(&self, pending: &PendingAppend) -> Result<(), ProducerError> {
        if pending.size_in_bytes > self.batch_size_threshold_in_bytes {
            return Err(ProducerError::invalid_argument(format!(
                "the log size {} is larger than batchSizeThresholdInBytes {}",
                pending.size_in_bytes, self.batch_size_threshold_in_bytes
            )));
        }
        if pending.count() > self.batch_count_threshold {
            return Err(ProducerError::invalid_argument(format!(
                "the log count {} is larger than batchCountThreshold {}",
                pending.count(),
                self.batch_count_threshold
            )));
        }
        Ok(())
    }

    fn close_batch(&self, batch: ProducerBatch, reason: &'static str) {
        debug!(
            package_id = batch.package_id(),
            group_key = %batch.group_key(),
            count = batch.cur_batch_count(),
            bytes = batch.cur_batch_size_in_bytes(),
            reason,
            "closing batch"
        );
        self.ready_queue.push(batch);
    }

    fn lock(&self) -> MutexGuard<'_, Batches> {
        match self.batches.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::LogItem;
    use std::collections::HashSet;

    fn accumulator(max_bytes: usize, max_count: usize) -> (LogAccumulator, Arc<ReadyQueue>) {
        let ready = Arc::new(ReadyQueue::new());
        let acc = LogAccumulator::new(Arc::clone(&ready), max_bytes, max_count, Arc::new(AtomicUsize::new(0)));
        (acc, ready)
    }

    fn key(n: usize) -> GroupKey {
        GroupKey::new("p", format!("ls-{}", n), "", "", "")
    }

    fn pending(size: usize) -> PendingAppend {
        PendingAppend::single(LogItem::with_time(0), size, None)
    }

    #[test]
    fn package_ids_are_unique_and_increasing() {
        let ids = PackageIdGenerator::new();
        let first = ids.next_id();
        let second = ids.next_id();
        assert_ne!(first, second);
        assert!(first.ends_with("-0"));
        assert!(second.ends_with("-1"));
        assert_eq!(first.split('-').next().unwrap().len(), 16);
        assert_ne!(
            PackageIdGenerator::new().next_id(),
            PackageIdGenerator::new().next_id()
        );
    }

    #[test]
    fn appends_share_one_open_batch_per_key() {
        let (acc, ready) = accumulator(1000, 10);
        for _ in 0..3 {
            acc.append(key(0), pending(10)).unwrap();
        }
        acc.append(key(1), pending(10)).unwrap();
        assert_eq!(acc.open_batch_count(), 2);
        assert!(ready.is_empty());
    }

    #[test]
    fn rolls_over_when_the_next_record_does_not_fit() {
        let (acc, ready) = accumulator(100, 10);
        acc.append(key(0), pending(60)).unwrap();
        acc.append(key(0), pending(60)).unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(acc.open_batch_count(), 1);
        let closed = ready.try_pop().unwrap();
        assert_eq!(closed.cur_batch_size_in_bytes(), 60);
    }

    #[test]
    fn closes_immediately_when_a_cap_is_reached() {
        let (acc, ready) = accumulator(100, 2);
        acc.append(key(0), pending(100)).unwrap();
        assert_eq!(ready.len(), 1);
        assert!(acc.is_empty());

        acc.append(key(0), pending(1)).unwrap();
        acc.append(key(0), pending(1)).unwrap();
        assert_eq!(ready.len(), 2);
        assert!(acc.is_empty());
    }

    #[test]
    fn rejects_records_larger_than_a_batch() {
        let (acc, _) = accumulator(100, 2);
        let err = acc.append(key(0), pending(101)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "the log size 101 is larger than batchSizeThresholdInBytes 100"
        );
        let items = vec![LogItem::with_time(0); 3];
        let err = acc
            .append(key(0), PendingAppend { items, size_in_bytes: 12, callback: None })
            .unwrap_err();
        assert!(matches!(err, ProducerError::InvalidArgument(_)));
    }

    #[test]
    fn expired_returns_only_lingered_batches() {
        let (acc, _) = accumulator(1000, 10);
        acc.append(key(0), pending(10)).unwrap();
        let now = Utc::now().timestamp_millis();
        assert!(acc.expired(now, 10_000).is_empty());
        assert!(acc.remaining(now, 10_000) > 9_000);
        let expired = acc.expired(now + 10_000, 10_000);
        assert_eq!(expired.len(), 1);
        assert!(acc.is_empty());
        assert_eq!(acc.remaining(now, 500), 500);
    }

    #[test]
    fn drain_all_refuses_later_appends() {
        let (acc, _) = accumulator(1000, 10);
        acc.append(key(0), pending(10)).unwrap();
        acc.append(key(1), pending(10)).unwrap();
        assert_eq!(acc.flush_all().len(), 2);
        acc.append(key(0), pending(10)).unwrap();
        assert_eq!(acc.drain_all().len(), 1);
        assert!(matches!(
            acc.append(key(0), pending(10)),
            Err(ProducerError::ProducerClosed)
        ));
    }

    #[test]
    fn concurrent_appends_keep_one_open_batch_per_key() {
        let (acc, ready) = accumulator(10_000, 7);
        let acc = Arc::new(acc);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let acc = Arc::clone(&acc);
                std::thread::spawn(move || {
                    for i in 0..500 {
                        acc.append(key(i % 4), pending(3)).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let mut total = 0;
        let mut ids = HashSet::new();
        while let Some(batch) = ready.try_pop() {
            assert!(batch.cur_batch_count() <= 7);
            total += batch.cur_batch_count();
            assert!(ids.insert(batch.package_id().to_string()));
        }
        assert!(acc.open_batch_count() <= 4);
        for batch in acc.drain_all() {
            total += batch.cur_batch_count();
        }
        assert_eq!(total, 4000);
    }
}
