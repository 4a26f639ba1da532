use crate::future::{result_channel, ResultFuture, ResultSender};
use crate::group_key::GroupKey;
use crate::record::LogItem;
use crate::result::{Attempt, Callback, ProduceResult};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::error;

/// Records of one `send` call waiting to join a batch.
///
/// Handed back unchanged by [`ProducerBatch::try_append`] when the batch has
/// no room, so the accumulator can retry on a fresh batch.
pub(crate) struct PendingAppend {
    pub(crate) items: Vec<LogItem>,
    pub(crate) size_in_bytes: usize,
    pub(crate) callback: Option<Arc<dyn Callback>>,
}

impl PendingAppend {
    pub(crate) fn single(item: LogItem, size_in_bytes: usize, callback: Option<Arc<dyn Callback>>) -> Self {
        PendingAppend {
            items: vec![item],
            size_in_bytes,
            callback,
        }
    }

    pub(crate) fn count(&self) -> usize {
        self.items.len()
    }
}

impl fmt::Debug for PendingAppend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingAppend")
            .field("items", &self.items.len())
            .field("size_in_bytes", &self.size_in_bytes)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

/// Completion hooks of one `send` call.
struct Thunk {
    callback: Option<Arc<dyn Callback>>,
    sender: ResultSender,
}

/// Records bound for one [`GroupKey`], sent together in a single
/// `put_logs` call.
///
/// Open while owned by the accumulator; afterwards its content never
/// changes and only the attempt history and retry deadline move.
pub struct ProducerBatch {
    group_key: GroupKey,
    package_id: String,
    max_batch_size_in_bytes: usize,
    max_batch_count: usize,
    items: Vec<LogItem>,
    thunks: Vec<Thunk>,
    created_ms: i64,
    next_retry_ms: i64,
    cur_batch_size_in_bytes: usize,
    cur_batch_count: usize,
    attempts: Vec<Attempt>,
}

impl ProducerBatch {
    pub fn new(
        group_key: GroupKey,
        package_id: String,
        max_batch_size_in_bytes: usize,
        max_batch_count: usize,
        now_ms: i64,
    ) -> Self {
        ProducerBatch {
            group_key,
            package_id,
            max_batch_size_in_bytes,
            max_batch_count,
            items: Vec::new(),
            thunks: Vec::new(),
            created_ms: now_ms,
            next_retry_ms: 0,
            cur_batch_size_in_bytes: 0,
            cur_batch_count: 0,
            attempts: Vec::new(),
        }
    }

    /// Appends the records if both caps still allow them; otherwise hands
    /// them back untouched.
    pub(crate) fn try_append(&mut self, pending: PendingAppend) -> Result<ResultFuture, PendingAppend> {
        if !self.has_room_for(pending.size_in_bytes, pending.count()) {
            return Err(pending);
        }
        let (sender, future) = result_channel();
        self.cur_batch_count += pending.count();
        self.cur_batch_size_in_bytes += pending.size_in_bytes;
        self.items.extend(pending.items);
        self.thunks.push(Thunk {
            callback: pending.callback,
            sender,
        });
        Ok(future)
    }

    /// Both caps reached. A batch can stop accepting records well before
    /// this holds, because `try_append` rejects on either cap.
    #[cfg(test)]
    pub(crate) fn is_full(&self) -> bool {
        self.cur_batch_size_in_bytes >= self.max_batch_size_in_bytes
            && self.cur_batch_count >= self.max_batch_count
    }

    /// Either cap reached: no record with a non-zero size can join anymore.
    pub fn has_reached_cap(&self) -> bool {
        self.cur_batch_size_in_bytes >= self.max_batch_size_in_bytes
            || self.cur_batch_count >= self.max_batch_count
    }

    pub fn append_attempt(&mut self, attempt: Attempt) {
        self.attempts.push(attempt);
    }

    /// Milliseconds until the linger deadline; zero or negative once expired.
    pub fn remaining_ms(&self, now_ms: i64, linger_ms: i64) -> i64 {
        linger_ms - (now_ms - self.created_ms).max(0)
    }

    pub fn retry_remaining_ms(&self, now_ms: i64) -> i64 {
        self.next_retry_ms - now_ms
    }

    /// Resolves every callback and future with the outcome of the last
    /// attempt, in append order, and returns the bytes to give back to the
    /// memory controller.
    pub(crate) fn fire_callbacks_and_set_futures(self) -> usize {
        let ProducerBatch {
            group_key,
            thunks,
            attempts,
            cur_batch_size_in_bytes,
            ..
        } = self;
        let result = ProduceResult::from_attempts(group_key.project(), group_key.log_store(), attempts);
        for thunk in &thunks {
            if let Some(callback) = &thunk.callback {
                let fired = catch_unwind(AssertUnwindSafe(|| callback.on_completion(&result)));
                if fired.is_err() {
                    error!(group_key = %group_key, "failed to execute user-provided callback");
                }
            }
        }
        for thunk in thunks {
            thunk.sender.complete(&result);
        }
        cur_batch_size_in_bytes
    }

    pub fn group_key(&self) -> &GroupKey {
        &self.group_key
    }

    pub fn package_id(&self) -> &str {
        &self.package_id
    }

    pub fn items(&self) -> &[LogItem] {
        &self.items
    }

    pub fn created_ms(&self) -> i64 {
        self.created_ms
    }

    pub fn next_retry_ms(&self) -> i64 {
        self.next_retry_ms
    }

    pub fn set_next_retry_ms(&mut self, next_retry_ms: i64) {
        self.next_retry_ms = next_retry_ms;
    }

    pub fn cur_batch_size_in_bytes(&self) -> usize {
        self.cur_batch_size_in_bytes
    }

    pub fn cur_batch_count(&self) -> usize {
        self.cur_batch_count
    }

    pub fn attempts(&self) -> &[Attempt] {
        &self.attempts
    }

    pub fn last_attempt(&self) -> Option<&Attempt> {
        self.attempts.last()
    }

    pub fn retries(&self) -> usize {
        self.attempts.len().saturating_sub(1)
    }

    fn has_room_for(&self, size_in_bytes: usize, count: usize) -> bool {
        self.cur_batch_size_in_bytes + size_in_bytes <= self.max_batch_size_in_bytes
            && self.cur_batch_count + count <= self.max_batch_count
    }
}

impl fmt::Debug for ProducerBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProducerBatch")
            .field("group_key", &self.group_key)
            .field("package_id", &self.package_id)
            .field("max_batch_size_in_bytes", &self.max_batch_size_in_bytes)
            .field("max_batch_count", &self.max_batch_count)
            .field("created_ms", &self.created_ms)
            .field("next_retry_ms", &self.next_retry_ms)
            .field("cur_batch_size_in_bytes", &self.cur_batch_size_in_bytes)
            .field("cur_batch_count", &self.cur_batch_count)
            .field("attempts", &self.attempts)
            .finish()
    }
}
