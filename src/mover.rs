use crate::accumulator::LogAccumulator;
use crate::queue::{ReadyQueue, RetryQueue};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::debug;

/// Background task promoting linger-expired open batches and backoff-expired
/// retries onto the ready queue.
pub struct Mover {
    accumulator: Arc<LogAccumulator>,
    retry_queue: Arc<RetryQueue>,
    ready_queue: Arc<ReadyQueue>,
    linger_ms: i64,
}

impl Mover {
    pub fn new(
        accumulator: Arc<LogAccumulator>,
        retry_queue: Arc<RetryQueue>,
        ready_queue: Arc<ReadyQueue>,
        linger_ms: u64,
    ) -> Self {
        Mover {
            accumulator,
            retry_queue,
            ready_queue,
            linger_ms: linger_ms as i64,
        }
    }

    /// Spawns the mover loop. Sending `true` on the watch channel (or
    /// dropping its sender) makes the mover hand every remaining batch,
    /// open or waiting for retry, to the ready queue, close it and exit.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            let wait_ms = self.move_expired();
            tokio::select! {
                _ = sleep(Duration::from_millis(wait_ms)) => {}
                _ = self.retry_queue.notified() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        let open = self.accumulator.drain_all();
        let retries = self.retry_queue.close();
        debug!(
            open = open.len(),
            retries = retries.len(),
            "mover shutting down, moving remaining batches"
        );
        self.ready_queue.push_all(open);
        self.ready_queue.push_all(retries);
        // Nothing feeds the ready queue anymore: appends are refused and
        // retries go straight to completion.
        self.ready_queue.close();
    }

    /// Moves what is due and returns how long to sleep before the next
    /// deadline, never longer than the linger time.
    fn move_expired(&self) -> u64 {
        let now_ms = Utc::now().timestamp_millis();
        let expired = self.accumulator.expired(now_ms, self.linger_ms);
        if !expired.is_empty() {
            debug!(count = expired.len(), "moving linger-expired batches");
            self.ready_queue.push_all(expired);
        }
        let due = self.retry_queue.expired(now_ms);
        if !due.is_empty() {
            debug!(count = due.len(), "moving batches due for retry");
            self.ready_queue.push_all(due);
        }

        let now_ms = Utc::now().timestamp_millis();
        let next = self
            .accumulator
            .remaining(now_ms, self.linger_ms)
            .min(self.retry_queue.remaining_ms(now_ms).unwrap_or(self.linger_ms))
            .min(self.linger_ms);
        next.max(1) as u64
    }
}
