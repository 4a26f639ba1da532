use crate::admission::MemoryController;
use crate::batch::ProducerBatch;
use crate::client::{LogClient, PutLogsRequest};
use crate::config::ProjectConfigs;
use crate::error::{codes, ServiceError};
use crate::queue::{ReadyQueue, RetryQueue};
use crate::result::Attempt;
use crate::retry::RetryPolicy;
use chrono::Utc;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

pub(crate) const ABANDONED_MESSAGE: &str = "the producer was closed before the batch could be sent";

/// State shared by every sender worker.
pub(crate) struct SendContext {
    pub(crate) client: Arc<dyn LogClient>,
    pub(crate) project_configs: Arc<ProjectConfigs>,
    pub(crate) ready_queue: Arc<ReadyQueue>,
    pub(crate) retry_queue: Arc<RetryQueue>,
    pub(crate) memory: Arc<MemoryController>,
    pub(crate) retry_policy: RetryPolicy,
    pub(crate) batch_count: Arc<AtomicUsize>,
    /// Set once shutdown starts; failed batches are no longer retried.
    pub(crate) closing: AtomicBool,
    /// Flipped when a bounded close runs out of time; calls on the wire are
    /// dropped and their batches failed.
    pub(crate) abort: watch::Sender<bool>,
}

impl SendContext {
    /// Resolves the batch's futures and callbacks and hands its memory back.
    pub(crate) fn complete(&self, batch: ProducerBatch) {
        let package_id = batch.package_id().to_string();
        match batch.last_attempt() {
            Some(attempt) if attempt.success => debug!(
                package_id = %package_id,
                count = batch.cur_batch_count(),
                attempts = batch.attempts().len(),
                "batch sent"
            ),
            Some(attempt) => error!(
                package_id = %package_id,
                group_key = %batch.group_key(),
                error_code = %attempt.error_code,
                error_message = %attempt.error_message,
                attempts = batch.attempts().len(),
                "batch failed"
            ),
            None => {}
        }
        let bytes = batch.fire_callbacks_and_set_futures();
        self.memory.release(bytes);
        self.batch_count.fetch_sub(1, Ordering::SeqCst);
    }

    /// Terminally fails a batch that will never be attempted again,
    /// keeping the last real failure when there was one.
    pub(crate) fn abandon(&self, mut batch: ProducerBatch, reason: &str) {
        let keep_last = batch.last_attempt().map_or(false, |a| !a.success);
        if !keep_last {
            batch.append_attempt(Attempt::failure(
                codes::PRODUCER_EXCEPTION,
                reason,
                Utc::now().timestamp_millis(),
                0,
            ));
        }
        self.complete(batch);
    }

    /// Fails in-flight and not yet started sends from now on.
    pub(crate) fn abort(&self) {
        self.abort.send_replace(true);
    }

    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    fn is_aborted(&self) -> bool {
        *self.abort.borrow()
    }
}

/// Spawns `count` workers pulling from the ready queue until it is closed
/// and drained.
pub(crate) fn spawn_workers(ctx: Arc<SendContext>, count: usize) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|worker| {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move {
                while let Some(batch) = ctx.ready_queue.pop().await {
                    send_batch(&ctx, batch).await;
                }
                debug!(worker, "sender worker exited");
            })
        })
        .collect()
}

async fn send_batch(ctx: &SendContext, mut batch: ProducerBatch) {
    if ctx.is_aborted() {
        ctx.abandon(batch, ABANDONED_MESSAGE);
        return;
    }
    let project = batch.group_key().project().to_string();
    let config = match ctx.project_configs.get(&project) {
        Some(config) => config,
        None => {
            batch.append_attempt(Attempt::failure(
                codes::PROJECT_CONFIG_NOT_EXIST,
                format!("Cannot get the projectConfig for project {}", project),
                Utc::now().timestamp_millis(),
                0,
            ));
            ctx.complete(batch);
            return;
        }
    };

    let started = Instant::now();
    let mut abort = ctx.abort.subscribe();
    let outcome = {
        let key = batch.group_key();
        let request = PutLogsRequest {
            log_store: key.log_store(),
            topic: key.topic(),
            source: key.source(),
            shard_hash: key.shard_hash(),
            package_id: batch.package_id(),
            items: batch.items(),
        };
        let call = AssertUnwindSafe(ctx.client.put_logs(&config, &request)).catch_unwind();
        tokio::select! {
            result = call => Some(result.unwrap_or_else(|_| {
                Err(ServiceError::new(
                    codes::PRODUCER_EXCEPTION,
                    "the log client panicked while sending the batch",
                ))
            })),
            _ = abort.wait_for(|aborted| *aborted) => None,
        }
    };
    let outcome = match outcome {
        Some(outcome) => outcome,
        None => {
            warn!(package_id = batch.package_id(), "close timed out, dropping the in-flight call");
            ctx.abandon(batch, ABANDONED_MESSAGE);
            return;
        }
    };
    let now_ms = Utc::now().timestamp_millis();
    let latency_ms = started.elapsed().as_millis() as i64;

    let err = match outcome {
        Ok(()) => {
            batch.append_attempt(Attempt::success(now_ms, latency_ms));
            ctx.complete(batch);
            return;
        }
        Err(err) => err,
    };
    batch.append_attempt(Attempt::failure(&err.code, &err.message, now_ms, latency_ms));

    if !ctx
        .retry_policy
        .should_retry(&err.code, batch.attempts().len(), ctx.is_closing())
    {
        ctx.complete(batch);
        return;
    }

    let delay_ms = ctx.retry_policy.next_delay_ms(batch.retries() as u32);
    batch.set_next_retry_ms(now_ms + delay_ms as i64);
    warn!(
        package_id = batch.package_id(),
        error_code = %err.code,
        error_message = %err.message,
        retries = batch.retries(),
        delay_ms,
        "batch failed, scheduling retry"
    );
    if let Err(batch) = ctx.retry_queue.put(batch) {
        // Shutdown closed the retry queue after the closing check above.
        ctx.complete(batch);
    }
}
