//! The producer façade: argument checks, memory admission, routing into the
//! accumulator, and the `READY → CLOSING → CLOSED` shutdown protocol.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use log_producer::config::{ProducerConfig, ProjectConfig, ProjectConfigs};
//! use log_producer::noop_client::NoopClient;
//! use log_producer::producer::LogProducer;
//! use log_producer::record::LogItem;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let configs = ProjectConfigs::from_configs([ProjectConfig::new(
//!         "my-project", "cn-hangzhou.log.example.com", "id", "secret",
//!     )]);
//!     let producer = LogProducer::new(ProducerConfig::default(), configs, Arc::new(NoopClient))?;
//!
//!     let item = LogItem::new().with_content("level", "info").with_content("msg", "hello");
//!     let future = producer.send("my-project", "my-logstore", item).await?;
//!     producer.close().await?;
//!     println!("sent: {}", future.await?.is_successful());
//!     Ok(())
//! }
//! ```

use crate::accumulator::LogAccumulator;
use crate::admission::MemoryController;
use crate::batch::PendingAppend;
use crate::client::LogClient;
use crate::config::{ProducerConfig, ProjectConfig, ProjectConfigs};
use crate::error::ProducerError;
use crate::future::ResultFuture;
use crate::group_key::GroupKey;
use crate::mover::Mover;
use crate::queue::{ReadyQueue, RetryQueue};
use crate::record::{total_size_in_bytes, LogItem};
use crate::result::Callback;
use crate::retry::RetryPolicy;
use crate::sender::{spawn_workers, SendContext, ABANDONED_MESSAGE};
use crate::shard_hash::ShardHashAdjuster;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// How long a worker gets to wind down once a bounded close has aborted it.
const ABORT_GRACE: Duration = Duration::from_secs(1);

/// Lifecycle of a [`LogProducer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerState {
    Ready,
    Closing,
    Closed,
}

impl ProducerState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ProducerState::Ready,
            1 => ProducerState::Closing,
            _ => ProducerState::Closed,
        }
    }
}

/// Optional routing fields and completion hook of a `send`.
#[derive(Clone, Default)]
pub struct SendOptions {
    pub topic: String,
    pub source: String,
    pub shard_hash: String,
    pub callback: Option<Arc<dyn Callback>>,
}

impl SendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn shard_hash(mut self, shard_hash: impl Into<String>) -> Self {
        self.shard_hash = shard_hash.into();
        self
    }

    pub fn callback(mut self, callback: impl Callback + 'static) -> Self {
        self.callback = Some(Arc::new(callback));
        self
    }
}

struct Tasks {
    mover: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

enum Lifecycle {
    Running(Tasks),
    Closed { timed_out_ms: Option<u64> },
}

/// Asynchronous, batching log producer.
///
/// `send` only touches memory: records are admitted against
/// `total_size_in_bytes`, grouped per destination into batches and
/// dispatched by `io_thread_count` background workers. Every `send` returns
/// a [`ResultFuture`] that resolves once its batch is written or has
/// terminally failed.
///
/// Must be created inside a Tokio runtime. Call [`LogProducer::close`] to
/// flush and wait for everything in flight; dropping an open producer runs
/// the same shutdown in the background without waiting for it.
pub struct LogProducer {
    config: ProducerConfig,
    state: AtomicU8,
    memory: Arc<MemoryController>,
    accumulator: Arc<LogAccumulator>,
    ctx: Arc<SendContext>,
    shard_hash_adjuster: Option<ShardHashAdjuster>,
    batch_count: Arc<AtomicUsize>,
    lifecycle: Mutex<Lifecycle>,
}

impl LogProducer {
    pub fn new(
        config: ProducerConfig,
        project_configs: ProjectConfigs,
        client: Arc<dyn LogClient>,
    ) -> Result<Self, ProducerError> {
        config.validate()?;
        tokio::runtime::Handle::try_current().map_err(|_| ProducerError::NoRuntime)?;

        let memory = Arc::new(MemoryController::new(
            config.total_size_in_bytes,
            config.max_block_ms,
        ));
        let batch_count = Arc::new(AtomicUsize::new(0));
        let ready_queue = Arc::new(ReadyQueue::new());
        let retry_queue = Arc::new(RetryQueue::new());
        let accumulator = Arc::new(LogAccumulator::new(
            Arc::clone(&ready_queue),
            config.batch_size_threshold_in_bytes,
            config.batch_count_threshold,
            Arc::clone(&batch_count),
        ));
        let ctx = Arc::new(SendContext {
            client,
            project_configs: Arc::new(project_configs),
            ready_queue: Arc::clone(&ready_queue),
            retry_queue: Arc::clone(&retry_queue),
            memory: Arc::clone(&memory),
            retry_policy: RetryPolicy::new(&config),
            batch_count: Arc::clone(&batch_count),
            closing: AtomicBool::new(false),
            abort: watch::channel(false).0,
        });

        let (shutdown, shutdown_rx) = watch::channel(false);
        let mover = Mover::new(
            Arc::clone(&accumulator),
            retry_queue,
            ready_queue,
            config.linger_ms,
        )
        .spawn(shutdown_rx);
        let workers = spawn_workers(Arc::clone(&ctx), config.io_thread_count);
        info!(
            io_thread_count = config.io_thread_count,
            total_size_in_bytes = config.total_size_in_bytes,
            linger_ms = config.linger_ms,
            retries = config.retries,
            "log producer started"
        );

        Ok(LogProducer {
            shard_hash_adjuster: config
                .adjust_shard_hash
                .then(|| ShardHashAdjuster::new(config.buckets)),
            config,
            state: AtomicU8::new(ProducerState::Ready as u8),
            memory,
            accumulator,
            ctx,
            batch_count,
            lifecycle: Mutex::new(Lifecycle::Running(Tasks {
                mover,
                shutdown,
                workers,
            })),
        })
    }

    /// Send one record to `project`/`log_store` with empty topic, source and
    /// shard hash.
    pub async fn send(
        &self,
        project: &str,
        log_store: &str,
        item: LogItem,
    ) -> Result<ResultFuture, ProducerError> {
        self.send_with(Some(project), Some(log_store), Some(item), SendOptions::default())
            .await
    }

    /// Full form of [`LogProducer::send`].
    ///
    /// Fails synchronously with `InvalidArgument` for a missing or empty
    /// project or log store, a missing record, or a record larger than a
    /// batch; with `Timeout` when memory does not free up within
    /// `max_block_ms`; with `ProducerClosed` once `close` has started.
    pub async fn send_with(
        &self,
        project: Option<&str>,
        log_store: Option<&str>,
        item: Option<LogItem>,
        options: SendOptions,
    ) -> Result<ResultFuture, ProducerError> {
        let (project, log_store) = check_destination(project, log_store)?;
        let item = item.ok_or_else(|| ProducerError::invalid_argument("logItem cannot be null"))?;
        let size = item.size_in_bytes();
        let pending = PendingAppend::single(item, size, options.callback.clone());
        self.admit_and_append(project, log_store, &options, pending)
            .await
    }

    /// Send several records as one unit: they land in the same batch and
    /// share one future and one callback invocation.
    pub async fn send_items(
        &self,
        project: &str,
        log_store: &str,
        items: Vec<LogItem>,
        options: SendOptions,
    ) -> Result<ResultFuture, ProducerError> {
        let (project, log_store) = check_destination(Some(project), Some(log_store))?;
        if items.is_empty() {
            return Err(ProducerError::invalid_argument("logItems cannot be empty"));
        }
        let size = total_size_in_bytes(&items);
        let pending = PendingAppend {
            items,
            size_in_bytes: size,
            callback: options.callback.clone(),
        };
        self.admit_and_append(project, log_store, &options, pending)
            .await
    }

    /// Non-blocking [`LogProducer::send_with`]: fails with `Timeout` instead
    /// of waiting when memory is exhausted. Usable outside async code.
    pub fn try_send(
        &self,
        project: &str,
        log_store: &str,
        item: LogItem,
        options: SendOptions,
    ) -> Result<ResultFuture, ProducerError> {
        let (project, log_store) = check_destination(Some(project), Some(log_store))?;
        let size = item.size_in_bytes();
        let pending = PendingAppend::single(item, size, options.callback.clone());
        self.ensure_ready()?;
        self.accumulator.ensure_fits(&pending)?;
        self.memory.try_acquire(size)?;
        self.append(project, log_store, &options, pending)
    }

    /// Close every open batch now instead of waiting for linger.
    pub fn flush(&self) {
        if self.state() != ProducerState::Ready {
            return;
        }
        let batches = self.accumulator.flush_all();
        debug!(count = batches.len(), "flushing open batches");
        self.ctx.ready_queue.push_all(batches);
    }

    /// Shut down and wait until every future handed out has resolved.
    /// Idempotent; concurrent callers all wait for the same shutdown.
    pub async fn close(&self) -> Result<(), ProducerError> {
        self.close_with(None).await
    }

    /// Like [`LogProducer::close`], but bounded: once `timeout` elapses,
    /// calls still on the wire are dropped and every outstanding batch is
    /// failed with its last error (`ProducerException` if it was never
    /// attempted). A timeout too large to represent waits like `close`.
    pub async fn close_timeout(&self, timeout: Duration) -> Result<(), ProducerError> {
        self.close_with(Some(timeout)).await
    }

    async fn close_with(&self, timeout: Option<Duration>) -> Result<(), ProducerError> {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let _ = self.state.compare_exchange(
            ProducerState::Ready as u8,
            ProducerState::Closing as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );

        let mut lifecycle = self.lifecycle.lock().await;
        let tasks = match &mut *lifecycle {
            Lifecycle::Closed { timed_out_ms } => return close_outcome(*timed_out_ms),
            Lifecycle::Running(tasks) => tasks,
        };

        info!("closing log producer");
        self.state
            .store(ProducerState::Closing as u8, Ordering::SeqCst);
        self.ctx.closing.store(true, Ordering::Release);
        self.memory.close();

        // The mover moves every open and retrying batch to the ready queue,
        // then closes it so workers exit once it is drained.
        let _ = tasks.shutdown.send(true);
        if let Err(e) = (&mut tasks.mover).await {
            error!("mover task failed: {}", e);
        }

        let mut timed_out_ms = None;
        for worker in tasks.workers.iter_mut() {
            if timed_out_ms.is_none() {
                if let Some(deadline) = deadline {
                    if tokio::time::timeout_at(deadline, &mut *worker).await.is_ok() {
                        continue;
                    }
                    timed_out_ms = timeout.map(|t| t.as_millis() as u64);
                    warn!("close timed out, failing outstanding batches");
                    self.ctx.abort();
                    self.abandon_queued();
                }
            }
            if timed_out_ms.is_some() {
                // Aborted workers only outlive the grace period inside a
                // user callback.
                if tokio::time::timeout(ABORT_GRACE, &mut *worker).await.is_err() {
                    error!("sender worker did not stop after abort");
                    worker.abort();
                }
                continue;
            }
            if let Err(e) = worker.await {
                error!("sender worker failed: {}", e);
            }
        }
        // Only possible if a worker task died; resolve whatever it left.
        self.abandon_queued();

        self.state.store(ProducerState::Closed as u8, Ordering::SeqCst);
        *lifecycle = Lifecycle::Closed { timed_out_ms };
        info!(timed_out = timed_out_ms.is_some(), "log producer closed");
        close_outcome(timed_out_ms)
    }

    pub fn state(&self) -> ProducerState {
        ProducerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Batches not yet terminally completed: open, queued, on the wire or
    /// waiting for a retry.
    pub fn batch_count(&self) -> usize {
        self.batch_count.load(Ordering::SeqCst)
    }

    pub fn available_memory_in_bytes(&self) -> usize {
        self.memory.available()
    }

    pub fn in_flight_bytes(&self) -> usize {
        self.memory.in_flight()
    }

    pub fn config(&self) -> &ProducerConfig {
        &self.config
    }

    pub fn put_project_config(&self, config: ProjectConfig) {
        self.ctx.project_configs.put(config);
    }

    pub fn remove_project_config(&self, project: &str) -> Option<Arc<ProjectConfig>> {
        self.ctx.project_configs.remove(project)
    }

    fn ensure_ready(&self) -> Result<(), ProducerError> {
        match self.state() {
            ProducerState::Ready => Ok(()),
            _ => Err(ProducerError::ProducerClosed),
        }
    }

    async fn admit_and_append(
        &self,
        project: &str,
        log_store: &str,
        options: &SendOptions,
        pending: PendingAppend,
    ) -> Result<ResultFuture, ProducerError> {
        self.ensure_ready()?;
        self.accumulator.ensure_fits(&pending)?;
        self.memory.acquire(pending.size_in_bytes).await?;
        self.append(project, log_store, options, pending)
    }

    /// Appends already-admitted records, handing the memory back if the
    /// accumulator refuses them.
    fn append(
        &self,
        project: &str,
        log_store: &str,
        options: &SendOptions,
        pending: PendingAppend,
    ) -> Result<ResultFuture, ProducerError> {
        let size = pending.size_in_bytes;
        let shard_hash = match &self.shard_hash_adjuster {
            Some(adjuster) if !options.shard_hash.is_empty() => adjuster.adjust(&options.shard_hash),
            _ => options.shard_hash.clone(),
        };
        let key = GroupKey::new(
            project,
            log_store,
            options.topic.as_str(),
            options.source.as_str(),
            shard_hash,
        );
        self.accumulator.append(key, pending).map_err(|e| {
            self.memory.release(size);
            e
        })
    }

    fn abandon_queued(&self) {
        for batch in self.ctx.ready_queue.drain() {
            self.ctx.abandon(batch, ABANDONED_MESSAGE);
        }
    }
}

impl Drop for LogProducer {
    fn drop(&mut self) {
        if self.state() == ProducerState::Ready {
            // Dropping the lifecycle drops the shutdown sender, which stops
            // the mover; the workers then drain the ready queue and exit.
            self.ctx.closing.store(true, Ordering::Release);
            self.memory.close();
        }
    }
}

fn close_outcome(timed_out_ms: Option<u64>) -> Result<(), ProducerError> {
    match timed_out_ms {
        Some(timeout_ms) => Err(ProducerError::CloseTimeout { timeout_ms }),
        None => Ok(()),
    }
}

fn check_destination<'a>(
    project: Option<&'a str>,
    log_store: Option<&'a str>,
) -> Result<(&'a str, &'a str), ProducerError> {
    let project = check_not_empty(project, "project")?;
    let log_store = check_not_empty(log_store, "logStore")?;
    Ok((project, log_store))
}

fn check_not_empty<'a>(value: Option<&'a str>, name: &str) -> Result<&'a str, ProducerError> {
    match value {
        None => Err(ProducerError::invalid_argument(format!("{} cannot be null", name))),
        Some("") => Err(ProducerError::invalid_argument(format!("{} cannot be empty", name))),
        Some(v) => Ok(v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::noop_client::NoopClient;

    fn producer(config: ProducerConfig) -> LogProducer {
        let configs = ProjectConfigs::from_configs([ProjectConfig::new("p", "endpoint", "id", "secret")]);
        LogProducer::new(config, configs, Arc::new(NoopClient)).unwrap()
    }

    #[test]
    fn destination_checks_distinguish_null_and_empty() {
        let err = check_destination(None, Some("ls")).unwrap_err();
        assert_eq!(err.to_string(), "project cannot be null");
        let err = check_destination(Some(""), Some("ls")).unwrap_err();
        assert_eq!(err.to_string(), "project cannot be empty");
        let err = check_destination(Some("p"), None).unwrap_err();
        assert_eq!(err.to_string(), "logStore cannot be null");
        let err = check_destination(Some("p"), Some("")).unwrap_err();
        assert_eq!(err.to_string(), "logStore cannot be empty");
        assert!(check_destination(Some("p"), Some("ls")).is_ok());
    }

    #[test]
    fn requires_a_runtime() {
        let result = LogProducer::new(
            ProducerConfig::default(),
            ProjectConfigs::new(),
            Arc::new(NoopClient),
        );
        assert!(matches!(result, Err(ProducerError::NoRuntime)));
    }

    #[tokio::test]
    async fn rejects_invalid_config() {
        let result = LogProducer::new(
            ProducerConfig::new().with_linger_ms(1),
            ProjectConfigs::new(),
            Arc::new(NoopClient),
        );
        assert!(matches!(result, Err(ProducerError::Config(_))));
    }

    #[tokio::test]
    async fn shard_hash_is_adjusted_only_when_enabled() {
        let p = producer(ProducerConfig::new().with_buckets(16));
        let f = p
            .send_with(
                Some("p"),
                Some("ls"),
                Some(LogItem::new()),
                SendOptions::new().shard_hash("user-1"),
            )
            .await
            .unwrap();
        p.close().await.unwrap();
        assert!(f.await.unwrap().is_successful());

        let p = producer(ProducerConfig::new().with_adjust_shard_hash(false));
        assert!(p.shard_hash_adjuster.is_none());
        p.close().await.unwrap();
    }

    #[tokio::test]
    async fn flush_dispatches_without_waiting_for_linger() {
        let p = producer(ProducerConfig::new().with_linger_ms(60_000));
        let mut f = p.send("p", "ls", LogItem::new()).await.unwrap();
        p.flush();
        let result = f.wait_timeout(Duration::from_secs(5)).await.unwrap().unwrap();
        assert!(result.is_successful());
        assert_eq!(p.in_flight_bytes(), 0);
        p.close().await.unwrap();
    }

    #[tokio::test]
    async fn send_after_close_fails_fast() {
        let p = producer(ProducerConfig::default());
        p.close().await.unwrap();
        assert_eq!(p.state(), ProducerState::Closed);
        assert!(matches!(
            p.send("p", "ls", LogItem::new()).await,
            Err(ProducerError::ProducerClosed)
        ));
        assert!(matches!(
            p.try_send("p", "ls", LogItem::new(), SendOptions::new()),
            Err(ProducerError::ProducerClosed)
        ));
    }
}
