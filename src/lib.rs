//! Asynchronous, batching log producer.
//!
//! Applications hand individual records to a [`LogProducer`]; records are
//! grouped per destination into batches, dispatched by a pool of background
//! workers through a [`LogClient`](client::LogClient), retried with
//! exponential backoff, and reported back through a
//! [`ResultFuture`](future::ResultFuture) and optional callback.

pub mod error;
pub mod record;
pub mod result;
pub mod future;
pub mod config;
pub mod group_key;
pub mod shard_hash;
pub mod batch;
pub mod admission;
pub mod accumulator;
pub mod queue;
pub mod retry;
pub mod client;
pub mod noop_client;
mod sender;
mod mover;
pub mod producer;
pub mod layer;
pub mod init;
pub mod env;

#[cfg(feature = "http")]
pub mod http;

pub use config::{ProducerConfig, ProjectConfig, ProjectConfigs};
pub use error::{ProducerError, ResultFailed, ServiceError};
pub use producer::{LogProducer, ProducerState, SendOptions};
pub use record::{LogContent, LogItem};
pub use result::{Attempt, Callback, ProduceResult};
