use crate::config::ProjectConfig;
use crate::error::ServiceError;
use crate::record::LogItem;
use async_trait::async_trait;

/// One `put_logs` call: every record of a batch, addressed to a log store
/// of the project whose [`ProjectConfig`] accompanies the request.
#[derive(Debug, Clone, Copy)]
pub struct PutLogsRequest<'a> {
    pub log_store: &'a str,
    pub topic: &'a str,
    pub source: &'a str,
    /// Empty when the service should pick the shard.
    pub shard_hash: &'a str,
    pub package_id: &'a str,
    pub items: &'a [LogItem],
}

/// Transport that writes a batch to the log service.
///
/// Implementations own the wire protocol (HTTP, signing, compression); the
/// producer only sees success or a [`ServiceError`] whose `code` decides
/// whether the batch is retried.
#[async_trait]
pub trait LogClient: Send + Sync {
    /// Write all records of `request` in a single call.
    ///
    /// **Returns**
    /// - `Ok(())` if the service accepted the records.
    /// - `Err(..)` with the service error code and message, or
    ///   [`ServiceError::request_error`] when the request never got an
    ///   answer.
    ///
    /// Called from a sender worker. A panic is caught and turned into a
    /// `ProducerException` attempt.
    async fn put_logs(
        &self,
        project: &ProjectConfig,
        request: &PutLogsRequest<'_>,
    ) -> Result<(), ServiceError>;
}
