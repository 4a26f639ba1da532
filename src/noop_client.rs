use crate::client::{LogClient, PutLogsRequest};
use crate::config::ProjectConfig;
use crate::error::ServiceError;
use async_trait::async_trait;

/// A client that accepts every batch without doing any I/O.
///
/// Useful for measuring the overhead of the producer itself and for tests
/// that don't care about delivery.
#[derive(Clone, Default)]
pub struct NoopClient;

#[async_trait]
impl LogClient for NoopClient {
    async fn put_logs(
        &self,
        _project: &ProjectConfig,
        _request: &PutLogsRequest<'_>,
    ) -> Result<(), ServiceError> {
        Ok(())
    }
}
