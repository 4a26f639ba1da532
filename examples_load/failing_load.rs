use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use log_producer::client::{LogClient, PutLogsRequest};
use log_producer::{
    LogItem, LogProducer, ProduceResult, ProducerConfig, ProjectConfig, ProjectConfigs,
    SendOptions, ServiceError,
};

/// Client whose service is always unreachable, to exercise retries and
/// backoff under load.
struct UnreachableClient {
    calls: AtomicU64,
}

#[async_trait]
impl LogClient for UnreachableClient {
    async fn put_logs(
        &self,
        project: &ProjectConfig,
        _request: &PutLogsRequest<'_>,
    ) -> Result<(), ServiceError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Err(ServiceError::request_error(format!(
            "{}.{}",
            project.project, project.endpoint
        )))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let client = Arc::new(UnreachableClient {
        calls: AtomicU64::new(0),
    });
    let config = ProducerConfig::new()
        .with_retries(3)
        .with_base_retry_backoff_ms(10)
        .with_max_retry_backoff_ms(100)
        .with_linger_ms(100);
    let configs = ProjectConfigs::from_configs([ProjectConfig::new(
        "project", "endpoint", "id", "secret",
    )]);
    let producer = LogProducer::new(config, configs, Arc::clone(&client) as Arc<dyn LogClient>)?;

    let failed = Arc::new(AtomicU64::new(0));
    let n = 10_000;
    let start = Instant::now();
    for i in 0..n {
        let failed = Arc::clone(&failed);
        let options = SendOptions::new().callback(move |result: &ProduceResult| {
            if !result.is_successful() {
                failed.fetch_add(1, Ordering::Relaxed);
            }
        });
        let item = LogItem::new().with_content("iteration", i.to_string());
        producer
            .send_with(Some("project"), Some("logstore"), Some(item), options)
            .await?;
    }
    producer.close().await?;

    println!(
        "failing backend: {} records failed, {} client calls, {:?} elapsed, {} bytes still reserved",
        failed.load(Ordering::Relaxed),
        client.calls.load(Ordering::Relaxed),
        start.elapsed(),
        producer.in_flight_bytes()
    );
    Ok(())
}
