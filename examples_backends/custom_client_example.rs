use std::sync::Arc;

use async_trait::async_trait;
use log_producer::client::{LogClient, PutLogsRequest};
use log_producer::{LogItem, LogProducer, ProducerConfig, ProjectConfig, ProjectConfigs, ServiceError};

/// Example of plugging in a completely custom transport by implementing
/// the `LogClient` trait directly. Imagine this talks to some proprietary
/// service for which this crate does not provide a built-in client.
struct StdoutClient;

#[async_trait]
impl LogClient for StdoutClient {
    async fn put_logs(
        &self,
        project: &ProjectConfig,
        request: &PutLogsRequest<'_>,
    ) -> Result<(), ServiceError> {
        // Here you would call your own client library. For the sake of
        // example we just print the batch.
        println!(
            "[stdout-client] {}/{} package={} records={}",
            project.project,
            request.log_store,
            request.package_id,
            request.items.len()
        );
        for item in request.items {
            println!("  {:?}", item.contents);
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let configs = ProjectConfigs::from_configs([ProjectConfig::new(
        "demo", "localhost", "id", "secret",
    )]);
    let producer = LogProducer::new(ProducerConfig::default(), configs, Arc::new(StdoutClient))?;

    let mut futures = Vec::new();
    for user in ["alice", "bob", "carol"] {
        let item = LogItem::new()
            .with_content("user", user)
            .with_content("event", "login");
        futures.push(producer.send("demo", "audit", item).await?);
    }
    producer.close().await?;

    for f in futures {
        let result = f.await?;
        println!("delivered after {} attempt(s)", result.attempts().len());
    }
    Ok(())
}
