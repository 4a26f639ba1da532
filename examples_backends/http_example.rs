use std::sync::Arc;

use log_producer::env::{env_or, project_config_from_env};
use log_producer::http::{HttpClientConfig, HttpLogClient};
use log_producer::{LogItem, LogProducer, ProducerConfig, ProjectConfigs, SendOptions};

/// Ships a few records to a real service. Configure it through the
/// `LOG_PRODUCER_*` environment variables, e.g.
///
/// ```bash
/// LOG_PRODUCER_PROJECT=my-project \
/// LOG_PRODUCER_ENDPOINT=cn-hangzhou.log.aliyuncs.com \
/// LOG_PRODUCER_ACCESS_KEY_ID=... \
/// LOG_PRODUCER_ACCESS_KEY_SECRET=... \
/// LOG_STORE=my-logstore \
/// cargo run --example http_example
/// ```
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let project = match project_config_from_env() {
        Some(project) => project,
        None => {
            eprintln!("set LOG_PRODUCER_PROJECT, LOG_PRODUCER_ENDPOINT and the access key variables");
            return Ok(());
        }
    };
    let project_name = project.project.clone();
    let log_store = env_or("LOG_STORE", "test-logstore");

    let client = HttpLogClient::new(HttpClientConfig::default());
    let producer = LogProducer::new(
        ProducerConfig::new().with_retries(3),
        ProjectConfigs::from_configs([project]),
        Arc::new(client),
    )?;

    let options = SendOptions::new().topic("http-example").source("localhost");
    let items = (0..10)
        .map(|i| LogItem::new().with_content("index", i.to_string()))
        .collect();
    let future = producer
        .send_items(&project_name, &log_store, items, options)
        .await?;
    producer.close().await?;

    match future.await {
        Ok(result) => println!("sent after {} attempt(s)", result.attempts().len()),
        Err(e) => println!("send failed: {}", e),
    }
    Ok(())
}
