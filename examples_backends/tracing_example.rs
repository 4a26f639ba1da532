use std::sync::Arc;

use log_producer::init::{init_tracing_with_config, LayerConfig};
use log_producer::layer::Destination;
use log_producer::noop_client::NoopClient;
use log_producer::{LogProducer, ProducerConfig, ProjectConfig, ProjectConfigs};
use tracing::{error, info, warn, Level};

/// Route the application's own `tracing` events through the producer.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let configs = ProjectConfigs::from_configs([ProjectConfig::new(
        "demo", "localhost", "id", "secret",
    )]);
    let producer = Arc::new(LogProducer::new(
        ProducerConfig::default(),
        configs,
        Arc::new(NoopClient),
    )?);

    init_tracing_with_config(
        Arc::clone(&producer),
        Destination::new("demo", "app-logs").with_topic("tracing"),
        LayerConfig {
            max_level: Level::WARN,
            enable_stdout: true,
        },
    )?;

    info!("not shipped, below WARN");
    warn!(latency_ms = 1200, "slow upstream");
    error!(order_id = 42, "payment failed");

    producer.close().await?;
    println!("open batches after close: {}", producer.batch_count());
    Ok(())
}
