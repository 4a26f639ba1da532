use std::sync::Arc;
use std::time::Instant;

use log_producer::noop_client::NoopClient;
use log_producer::{LogItem, LogProducer, ProducerConfig, ProjectConfig, ProjectConfigs};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let configs = ProjectConfigs::from_configs([ProjectConfig::new(
        "load-project",
        "localhost",
        "id",
        "secret",
    )]);
    let producer = LogProducer::new(ProducerConfig::default(), configs, Arc::new(NoopClient))?;

    let n: u64 = 100_000;
    let start = Instant::now();

    let mut futures = Vec::with_capacity(n as usize);
    for i in 0..n {
        let item = LogItem::new()
            .with_content("iteration", i.to_string())
            .with_content("message", "default load test");
        futures.push(producer.send("load-project", "load-logstore", item).await?);
    }
    let enqueued = start.elapsed();

    producer.close().await?;
    let mut succeeded = 0u64;
    for f in futures {
        if f.await.map(|r| r.is_successful()).unwrap_or(false) {
            succeeded += 1;
        }
    }

    println!(
        "default config: enqueued {} records in {:?} (~{:.0} rec/s), {} delivered after {:?}",
        n,
        enqueued,
        n as f64 / enqueued.as_secs_f64(),
        succeeded,
        start.elapsed()
    );
    Ok(())
}
