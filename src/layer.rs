use crate::producer::{LogProducer, SendOptions};
use crate::record::LogItem;
use std::sync::{Arc, atomic::{AtomicU64, Ordering}};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// Where a [`ProducerLayer`] ships the events it captures.
#[derive(Clone, Debug)]
pub struct Destination {
    pub project: String,
    pub log_store: String,
    pub topic: String,
    pub source: String,
}

impl Destination {
    pub fn new(project: impl Into<String>, log_store: impl Into<String>) -> Self {
        Destination {
            project: project.into(),
            log_store: log_store.into(),
            topic: String::new(),
            source: String::new(),
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }
}

/// `tracing_subscriber` layer that turns events into [`LogItem`]s and hands
/// them to a [`LogProducer`].
///
/// Uses the non-blocking `try_send`, so an event is dropped (and counted)
/// rather than stalling the application when producer memory is exhausted
/// or the producer is closed. Events emitted by this crate itself are
/// ignored to avoid feeding the producer its own diagnostics.
pub struct ProducerLayer {
    producer: Arc<LogProducer>,
    destination: Destination,
    max_level: Level,
    /// Total events seen by the layer (before filtering by level).
    pub total_events: Arc<AtomicU64>,
    /// Accepted by the producer.
    pub enqueued_events: Arc<AtomicU64>,
    /// Refused by the producer.
    pub dropped_events: Arc<AtomicU64>,
}

impl ProducerLayer {
    /// Captures events at `max_level` and more severe.
    pub fn new(producer: Arc<LogProducer>, destination: Destination, max_level: Level) -> Self {
        Self {
            producer,
            destination,
            max_level,
            total_events: Arc::new(AtomicU64::new(0)),
            enqueued_events: Arc::new(AtomicU64::new(0)),
            dropped_events: Arc::new(AtomicU64::new(0)),
        }
    }

    fn options(&self) -> SendOptions {
        SendOptions::new()
            .topic(self.destination.topic.as_str())
            .source(self.destination.source.as_str())
    }
}

impl<S> Layer<S> for ProducerLayer
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_event(&self, event: &Event, _ctx: Context<'_, S>) {
        self.total_events.fetch_add(1, Ordering::Relaxed);
        let meta = event.metadata();
        if *meta.level() > self.max_level || meta.target().starts_with("log_producer") {
            return;
        }

        let mut item = LogItem::new();
        item.push_back("__level__", meta.level().as_str());
        item.push_back("__target__", meta.target());
        let mut visitor = FieldVisitor { item: &mut item };
        event.record(&mut visitor);

        match self.producer.try_send(
            &self.destination.project,
            &self.destination.log_store,
            item,
            self.options(),
        ) {
            Ok(_) => {
                self.enqueued_events.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.dropped_events.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Records every event field as a string content of the item.
pub struct FieldVisitor<'a> {
    pub item: &'a mut LogItem,
}

impl<'a> Visit for FieldVisitor<'a> {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.item.push_back(field.name(), value);
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.item.push_back(field.name(), value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.item.push_back(field.name(), value.to_string());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.item.push_back(field.name(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.item.push_back(field.name(), format!("{:?}", value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProducerConfig, ProjectConfig, ProjectConfigs};
    use crate::noop_client::NoopClient;
    use tracing_subscriber::layer::SubscriberExt;

    #[tokio::test]
    async fn captures_events_up_to_the_configured_level() {
        let producer = Arc::new(
            LogProducer::new(
                ProducerConfig::default(),
                ProjectConfigs::from_configs([ProjectConfig::new("p", "e", "id", "secret")]),
                Arc::new(NoopClient),
            )
            .unwrap(),
        );
        let layer = ProducerLayer::new(Arc::clone(&producer), Destination::new("p", "ls"), Level::WARN);
        let total = Arc::clone(&layer.total_events);
        let enqueued = Arc::clone(&layer.enqueued_events);
        let dropped = Arc::clone(&layer.dropped_events);

        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::error!(target: "app", user = "alice", attempts = 3, "payment failed");
            tracing::warn!(target: "app", "slow request");
            tracing::info!(target: "app", "ignored by level");
            tracing::error!(target: "log_producer::sender", "ignored by target");
        });

        assert_eq!(total.load(Ordering::Relaxed), 4);
        assert_eq!(enqueued.load(Ordering::Relaxed), 2);
        assert_eq!(dropped.load(Ordering::Relaxed), 0);
        assert_eq!(producer.batch_count(), 1);
        producer.close().await.unwrap();
    }

    #[tokio::test]
    async fn counts_drops_after_close() {
        let producer = Arc::new(
            LogProducer::new(ProducerConfig::default(), ProjectConfigs::new(), Arc::new(NoopClient))
                .unwrap(),
        );
        producer.close().await.unwrap();
        let layer = ProducerLayer::new(Arc::clone(&producer), Destination::new("p", "ls"), Level::INFO);
        let dropped = Arc::clone(&layer.dropped_events);
        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, || tracing::error!(target: "app", "lost"));
        assert_eq!(dropped.load(Ordering::Relaxed), 1);
    }
}
