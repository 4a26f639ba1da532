use crate::layer::{Destination, ProducerLayer};
use crate::producer::LogProducer;
use std::sync::Arc;
use tracing::subscriber::SetGlobalDefaultError;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

/// Configuration of the tracing integration.
///
/// - `max_level`: least severe level shipped through the producer.
/// - `enable_stdout`: also print events to the console through a
///   `tracing_subscriber::fmt` layer.
#[derive(Clone, Debug)]
pub struct LayerConfig {
    pub max_level: Level,
    pub enable_stdout: bool,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            max_level: Level::INFO,
            enable_stdout: true,
        }
    }
}

/// Install a global subscriber that ships events to `destination` through
/// `producer`.
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing_with_config(
    producer: Arc<LogProducer>,
    destination: Destination,
    config: LayerConfig,
) -> Result<(), SetGlobalDefaultError> {
    let layer = ProducerLayer::new(producer, destination, config.max_level);

    // Two subscriber shapes, since the fmt layer changes the type.
    if config.enable_stdout {
        let fmt_layer = tracing_subscriber::fmt::layer();
        let subscriber = Registry::default().with(layer).with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber)
    } else {
        let subscriber = Registry::default().with(layer);
        tracing::subscriber::set_global_default(subscriber)
    }
}

/// [`init_tracing_with_config`] with [`LayerConfig::default`].
pub fn init_tracing(
    producer: Arc<LogProducer>,
    destination: Destination,
) -> Result<(), SetGlobalDefaultError> {
    init_tracing_with_config(producer, destination, LayerConfig::default())
}
