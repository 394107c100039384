//! `logriver river` — the broker-to-store relay daemon

use std::sync::Arc;

use anyhow::Result;
use logriver::amqp::AmqpConsumer;
use logriver::config::Config;
use logriver::elastic::ElasticPublisher;
use logriver::metrics::RelayMetrics;
use logriver::types::Publisher;
use tracing::{error, info};

use super::wait_for_shutdown_signal;

pub async fn run(config: Config) -> Result<()> {
    if config.consumer.connections.is_empty() {
        anyhow::bail!("no [[consumer.connections]] configured, nothing to relay");
    }

    let metrics = RelayMetrics::shared();

    // Downstream first: sessions forward into it as soon as they go active
    let elastic = Arc::new(ElasticPublisher::new(config.elastic.clone(), Arc::clone(&metrics)));
    elastic.start().await?;

    let consumer = AmqpConsumer::new(
        config.consumer.clone(),
        Arc::clone(&elastic) as Arc<dyn Publisher>,
    );
    consumer.start()?;

    info!(pid = std::process::id(), version = env!("CARGO_PKG_VERSION"), "river started");

    wait_for_shutdown_signal().await?;
    info!("received shutdown signal");

    // Intake stops before the store drain so nothing new arrives mid-drain
    if let Err(e) = consumer.stop().await {
        error!(error = %e, "consumer did not stop cleanly");
    }
    if let Err(e) = elastic.stop().await {
        error!(error = %e, "elastic publisher did not stop cleanly");
    }

    info!("river stopped");
    Ok(())
}
