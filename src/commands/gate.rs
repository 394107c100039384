//! `logriver gate` — the HTTP ingestion gateway daemon

use std::sync::Arc;

use anyhow::Result;
use logriver::amqp::AmqpPublisher;
use logriver::config::Config;
use logriver::gateway::GatewayServer;
use logriver::metrics::RelayMetrics;
use logriver::types::Publisher;
use tokio::sync::broadcast;
use tracing::{error, info};

use super::wait_for_shutdown_signal;

pub async fn run(config: Config) -> Result<()> {
    let metrics = RelayMetrics::shared();

    let publisher = Arc::new(AmqpPublisher::new(config.amqp.clone(), Arc::clone(&metrics)));
    publisher.start().await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let server = GatewayServer::new(
        config.http.clone(),
        Arc::clone(&publisher) as Arc<dyn Publisher>,
        Arc::clone(&metrics),
    );
    let server_shutdown = shutdown_tx.subscribe();
    let server_task = tokio::spawn(async move { server.run(server_shutdown).await });

    info!(pid = std::process::id(), version = env!("CARGO_PKG_VERSION"), "gate started");

    wait_for_shutdown_signal().await?;
    info!("received shutdown signal");

    let _ = shutdown_tx.send(());
    match server_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "gateway exited with error"),
        Err(e) => error!(error = %e, "gateway task panicked"),
    }
    if let Err(e) = publisher.stop().await {
        error!(error = %e, "publisher did not stop cleanly");
    }

    info!("gate stopped");
    Ok(())
}
