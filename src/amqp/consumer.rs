//! Broker consume sessions
//!
//! One [`Session`] per configured connection; sessions are independent and
//! share nothing but the downstream publisher. Each session cycles through
//! disconnected → connecting → active: while disconnected a ticker re-dials
//! the broker; while active it streams deliveries and spawns one task per
//! delivery, bounded in flight by the broker prefetch window.
//!
//! In wait-ack mode a delivery is only acknowledged after every record
//! decoded from it has been released by the downstream writer. Empty and
//! undecodable messages are acknowledged immediately so they cannot wedge
//! the queue.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use lapin::acker::Acker;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicQosOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties, Consumer as DeliveryStream, ExchangeKind};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::{ConnectionConfig, ConsumerConfig};
use crate::types::{AckBarrier, Publisher};

use super::codec;

/// Grace period for a clean consumer shutdown
const STOP_GRACE: Duration = Duration::from_secs(30);

/// Consumer tag prefix registered with the broker
const CONSUMER_NAME: &str = "logriver";

/// The one thing a delivery handler may do to the broker: settle its
/// delivery. Keeps the handler free of channel wiring.
#[async_trait]
trait DeliveryAck: Send + Sync {
    async fn ack(&self) -> Result<(), lapin::Error>;
}

#[async_trait]
impl DeliveryAck for Acker {
    async fn ack(&self) -> Result<(), lapin::Error> {
        Acker::ack(self, BasicAckOptions::default()).await
    }
}

/// Runs one consume session per configured connection and forwards decoded
/// bulks to the downstream publisher.
pub struct AmqpConsumer {
    config: ConsumerConfig,
    publisher: Arc<dyn Publisher>,
    shutdown_tx: broadcast::Sender<()>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl AmqpConsumer {
    pub fn new(config: ConsumerConfig, publisher: Arc<dyn Publisher>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            publisher,
            shutdown_tx,
            tasks: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Start one session task per configured connection
    pub fn start(&self) -> Result<()> {
        let mut tasks = self.tasks.lock().unwrap();
        for (id, connection) in self.config.connections.iter().enumerate() {
            let session = Session {
                id,
                config: connection.clone(),
                publisher: Arc::clone(&self.publisher),
            };
            let shutdown = self.shutdown_tx.subscribe();
            tasks.push(tokio::spawn(session.run(shutdown)));
        }
        debug!(sessions = self.config.connections.len(), "consumer started");
        Ok(())
    }

    /// Cancel all sessions and wait up to the grace period for their
    /// in-flight deliveries to drain.
    pub async fn stop(&self) -> Result<()> {
        let _ = self.shutdown_tx.send(());
        let tasks: Vec<_> = self.tasks.lock().unwrap().drain(..).collect();
        let drain = async {
            for task in tasks {
                let _ = task.await;
            }
        };
        tokio::time::timeout(STOP_GRACE, drain)
            .await
            .map_err(|_| anyhow::anyhow!("consumer did not stop within {:?}", STOP_GRACE))?;
        debug!("consumer stopped");
        Ok(())
    }
}

/// Declare the exchange, queue, and binding a session consumes through.
/// Declares are idempotent against matching pre-existing resources; a
/// settings mismatch surfaces as an error and is retried on the next
/// reconnect tick.
async fn prepare_pipe(channel: &Channel, exchange: &str, routing_key: &str, queue: &str) -> Result<()> {
    channel
        .exchange_declare(
            exchange,
            ExchangeKind::Direct,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .context("cannot declare exchange")?;
    channel
        .queue_declare(
            queue,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .context("cannot declare queue")?;
    channel
        .queue_bind(queue, exchange, routing_key, QueueBindOptions::default(), FieldTable::default())
        .await
        .context("cannot create binding")?;
    Ok(())
}

/// One broker connection's consume state machine
struct Session {
    id: usize,
    config: ConnectionConfig,
    publisher: Arc<dyn Publisher>,
}

/// Everything a connected session holds; dropped as one unit on disconnect
struct ActiveLink {
    _connection: Connection,
    channel: Channel,
    deliveries: DeliveryStream,
    consumer_tag: String,
}

impl Session {
    async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.config.reconnect_interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let tracker = TaskTracker::new();

        loop {
            // Disconnected: dial on every tick until a connection sticks
            let mut link = loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        self.drain(&tracker).await;
                        return;
                    }
                    _ = ticker.tick() => {
                        match self.try_connect().await {
                            Ok(link) => break link,
                            Err(e) => {
                                error!(session = self.id, error = %e, "can't connect to broker");
                            }
                        }
                    }
                }
            };

            info!(session = self.id, queue = %self.config.queue, "start delivery");

            // Active: stream deliveries until the channel dies or we stop
            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        if let Err(e) = link
                            .channel
                            .basic_cancel(&link.consumer_tag, BasicCancelOptions::default())
                            .await
                        {
                            warn!(session = self.id, error = %e, "can't cancel consumer");
                        }
                        self.drain(&tracker).await;
                        return;
                    }
                    delivery = link.deliveries.next() => {
                        match delivery {
                            Some(Ok(delivery)) => {
                                let publisher = Arc::clone(&self.publisher);
                                let wait_ack = self.config.wait_ack;
                                let session = self.id;
                                let data = delivery.data;
                                let acker = delivery.acker;
                                tracker.spawn(async move {
                                    handle_delivery(data, acker, publisher, wait_ack, session).await;
                                });
                            }
                            Some(Err(e)) => {
                                error!(session = self.id, error = %e, "connection lost");
                                break;
                            }
                            None => {
                                warn!(session = self.id, "delivery stream closed");
                                break;
                            }
                        }
                    }
                }
            }

            info!(session = self.id, queue = %self.config.queue, "stop delivery");
            drop(link);
        }
    }

    /// Wait for in-flight delivery tasks before the session task exits; the
    /// consumer-level stop grace bounds this.
    async fn drain(&self, tracker: &TaskTracker) {
        tracker.close();
        tracker.wait().await;
    }

    async fn try_connect(&self) -> Result<ActiveLink> {
        // Enforced by config validation too, but a session must never go
        // active with an unbounded prefetch window
        if self.config.prefetch_count < 1 {
            anyhow::bail!("prefetch_count must be >= 1");
        }

        let connection = Connection::connect(&self.config.url, ConnectionProperties::default())
            .await
            .context("can't connect to broker")?;
        let channel = connection.create_channel().await.context("can't create channel")?;

        prepare_pipe(
            &channel,
            &self.config.exchange,
            &self.config.routing_key,
            &self.config.queue,
        )
        .await
        .context("prepare broker failed, exchange, queue or binding may exist with bad settings")?;

        channel
            .basic_qos(self.config.prefetch_count, BasicQosOptions::default())
            .await
            .context("can't set qos")?;

        let consumer_tag = format!("{}-{}", CONSUMER_NAME, self.id);
        let deliveries = channel
            .basic_consume(
                &self.config.queue,
                &consumer_tag,
                BasicConsumeOptions {
                    no_ack: !self.config.wait_ack,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .context("can't start consuming")?;

        Ok(ActiveLink {
            _connection: connection,
            channel,
            deliveries,
            consumer_tag,
        })
    }
}

/// Process one delivery: decode, forward downstream, and (in wait-ack mode)
/// acknowledge only after every derived record has completed downstream.
async fn handle_delivery<A: DeliveryAck>(
    data: Vec<u8>,
    acker: A,
    publisher: Arc<dyn Publisher>,
    wait_ack: bool,
    session: usize,
) {
    if data.is_empty() {
        // Keepalive/control message; drop it from the queue
        if wait_ack {
            ack(&acker, session, "empty message").await;
        }
        return;
    }

    let mut bulk = match codec::decode_bulk_legacy(&data) {
        Ok(bulk) => bulk,
        Err(e) => {
            warn!(
                session,
                error = %e,
                body = %String::from_utf8_lossy(&data),
                "bad message"
            );
            // Poison messages must not block the queue
            if wait_ack {
                ack(&acker, session, "bad message").await;
            }
            return;
        }
    };

    if !wait_ack {
        // Broker already auto-acked on delivery
        if let Err(e) = publisher.publish(bulk).await {
            error!(session, error = %e, "downstream publish failed");
        }
        return;
    }

    let barrier = AckBarrier::new(bulk.len());
    for record in &mut bulk {
        record.ack = Some(barrier.clone());
    }
    if let Err(e) = publisher.publish(bulk).await {
        // Not acked: the broker will redeliver once this session reconnects
        error!(session, error = %e, "downstream publish failed, leaving message unacked");
        return;
    }
    barrier.wait().await;
    ack(&acker, session, "message").await;
}

async fn ack<A: DeliveryAck>(acker: &A, session: usize, what: &str) {
    if let Err(e) = acker.ack().await {
        warn!(session, error = %e, "can't send ack for {}", what);
    }
}
