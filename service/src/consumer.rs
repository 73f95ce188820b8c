//! Migration queue consumer with automatic reconnection.
//!
//! Subscribes to the migration queue, feeds every delivery to the
//! [`PersistenceWorker`] one at a time and settles it:
//!
//! ```text
//! loop {
//!     subscribe
//!     for each delivery:
//!         Ok            -> ack
//!         rejected      -> ack (logged; redelivery cannot fix it)
//!         infra failure -> nack (redelivered later)
//!     stream ended or subscribe failed -> wait retry_delay, resubscribe
//! }
//! ```
//!
//! Shutdown is checked between deliveries, never in the middle of one.

use coupon_core::queue::{Delivery, MigrationQueue, QueueError};
use futures::{Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::worker::PersistenceWorker;

/// A required builder field was not set.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0} is required")]
pub struct MissingField(&'static str);

/// Long-running consumer feeding the persistence worker.
pub struct MigrationConsumer {
    name: String,
    queue: Arc<dyn MigrationQueue>,
    worker: PersistenceWorker,
    shutdown: broadcast::Receiver<()>,
    retry_delay: Duration,
}

impl MigrationConsumer {
    /// Create a consumer with a 5 second retry delay.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        queue: Arc<dyn MigrationQueue>,
        worker: PersistenceWorker,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            name: name.into(),
            queue,
            worker,
            shutdown,
            retry_delay: Duration::from_secs(5),
        }
    }

    /// Create a builder for configuring a consumer.
    #[must_use]
    pub fn builder() -> MigrationConsumerBuilder {
        MigrationConsumerBuilder::default()
    }

    /// Set the delay before resubscribing.
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Run the consumer on a background task until shutdown.
    #[must_use]
    pub fn spawn(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Subscribe-process-reconnect loop.
    pub async fn run(&mut self) {
        info!(consumer = %self.name, "Migration consumer started");

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "Migration consumer received shutdown signal");
                    break;
                }
                subscribe_result = self.queue.subscribe() => {
                    match subscribe_result {
                        Ok(mut stream) => {
                            info!(consumer = %self.name, "Subscribed to migration queue");
                            if self.process_stream(&mut stream).await {
                                break;
                            }
                            warn!(consumer = %self.name, "Migration stream ended, reconnecting in {:?}", self.retry_delay);
                        }
                        Err(e) => {
                            error!(
                                consumer = %self.name,
                                error = %e,
                                "Failed to subscribe to migration queue, retrying in {:?}",
                                self.retry_delay
                            );
                        }
                    }
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }

        info!(consumer = %self.name, "Migration consumer stopped");
    }

    /// Drain `stream`. Returns `true` if shutdown was requested.
    async fn process_stream<S>(&mut self, stream: &mut S) -> bool
    where
        S: Stream<Item = Result<Delivery, QueueError>> + Unpin + Send,
    {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "Migration consumer received shutdown signal during processing");
                    return true;
                }
                next = stream.next() => {
                    match next {
                        Some(Ok(delivery)) => self.process(delivery).await,
                        Some(Err(e)) => {
                            error!(consumer = %self.name, error = %e, "Error receiving migration message");
                        }
                        None => return false,
                    }
                }
            }
        }
    }

    async fn process(&self, delivery: Delivery) {
        match self.worker.handle(delivery.payload()).await {
            Ok(_) => delivery.ack(),
            Err(e) if e.is_retryable() => {
                warn!(
                    consumer = %self.name,
                    dedup_id = delivery.dedup_id().unwrap_or("-"),
                    error = %e,
                    "Migration failed, handing message back"
                );
                delivery.nack();
            },
            Err(e) => {
                error!(
                    consumer = %self.name,
                    dedup_id = delivery.dedup_id().unwrap_or("-"),
                    error = %e,
                    "Migration rejected, dropping message"
                );
                delivery.ack();
            },
        }
    }
}

/// Builder for [`MigrationConsumer`].
#[derive(Default)]
pub struct MigrationConsumerBuilder {
    name: Option<String>,
    queue: Option<Arc<dyn MigrationQueue>>,
    worker: Option<PersistenceWorker>,
    shutdown: Option<broadcast::Receiver<()>>,
    retry_delay: Option<Duration>,
}

impl MigrationConsumerBuilder {
    /// Set consumer name (default `persistence-worker`).
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the queue to consume.
    #[must_use]
    pub fn queue(mut self, queue: Arc<dyn MigrationQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Set the worker handling each delivery.
    #[must_use]
    pub fn worker(mut self, worker: PersistenceWorker) -> Self {
        self.worker = Some(worker);
        self
    }

    /// Set shutdown signal receiver.
    #[must_use]
    pub fn shutdown(mut self, shutdown: broadcast::Receiver<()>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Set custom retry delay (default: 5 seconds).
    #[must_use]
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    /// Build the consumer.
    ///
    /// # Errors
    ///
    /// Returns [`MissingField`] if the queue, worker or shutdown receiver is
    /// not set.
    pub fn build(self) -> Result<MigrationConsumer, MissingField> {
        Ok(MigrationConsumer {
            name: self.name.unwrap_or_else(|| "persistence-worker".to_string()),
            queue: self.queue.ok_or(MissingField("queue"))?,
            worker: self.worker.ok_or(MissingField("worker"))?,
            shutdown: self.shutdown.ok_or(MissingField("shutdown"))?,
            retry_delay: self.retry_delay.unwrap_or(Duration::from_secs(5)),
        })
    }
}
