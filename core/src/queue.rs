//! Migration queue contract.
//!
//! Ordered, at-least-once delivery with publisher-side deduplication. Every
//! message travels under one group key so the queue delivers them in
//! publication order. Consumers settle each [`Delivery`] explicitly:
//! [`Delivery::ack`] commits it, [`Delivery::nack`] (or simply dropping it)
//! hands it back for redelivery.

use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tokio::sync::oneshot;

/// Errors raised by a queue adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// Could not reach the broker.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The broker refused a message.
    #[error("Publish failed: {0}")]
    PublishFailed(String),

    /// Subscribing or polling failed.
    #[error("Subscription failed: {0}")]
    SubscriptionFailed(String),

    /// A call did not complete within its deadline.
    #[error("Timed out during {operation}")]
    Timeout {
        /// Operation that timed out
        operation: &'static str,
    },
}

/// Boxed future returned by [`MigrationQueue`] operations.
pub type QueueFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, QueueError>> + Send + 'a>>;

/// Stream of deliveries from a subscription.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery, QueueError>> + Send>>;

/// How a consumer settled a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    /// Processed; do not deliver again.
    Commit,
    /// Not processed; deliver again later.
    Redeliver,
}

/// One message handed to a consumer.
#[derive(Debug)]
pub struct Delivery {
    payload: Vec<u8>,
    dedup_id: Option<String>,
    settle: Option<oneshot::Sender<Ack>>,
}

impl Delivery {
    /// Create a delivery and the receiver its adapter waits on.
    #[must_use]
    pub fn new(payload: Vec<u8>, dedup_id: Option<String>) -> (Self, oneshot::Receiver<Ack>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                payload,
                dedup_id,
                settle: Some(tx),
            },
            rx,
        )
    }

    /// Raw message body.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Deduplication id the message was published with, if the broker kept it.
    #[must_use]
    pub fn dedup_id(&self) -> Option<&str> {
        self.dedup_id.as_deref()
    }

    /// Mark the message processed.
    pub fn ack(mut self) {
        self.send(Ack::Commit);
    }

    /// Hand the message back for redelivery.
    pub fn nack(mut self) {
        self.send(Ack::Redeliver);
    }

    fn send(&mut self, ack: Ack) {
        if let Some(tx) = self.settle.take() {
            // The adapter may have shut down; nothing left to tell.
            let _ = tx.send(ack);
        }
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        self.send(Ack::Redeliver);
    }
}

/// Ordered, deduplicating queue between the scanner and the worker.
pub trait MigrationQueue: Send + Sync {
    /// Publish `payload` under the fixed group key with `dedup_id`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::PublishFailed`] or [`QueueError::Timeout`] if the
    /// broker does not accept the message.
    fn publish<'a>(&'a self, payload: &'a [u8], dedup_id: &'a str) -> QueueFuture<'a, ()>;

    /// Start consuming.
    ///
    /// The stream yields the next delivery only once the previous one has
    /// been settled, so processing is strictly sequential.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::SubscriptionFailed`] if the subscription cannot
    /// be established.
    fn subscribe(&self) -> QueueFuture<'_, DeliveryStream>;
}
