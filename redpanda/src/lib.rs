//! Redpanda migration queue.
//!
//! Implements [`MigrationQueue`] with rdkafka against any Kafka-compatible
//! broker.
//!
//! # Ordering
//!
//! Every message is produced with the same key (the *group key*), so all of
//! them land on one partition and are consumed in publication order.
//!
//! # Deduplication
//!
//! The producer runs with `enable.idempotence`, which removes duplicates
//! caused by producer retries. The publisher's dedup id (the coupon id)
//! travels in the `dedup-id` header. Application-level re-publishes of the
//! same coupon are not filtered by the broker; the durable store's unique
//! `(coupon_id, member_id)` key makes their processing a no-op.
//!
//! # Delivery Semantics
//!
//! **At-least-once** with manual offset commits:
//! - A delivery is handed to the subscriber and the consumer task waits for
//!   it to be settled before reading on.
//! - `ack` commits the offset.
//! - `nack` (or dropping the delivery) seeks the partition back to the
//!   message after `redelivery_delay`, so it is delivered again.
//!
//! # Example
//!
//! ```no_run
//! use coupon_redpanda::RedpandaMigrationQueue;
//! use coupon_core::queue::MigrationQueue;
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let queue = RedpandaMigrationQueue::builder()
//!     .brokers("localhost:9092")
//!     .topic("coupon-migrations")
//!     .consumer_group("persistence-worker")
//!     .build()?;
//!
//! queue.publish(br#"{"coupon_id":"..."}"#, "offline-...").await?;
//!
//! let mut deliveries = queue.subscribe().await?;
//! while let Some(delivery) = deliveries.next().await {
//!     delivery?.ack();
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use coupon_core::queue::{Ack, Delivery, DeliveryStream, MigrationQueue, QueueError, QueueFuture};
use coupon_core::timeout::DEFAULT_QUEUE_TIMEOUT;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::Offset;
use std::time::Duration;

/// Header carrying the publisher's deduplication id.
pub const DEDUP_HEADER: &str = "dedup-id";

/// Default message group key.
pub const DEFAULT_GROUP_KEY: &str = "default";

const DEFAULT_REDELIVERY_DELAY: Duration = Duration::from_secs(5);

/// Redpanda-backed [`MigrationQueue`].
///
/// # Thread Safety
///
/// `Send + Sync`; the producer is shared by every publish call.
pub struct RedpandaMigrationQueue {
    producer: FutureProducer,
    brokers: String,
    topic: String,
    group_key: String,
    consumer_group: String,
    timeout: Duration,
    redelivery_delay: Duration,
    auto_offset_reset: String,
}

impl RedpandaMigrationQueue {
    /// Create a builder.
    #[must_use]
    pub fn builder() -> RedpandaMigrationQueueBuilder {
        RedpandaMigrationQueueBuilder::default()
    }

    /// Broker list this queue was built with.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    /// Topic messages are produced to and consumed from.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Key every message is produced with.
    #[must_use]
    pub fn group_key(&self) -> &str {
        &self.group_key
    }
}

/// Builder for [`RedpandaMigrationQueue`].
#[derive(Default)]
pub struct RedpandaMigrationQueueBuilder {
    brokers: Option<String>,
    topic: Option<String>,
    group_key: Option<String>,
    consumer_group: Option<String>,
    timeout: Option<Duration>,
    redelivery_delay: Option<Duration>,
    auto_offset_reset: Option<String>,
}

impl RedpandaMigrationQueueBuilder {
    /// Comma-separated bootstrap servers.
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Topic name.
    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Message key shared by every message (default `"default"`).
    #[must_use]
    pub fn group_key(mut self, key: impl Into<String>) -> Self {
        self.group_key = Some(key.into());
        self
    }

    /// Consumer group id (default `"coupon-persistence"`).
    #[must_use]
    pub fn consumer_group(mut self, group: impl Into<String>) -> Self {
        self.consumer_group = Some(group.into());
        self
    }

    /// Publish deadline (default 5 s).
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Pause before a nacked message is delivered again (default 5 s).
    #[must_use]
    pub const fn redelivery_delay(mut self, delay: Duration) -> Self {
        self.redelivery_delay = Some(delay);
        self
    }

    /// Where a new consumer group starts reading (default `"earliest"`).
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Create the producer.
    ///
    /// No connection is made until the first publish.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::ConnectionFailed`] if brokers or topic are not
    /// configured, or the producer cannot be created.
    pub fn build(self) -> Result<RedpandaMigrationQueue, QueueError> {
        let brokers = self
            .brokers
            .ok_or_else(|| QueueError::ConnectionFailed("Brokers not configured".to_string()))?;
        let topic = self
            .topic
            .ok_or_else(|| QueueError::ConnectionFailed("Topic not configured".to_string()))?;
        let timeout = self.timeout.unwrap_or(DEFAULT_QUEUE_TIMEOUT);

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("enable.idempotence", "true")
            .set("acks", "all")
            .create()
            .map_err(|e| QueueError::ConnectionFailed(format!("Failed to create producer: {e}")))?;

        let queue = RedpandaMigrationQueue {
            producer,
            brokers,
            topic,
            group_key: self
                .group_key
                .unwrap_or_else(|| DEFAULT_GROUP_KEY.to_string()),
            consumer_group: self
                .consumer_group
                .unwrap_or_else(|| "coupon-persistence".to_string()),
            timeout,
            redelivery_delay: self.redelivery_delay.unwrap_or(DEFAULT_REDELIVERY_DELAY),
            auto_offset_reset: self
                .auto_offset_reset
                .unwrap_or_else(|| "earliest".to_string()),
        };

        tracing::info!(
            brokers = %queue.brokers,
            topic = %queue.topic,
            group_key = %queue.group_key,
            consumer_group = %queue.consumer_group,
            "RedpandaMigrationQueue created"
        );

        Ok(queue)
    }
}

/// Dedup id carried in `headers`, if any.
fn dedup_id_from<H: Headers>(headers: Option<&H>) -> Option<String> {
    headers?
        .iter()
        .find(|header| header.key == DEDUP_HEADER)
        .and_then(|header| header.value)
        .map(|value| String::from_utf8_lossy(value).into_owned())
}

impl MigrationQueue for RedpandaMigrationQueue {
    fn publish<'a>(&'a self, payload: &'a [u8], dedup_id: &'a str) -> QueueFuture<'a, ()> {
        Box::pin(async move {
            let headers = OwnedHeaders::new().insert(Header {
                key: DEDUP_HEADER,
                value: Some(dedup_id),
            });
            let record = FutureRecord::to(&self.topic)
                .payload(payload)
                .key(&self.group_key)
                .headers(headers);

            match self.producer.send(record, Timeout::After(self.timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %self.topic,
                        partition,
                        offset,
                        dedup_id,
                        "Migration message published"
                    );
                    Ok(())
                },
                Err((KafkaError::MessageProduction(RDKafkaErrorCode::MessageTimedOut), _)) => {
                    Err(QueueError::Timeout {
                        operation: "publish",
                    })
                },
                Err((kafka_error, _)) => {
                    tracing::error!(
                        topic = %self.topic,
                        dedup_id,
                        error = %kafka_error,
                        "Failed to publish migration message"
                    );
                    Err(QueueError::PublishFailed(kafka_error.to_string()))
                },
            }
        })
    }

    fn subscribe(&self) -> QueueFuture<'_, DeliveryStream> {
        let brokers = self.brokers.clone();
        let topic = self.topic.clone();
        let consumer_group = self.consumer_group.clone();
        let auto_offset_reset = self.auto_offset_reset.clone();
        let redelivery_delay = self.redelivery_delay;
        let seek_timeout = self.timeout;

        Box::pin(async move {
            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &brokers)
                .set("group.id", &consumer_group)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", &auto_offset_reset)
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| {
                    QueueError::SubscriptionFailed(format!("Failed to create consumer: {e}"))
                })?;

            consumer.subscribe(&[topic.as_str()]).map_err(|e| {
                QueueError::SubscriptionFailed(format!("Failed to subscribe to {topic}: {e}"))
            })?;

            tracing::info!(
                topic = %topic,
                consumer_group = %consumer_group,
                auto_offset_reset = %auto_offset_reset,
                manual_commit = true,
                "Subscribed to migration topic"
            );

            // Capacity 1: the consumer task waits for each delivery to settle.
            let (tx, mut rx) = tokio::sync::mpsc::channel(1);

            tokio::spawn(async move {
                use futures::StreamExt;

                let mut stream = consumer.stream();

                while let Some(msg_result) = stream.next().await {
                    let message = match msg_result {
                        Ok(message) => message,
                        Err(e) => {
                            let err = QueueError::SubscriptionFailed(format!(
                                "Failed to receive message: {e}"
                            ));
                            if tx.send(Err(err)).await.is_err() {
                                break;
                            }
                            continue;
                        },
                    };

                    let payload = message.payload().unwrap_or_default().to_vec();
                    let dedup_id = dedup_id_from(message.headers());
                    let (delivery, settled) = Delivery::new(payload, dedup_id);

                    if tx.send(Ok(delivery)).await.is_err() {
                        tracing::debug!("Delivery receiver dropped, exiting consumer task");
                        break;
                    }

                    match settled.await.unwrap_or(Ack::Redeliver) {
                        Ack::Commit => {
                            if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
                                tracing::warn!(
                                    partition = message.partition(),
                                    offset = message.offset(),
                                    error = %e,
                                    "Failed to commit offset (message may be redelivered)"
                                );
                            }
                        },
                        Ack::Redeliver => {
                            tracing::info!(
                                partition = message.partition(),
                                offset = message.offset(),
                                delay_ms = u64::try_from(redelivery_delay.as_millis())
                                    .unwrap_or(u64::MAX),
                                "Delivery handed back, rewinding"
                            );
                            tokio::time::sleep(redelivery_delay).await;
                            if let Err(e) = consumer.seek(
                                message.topic(),
                                message.partition(),
                                Offset::Offset(message.offset()),
                                seek_timeout,
                            ) {
                                // Uncommitted, so a restart will still pick it up.
                                tracing::error!(
                                    partition = message.partition(),
                                    offset = message.offset(),
                                    error = %e,
                                    "Failed to rewind for redelivery"
                                );
                            }
                        },
                    }
                }

                tracing::debug!("Consumer task exiting");
            });

            let stream = async_stream::stream! {
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };

            Ok(Box::pin(stream) as DeliveryStream)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn redpanda_queue_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedpandaMigrationQueue>();
        assert_sync::<RedpandaMigrationQueue>();
    }

    #[test]
    fn build_requires_brokers_and_topic() {
        assert!(matches!(
            RedpandaMigrationQueue::builder().topic("t").build(),
            Err(QueueError::ConnectionFailed(_))
        ));
        assert!(matches!(
            RedpandaMigrationQueue::builder().brokers("localhost:9092").build(),
            Err(QueueError::ConnectionFailed(_))
        ));
    }

    #[test]
    fn build_applies_defaults() {
        let queue = RedpandaMigrationQueue::builder()
            .brokers("localhost:9092")
            .topic("coupon-migrations")
            .build()
            .unwrap();
        assert_eq!(queue.group_key(), DEFAULT_GROUP_KEY);
        assert_eq!(queue.topic(), "coupon-migrations");
        assert_eq!(queue.brokers(), "localhost:9092");
    }

    #[test]
    fn dedup_header_is_read_back() {
        let headers = OwnedHeaders::new()
            .insert(Header {
                key: "trace",
                value: Some("abc"),
            })
            .insert(Header {
                key: DEDUP_HEADER,
                value: Some("offline-67e55044-10b1-426f-9247-bb680e5fe0c8"),
            });
        assert_eq!(
            dedup_id_from(Some(&headers)).as_deref(),
            Some("offline-67e55044-10b1-426f-9247-bb680e5fe0c8")
        );
        assert_eq!(dedup_id_from::<OwnedHeaders>(None), None);
    }

    #[tokio::test]
    #[ignore] // Requires Redpanda running
    async fn publish_then_consume_in_order() {
        use futures::StreamExt;

        let queue = RedpandaMigrationQueue::builder()
            .brokers("localhost:9092")
            .topic("coupon-migrations-test")
            .consumer_group(format!("test-{}", std::process::id()))
            .redelivery_delay(Duration::from_millis(100))
            .build()
            .unwrap();

        queue.publish(b"first", "id-1").await.unwrap();
        queue.publish(b"second", "id-2").await.unwrap();

        let mut deliveries = queue.subscribe().await.unwrap();

        let first = deliveries.next().await.unwrap().unwrap();
        assert_eq!(first.payload(), b"first");
        first.nack();

        let again = deliveries.next().await.unwrap().unwrap();
        assert_eq!(again.payload(), b"first");
        assert_eq!(again.dedup_id(), Some("id-1"));
        again.ack();

        let second = deliveries.next().await.unwrap().unwrap();
        assert_eq!(second.payload(), b"second");
        second.ack();
    }
}
