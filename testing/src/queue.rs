//! In-memory [`MigrationQueue`].
//!
//! A FIFO with publisher-side deduplication: a dedup id is accepted once and
//! later publishes of it are dropped. A nacked delivery goes back to the
//! front, so ordering survives redelivery.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use coupon_core::queue::{Ack, Delivery, DeliveryStream, MigrationQueue, QueueError, QueueFuture};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Debug, Clone)]
struct Message {
    payload: Vec<u8>,
    dedup_id: String,
}

#[derive(Debug, Default)]
struct Inner {
    pending: VecDeque<Message>,
    seen: HashSet<String>,
    accepted: Vec<String>,
}

/// In-memory migration queue.
///
/// # Example
///
/// ```
/// use coupon_testing::InMemoryMigrationQueue;
/// use coupon_core::queue::MigrationQueue;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let queue = InMemoryMigrationQueue::new();
/// queue.publish(b"{}", "offline-1").await?;
/// queue.publish(b"{}", "offline-1").await?;
/// assert_eq!(queue.pending(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryMigrationQueue {
    inner: Arc<Mutex<Inner>>,
    notify: Arc<Notify>,
    fail_publish: Arc<AtomicBool>,
    publish_attempts: Arc<AtomicUsize>,
    redeliveries: Arc<AtomicUsize>,
    redelivery_delay: Duration,
}

impl InMemoryMigrationQueue {
    /// Create an empty queue that redelivers immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait `delay` before putting a nacked message back.
    #[must_use]
    pub fn with_redelivery_delay(mut self, delay: Duration) -> Self {
        self.redelivery_delay = delay;
        self
    }

    /// Make every publish fail.
    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Messages waiting to be delivered.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.lock().unwrap().pending.len()
    }

    /// Dedup ids accepted so far, in publication order.
    #[must_use]
    pub fn accepted_ids(&self) -> Vec<String> {
        self.inner.lock().unwrap().accepted.clone()
    }

    /// Publish calls made, including rejected and deduplicated ones.
    #[must_use]
    pub fn publish_attempts(&self) -> usize {
        self.publish_attempts.load(Ordering::SeqCst)
    }

    /// Deliveries handed back for redelivery.
    #[must_use]
    pub fn redeliveries(&self) -> usize {
        self.redeliveries.load(Ordering::SeqCst)
    }

    /// Payloads waiting to be delivered, front first.
    #[must_use]
    pub fn pending_payloads(&self) -> Vec<Vec<u8>> {
        self.inner
            .lock()
            .unwrap()
            .pending
            .iter()
            .map(|m| m.payload.clone())
            .collect()
    }
}

impl MigrationQueue for InMemoryMigrationQueue {
    fn publish<'a>(&'a self, payload: &'a [u8], dedup_id: &'a str) -> QueueFuture<'a, ()> {
        Box::pin(async move {
            self.publish_attempts.fetch_add(1, Ordering::SeqCst);
            if self.fail_publish.load(Ordering::SeqCst) {
                return Err(QueueError::PublishFailed("injected failure".to_string()));
            }

            let mut inner = self.inner.lock().unwrap();
            if !inner.seen.insert(dedup_id.to_string()) {
                return Ok(());
            }
            inner.accepted.push(dedup_id.to_string());
            inner.pending.push_back(Message {
                payload: payload.to_vec(),
                dedup_id: dedup_id.to_string(),
            });
            drop(inner);

            self.notify.notify_one();
            Ok(())
        })
    }

    fn subscribe(&self) -> QueueFuture<'_, DeliveryStream> {
        let inner = Arc::clone(&self.inner);
        let notify = Arc::clone(&self.notify);
        let redeliveries = Arc::clone(&self.redeliveries);
        let redelivery_delay = self.redelivery_delay;

        Box::pin(async move {
            #[allow(unreachable_code)]
            let stream = async_stream::stream! {
                loop {
                    let next = inner.lock().unwrap().pending.pop_front();
                    let Some(message) = next else {
                        notify.notified().await;
                        continue;
                    };

                    let (delivery, settled) =
                        Delivery::new(message.payload.clone(), Some(message.dedup_id.clone()));
                    yield Ok(delivery);

                    if settled.await.unwrap_or(Ack::Redeliver) == Ack::Redeliver {
                        redeliveries.fetch_add(1, Ordering::SeqCst);
                        if !redelivery_delay.is_zero() {
                            tokio::time::sleep(redelivery_delay).await;
                        }
                        inner.lock().unwrap().pending.push_front(message);
                    }
                };
                ()
            };

            Ok(Box::pin(stream) as DeliveryStream)
        })
    }
}
