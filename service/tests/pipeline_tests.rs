//! End-to-end pipeline tests: initializer, issuance, scanner, queue consumer
//! and persistence worker wired together over the in-memory fakes.
//!
//! Run with: `cargo test -p coupon-service --test pipeline_tests`

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

mod common;

use common::{create_test_env, create_test_env_with_queue, eventually, pool};
use coupon_core::MigrationMessage;
use coupon_core::inventory::InventoryStore;
use coupon_core::queue::MigrationQueue;
use coupon_service::consumer::MigrationConsumer;
use coupon_service::initializer::PoolInitializer;
use coupon_service::issuance::{IssuanceService, IssueRequest};
use coupon_service::scanner::ExpiryScanner;
use coupon_service::worker::PersistenceWorker;
use coupon_testing::InMemoryMigrationQueue;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

#[tokio::test]
async fn test_initializer_sets_only_absent_pools() {
    let harness = create_test_env();
    let (offline, online) = (pool("offline"), pool("online"));
    let initializer = PoolInitializer::new(
        harness.env.clone(),
        vec![offline.clone(), online.clone()],
        1_000,
    );

    let first = initializer.initialize_pools().await.unwrap();
    assert_eq!(first.initialized, vec![offline.clone(), online.clone()]);
    assert!(first.untouched.is_empty());

    IssuanceService::new(harness.env.clone())
        .issue(&offline, &IssueRequest::for_owner("user1"))
        .await
        .unwrap();

    let second = initializer.initialize_pools().await.unwrap();
    assert!(second.initialized.is_empty());
    assert_eq!(second.untouched.len(), 2);
    assert_eq!(harness.inventory.remaining(&offline).await.unwrap(), Some(999));
}

#[tokio::test]
async fn test_force_reset_overwrites_live_inventory() {
    let harness = create_test_env();
    let offline = pool("offline");
    harness.inventory.init_pool(&offline, 3).await.unwrap();

    PoolInitializer::new(harness.env.clone(), vec![offline.clone()], 50)
        .force_reset_pools()
        .await
        .unwrap();

    assert_eq!(harness.inventory.remaining(&offline).await.unwrap(), Some(50));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_issue_scan_consume_persist() {
    let harness = create_test_env();
    let offline = pool("offline");
    PoolInitializer::new(harness.env.clone(), vec![offline.clone()], 10)
        .initialize_pools()
        .await
        .unwrap();

    let service = IssuanceService::new(harness.env.clone());
    let mut issued = Vec::new();
    for owner in ["alice", "bob", "carol"] {
        issued.push(
            service
                .issue(&offline, &IssueRequest::for_owner(owner))
                .await
                .unwrap(),
        );
    }

    let report = ExpiryScanner::new(harness.env.clone(), vec![offline.clone()])
        .scan_once()
        .await
        .unwrap();
    assert_eq!(report.published, 3);

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = MigrationConsumer::builder()
        .queue(Arc::clone(&harness.env.queue))
        .worker(PersistenceWorker::new(harness.env.clone()))
        .shutdown(shutdown_rx)
        .retry_delay(Duration::from_millis(10))
        .build()
        .unwrap()
        .spawn();

    let ledger = harness.ledger.clone();
    assert!(eventually(|| ledger.len() == 3).await);
    let inventory = harness.inventory.clone();
    assert!(eventually(|| inventory.record_count() == 0).await);

    for coupon in &issued {
        let row = harness.ledger.row(&coupon.coupon_id).unwrap();
        assert_eq!(row.member_id, coupon.owner_id);
    }
    assert_eq!(harness.inventory.remaining(&offline).await.unwrap(), Some(7));

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();
}

/// A durable outage hands the message back; it lands once the ledger recovers.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_consumer_redelivers_after_durable_failure() {
    let queue = InMemoryMigrationQueue::new().with_redelivery_delay(Duration::from_millis(20));
    let harness = create_test_env_with_queue(queue);
    let offline = pool("offline");
    harness.inventory.init_pool(&offline, 10).await.unwrap();
    let issued = IssuanceService::new(harness.env.clone())
        .issue(&offline, &IssueRequest::for_owner("user123"))
        .await
        .unwrap();

    harness.ledger.set_unavailable(true);
    ExpiryScanner::new(harness.env.clone(), vec![offline.clone()])
        .scan_once()
        .await
        .unwrap();

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = MigrationConsumer::new(
        "test-consumer",
        Arc::clone(&harness.env.queue),
        PersistenceWorker::new(harness.env.clone()),
        shutdown_rx,
    )
    .with_retry_delay(Duration::from_millis(10))
    .spawn();

    let queue = harness.queue.clone();
    assert!(eventually(|| queue.redeliveries() >= 2).await);
    assert!(harness.ledger.is_empty());
    assert!(harness.inventory.record(&issued.coupon_id).is_some());

    harness.ledger.set_unavailable(false);
    let ledger = harness.ledger.clone();
    assert!(eventually(|| ledger.len() == 1).await);
    let inventory = harness.inventory.clone();
    let coupon_id = issued.coupon_id.clone();
    assert!(eventually(|| inventory.record(&coupon_id).is_none()).await);

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();
}

/// Rejected messages are dropped so they cannot block the ordered stream.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_consumer_drops_rejected_messages() {
    let harness = create_test_env();
    harness.queue.publish(b"garbage", "bad-1").await.unwrap();

    let good = MigrationMessage {
        coupon_id: "online-67e55044-10b1-426f-9247-bb680e5fe0c8".parse().unwrap(),
        member_id: coupon_core::OwnerId::new("user7").unwrap(),
        timezone: Some("Europe/Paris".to_string()),
        used: false,
        issued_at: "2025-02-24T02:00:00+01:00".parse().unwrap(),
    };
    harness
        .queue
        .publish(&serde_json::to_vec(&good).unwrap(), &good.dedup_id())
        .await
        .unwrap();

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = MigrationConsumer::builder()
        .name("drop-test")
        .queue(Arc::clone(&harness.env.queue))
        .worker(PersistenceWorker::new(harness.env.clone()))
        .shutdown(shutdown_rx)
        .build()
        .unwrap()
        .spawn();

    let ledger = harness.ledger.clone();
    assert!(eventually(|| ledger.len() == 1).await);
    assert_eq!(harness.queue.redeliveries(), 0);
    assert_eq!(
        harness.ledger.row(&good.coupon_id).unwrap().timezone,
        "Europe/Paris"
    );

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();
}

#[test]
fn test_consumer_builder_requires_queue_worker_and_shutdown() {
    let harness = create_test_env();
    let missing_queue = MigrationConsumer::builder()
        .worker(PersistenceWorker::new(harness.env.clone()))
        .build();
    assert!(missing_queue.is_err());

    let (_tx, rx) = broadcast::channel(1);
    let missing_worker = MigrationConsumer::builder()
        .queue(Arc::clone(&harness.env.queue))
        .shutdown(rx)
        .build();
    assert_eq!(
        missing_worker.err().map(|e| e.to_string()),
        Some("worker is required".to_string())
    );
}
