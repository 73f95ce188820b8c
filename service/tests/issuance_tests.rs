//! Issuance integration tests.
//!
//! Dedup, inventory limits, expiry and zone fallback through the issuance
//! service and the batch intake, over the in-memory store.
//!
//! Run with: `cargo test -p coupon-service --test issuance_tests`

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

mod common;

use chrono::{DateTime, Utc};
use common::{create_test_env, pool};
use coupon_core::inventory::InventoryStore;
use coupon_core::{CouponError, OwnerId};
use coupon_service::intake::{Envelope, EnvelopeRecord, issue_batch, parse_envelope};
use coupon_service::issuance::{IssuanceService, IssueRequest};
use coupon_testing::properties::owner_ids;
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;

fn envelope(bodies: &[&str]) -> Envelope {
    Envelope {
        records: bodies
            .iter()
            .enumerate()
            .map(|(i, body)| EnvelopeRecord {
                receipt_handle: Some(format!("handle-{i}")),
                body: Some((*body).to_string()),
            })
            .collect(),
    }
}

/// Scenario A: first issue succeeds and decrements, the repeat is refused.
#[tokio::test]
async fn test_issue_then_repeat_is_refused() {
    let harness = create_test_env();
    let offline = pool("offline");
    harness.inventory.init_pool(&offline, 10).await.unwrap();
    let service = IssuanceService::new(harness.env.clone());

    let responses = issue_batch(
        &service,
        &offline,
        envelope(&[r#"{"member_id":"user123"}"#, r#"{"member_id":"user123"}"#]),
    )
    .await;

    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0].status_code, 200);
    assert!(
        responses[0]
            .body
            .starts_with("offline coupon granted successfully. Coupon ID: offline-")
    );
    assert!(responses[0].settled());
    assert_eq!(responses[0].receipt_handle.as_deref(), Some("handle-0"));

    assert_eq!(responses[1].status_code, 400);
    assert_eq!(responses[1].body, "User has already received a coupon");
    assert!(!responses[1].settled());

    assert_eq!(harness.inventory.remaining(&offline).await.unwrap(), Some(9));
    assert_eq!(harness.inventory.received_count(&offline), 1);
}

/// Scenario B: an empty pool refuses and stays at zero.
#[tokio::test]
async fn test_empty_pool_refuses_without_mutation() {
    let harness = create_test_env();
    let offline = pool("offline");
    harness.inventory.init_pool(&offline, 0).await.unwrap();
    let service = IssuanceService::new(harness.env.clone());

    let responses = issue_batch(&service, &offline, envelope(&[r#"{"member_id":"user999"}"#])).await;

    assert_eq!(responses[0].status_code, 400);
    assert_eq!(responses[0].body, "No offline coupons remaining");
    assert_eq!(harness.inventory.remaining(&offline).await.unwrap(), Some(0));
    assert_eq!(harness.inventory.received_count(&offline), 0);
    assert_eq!(harness.inventory.record_count(), 0);
}

#[tokio::test]
async fn test_uninitialized_pool_has_no_inventory() {
    let harness = create_test_env();
    let service = IssuanceService::new(harness.env.clone());

    let result = service
        .issue(&pool("online"), &IssueRequest::for_owner("user1"))
        .await;

    assert!(matches!(result, Err(CouponError::NoInventory { pool }) if pool == "online"));
}

#[tokio::test]
async fn test_missing_or_blank_owner_is_rejected_before_the_store() {
    let harness = create_test_env();
    let offline = pool("offline");
    harness.inventory.init_pool(&offline, 10).await.unwrap();
    let service = IssuanceService::new(harness.env.clone());

    let responses = issue_batch(
        &service,
        &offline,
        envelope(&[r#"{"timezone":"UTC"}"#, r#"{"member_id":"   "}"#]),
    )
    .await;

    for response in &responses {
        assert_eq!(response.status_code, 400);
        assert_eq!(response.body, "Invalid request: missing member_id");
    }
    assert_eq!(harness.inventory.issue_calls(), 0);
    assert_eq!(harness.inventory.remaining(&offline).await.unwrap(), Some(10));
}

#[tokio::test]
async fn test_issued_record_expires_at_end_of_local_day() {
    let harness = create_test_env();
    let offline = pool("offline");
    harness.inventory.init_pool(&offline, 10).await.unwrap();
    let service = IssuanceService::new(harness.env.clone());

    let issued = service
        .issue(&offline, &IssueRequest::for_owner(" user123 "))
        .await
        .unwrap();

    // 10:00 KST on 2025-02-24 -> 23:59:59 KST the same day.
    let expected_expiry = DateTime::parse_from_rfc3339("2025-02-24T14:59:59Z")
        .unwrap()
        .with_timezone(&Utc)
        .timestamp();
    assert_eq!(issued.expires_at, expected_expiry);
    assert_eq!(issued.issued_at.to_rfc3339(), "2025-02-24T10:00:00+09:00");
    assert_eq!(issued.timezone, "Asia/Seoul");
    assert!(issued.timezone_fallback);
    assert_eq!(issued.remaining, 9);

    let record = harness.inventory.record(&issued.coupon_id).unwrap();
    assert_eq!(record.owner_id.as_str(), "user123");
    assert!(!record.used);
    assert_eq!(record.expires_at, Some(expected_expiry));
    assert_eq!(record.timezone.as_deref(), Some("Asia/Seoul"));

    let owner = OwnerId::new("user123").unwrap();
    assert_eq!(
        harness.inventory.owner_coupon(&offline, &owner),
        Some(issued.coupon_id.to_string())
    );
}

#[tokio::test]
async fn test_requested_zone_is_used_and_reported() {
    let harness = create_test_env();
    let offline = pool("offline");
    harness.inventory.init_pool(&offline, 10).await.unwrap();
    let service = IssuanceService::new(harness.env.clone());

    let issued = service
        .issue(
            &offline,
            &IssueRequest::for_owner("user1").with_timezone("America/New_York"),
        )
        .await
        .unwrap();

    // 20:00 EST on 2025-02-23 -> 23:59:59 EST the same day.
    let expected = DateTime::parse_from_rfc3339("2025-02-24T04:59:59Z")
        .unwrap()
        .timestamp();
    assert_eq!(issued.timezone, "America/New_York");
    assert!(!issued.timezone_fallback);
    assert_eq!(issued.expires_at, expected);
    assert_eq!(issued.issued_at.to_rfc3339(), "2025-02-23T20:00:00-05:00");
}

#[tokio::test]
async fn test_lowercase_zone_name_is_honoured() {
    let harness = create_test_env();
    let offline = pool("offline");
    harness.inventory.init_pool(&offline, 10).await.unwrap();
    let service = IssuanceService::new(harness.env.clone());

    let issued = service
        .issue(
            &offline,
            &IssueRequest::for_owner("user1").with_timezone("america/new_york"),
        )
        .await
        .unwrap();

    assert_eq!(issued.timezone, "America/New_York");
    assert!(!issued.timezone_fallback);
    assert_eq!(
        issued.expires_at,
        DateTime::parse_from_rfc3339("2025-02-24T04:59:59Z")
            .unwrap()
            .timestamp()
    );
}

#[tokio::test]
async fn test_unknown_zone_falls_back_without_failing() {
    let harness = create_test_env();
    let offline = pool("offline");
    harness.inventory.init_pool(&offline, 10).await.unwrap();
    let service = IssuanceService::new(harness.env.clone());

    let issued = service
        .issue(
            &offline,
            &IssueRequest::for_owner("user1").with_timezone("Mars/Olympus_Mons"),
        )
        .await
        .unwrap();

    assert_eq!(issued.timezone, "Asia/Seoul");
    assert!(issued.timezone_fallback);
}

#[tokio::test]
async fn test_configured_default_zone_applies() {
    let harness = create_test_env();
    let offline = pool("offline");
    harness.inventory.init_pool(&offline, 10).await.unwrap();
    let env = harness
        .env
        .clone()
        .with_default_timezone(chrono_tz::Europe::London);
    let service = IssuanceService::new(env);

    let issued = service
        .issue(&offline, &IssueRequest::for_owner("user1"))
        .await
        .unwrap();

    assert_eq!(issued.timezone, "Europe/London");
    assert!(issued.timezone_fallback);
}

#[tokio::test]
async fn test_dedup_is_scoped_per_pool() {
    let harness = create_test_env();
    let (offline, online) = (pool("offline"), pool("online"));
    harness.inventory.init_pool(&offline, 10).await.unwrap();
    harness.inventory.init_pool(&online, 10).await.unwrap();
    let service = IssuanceService::new(harness.env.clone());
    let request = IssueRequest::for_owner("user123");

    let first = service.issue(&offline, &request).await.unwrap();
    let second = service.issue(&online, &request).await.unwrap();

    assert!(first.coupon_id.to_string().starts_with("offline-"));
    assert!(second.coupon_id.to_string().starts_with("online-"));
    assert!(matches!(
        service.issue(&online, &request).await,
        Err(CouponError::AlreadyIssued { .. })
    ));
}

#[tokio::test]
async fn test_store_outage_is_a_server_error() {
    let harness = create_test_env();
    let offline = pool("offline");
    harness.inventory.init_pool(&offline, 10).await.unwrap();
    harness.inventory.set_unavailable(true);
    let service = IssuanceService::new(harness.env.clone());

    let responses = issue_batch(&service, &offline, envelope(&[r#"{"member_id":"user1"}"#])).await;

    assert_eq!(responses[0].status_code, 500);
    assert!(!responses[0].settled());

    harness.inventory.set_unavailable(false);
    assert_eq!(harness.inventory.remaining(&offline).await.unwrap(), Some(10));
}

#[tokio::test]
async fn test_batch_items_are_independent() {
    let harness = create_test_env();
    let offline = pool("offline");
    harness.inventory.init_pool(&offline, 1).await.unwrap();
    let service = IssuanceService::new(harness.env.clone());

    let raw = br#"{"Records":[
        {"receiptHandle":"a","body":"{\"user_id\":\"alice\"}"},
        {"receiptHandle":"b"},
        {"receiptHandle":"c","body":"not json"},
        {"receiptHandle":"d","body":"{\"owner_id\":\"bob\"}"}
    ]}"#;
    let responses = issue_batch(&service, &offline, parse_envelope(raw).unwrap()).await;

    let summary: Vec<_> = responses
        .iter()
        .map(|r| (r.receipt_handle.as_deref().unwrap(), r.status_code))
        .collect();
    assert_eq!(summary, vec![("a", 200), ("c", 400), ("d", 400)]);
    assert_eq!(responses[2].body, "No offline coupons remaining");
}

/// N concurrent requests from distinct owners against a pool of 10.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_issuance_never_oversells() {
    let harness = create_test_env();
    let offline = pool("offline");
    harness.inventory.init_pool(&offline, 10).await.unwrap();
    let service = Arc::new(IssuanceService::new(harness.env.clone()));

    let handles: Vec<_> = (0..50)
        .map(|i| {
            let service = Arc::clone(&service);
            let offline = offline.clone();
            tokio::spawn(async move {
                service
                    .issue(&offline, &IssueRequest::for_owner(format!("user{i}")))
                    .await
            })
        })
        .collect();

    let mut granted = 0;
    let mut exhausted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => granted += 1,
            Err(CouponError::NoInventory { .. }) => exhausted += 1,
            Err(other) => unreachable!("unexpected error: {other}"),
        }
    }

    assert_eq!(granted, 10);
    assert_eq!(exhausted, 40);
    assert_eq!(harness.inventory.remaining(&offline).await.unwrap(), Some(0));
    assert_eq!(harness.inventory.record_count(), 10);
}

/// The same owner racing against themselves gets exactly one coupon.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_repeats_issue_once() {
    let harness = create_test_env();
    let offline = pool("offline");
    harness.inventory.init_pool(&offline, 10).await.unwrap();
    let service = Arc::new(IssuanceService::new(harness.env.clone()));

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let service = Arc::clone(&service);
            let offline = offline.clone();
            tokio::spawn(async move {
                service
                    .issue(&offline, &IssueRequest::for_owner("user123"))
                    .await
            })
        })
        .collect();

    let mut granted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => granted += 1,
            Err(e) => assert!(matches!(e, CouponError::AlreadyIssued { .. })),
        }
    }

    assert_eq!(granted, 1);
    assert_eq!(harness.inventory.remaining(&offline).await.unwrap(), Some(9));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_grants_never_exceed_inventory_or_repeat(
        quantity in 0_u64..15,
        owners in prop::collection::vec(owner_ids(), 0..40),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let (granted, remaining, distinct) = runtime.block_on(async {
            let harness = create_test_env();
            let offline = pool("offline");
            harness.inventory.init_pool(&offline, quantity).await.unwrap();
            let service = IssuanceService::new(harness.env.clone());

            let mut granted = 0_u64;
            for owner in &owners {
                if service.issue(&offline, &IssueRequest::for_owner(owner.clone())).await.is_ok() {
                    granted += 1;
                }
            }
            let remaining = harness.inventory.remaining(&offline).await.unwrap();
            let distinct: HashSet<_> = owners.iter().map(|o| o.trim().to_string()).collect();
            (granted, remaining, distinct.len() as u64)
        });

        prop_assert_eq!(granted, quantity.min(distinct));
        prop_assert_eq!(remaining, Some(i64::try_from(quantity - granted).unwrap()));
    }
}
