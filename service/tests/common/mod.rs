//! Shared setup for the service integration tests.

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]

use coupon_core::PoolName;
use coupon_service::CouponEnvironment;
use coupon_testing::helpers::init_test_tracing;
use coupon_testing::{
    FixedClock, InMemoryCouponLedger, InMemoryInventoryStore, InMemoryMigrationQueue, test_clock,
};
use std::sync::Arc;
use std::time::Duration;

/// Fakes plus the environment built from them.
pub struct TestHarness {
    pub clock: FixedClock,
    pub inventory: InMemoryInventoryStore,
    pub ledger: InMemoryCouponLedger,
    pub queue: InMemoryMigrationQueue,
    pub env: CouponEnvironment,
}

/// Harness with the clock at 2025-02-24 10:00 KST and an immediate-redelivery queue.
pub fn create_test_env() -> TestHarness {
    create_test_env_with_queue(InMemoryMigrationQueue::new())
}

/// Harness around a preconfigured queue.
pub fn create_test_env_with_queue(queue: InMemoryMigrationQueue) -> TestHarness {
    init_test_tracing();

    let clock = test_clock();
    let inventory = InMemoryInventoryStore::new(Arc::new(clock.clone()));
    let ledger = InMemoryCouponLedger::new();
    let env = CouponEnvironment::new(
        Arc::new(inventory.clone()),
        Arc::new(ledger.clone()),
        Arc::new(queue.clone()),
        Arc::new(clock.clone()),
    );

    TestHarness {
        clock,
        inventory,
        ledger,
        queue,
        env,
    }
}

pub fn pool(name: &str) -> PoolName {
    PoolName::new(name).unwrap()
}

/// Poll `check` until it holds, for up to two seconds.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
