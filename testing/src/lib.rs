//! # Coupon Testing
//!
//! Testing utilities for limited coupon issuance.
//!
//! This crate provides:
//! - In-memory implementations of every store and queue trait
//! - A controllable clock
//! - Failure injection for the unavailable-dependency paths
//! - proptest strategies for domain inputs
//!
//! ## Example
//!
//! ```ignore
//! use coupon_testing::{InMemoryInventoryStore, test_clock};
//!
//! #[tokio::test]
//! async fn test_issue() {
//!     let clock = Arc::new(test_clock());
//!     let store = InMemoryInventoryStore::new(clock.clone());
//!     store.init_pool(&pool, 10).await.unwrap();
//!     // ...
//! }
//! ```

use chrono::{DateTime, Utc};
use coupon_core::environment::Clock;

pub mod inventory;
pub mod ledger;
pub mod queue;

/// Mock implementations of Environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, RwLock};

    /// Settable clock for deterministic tests.
    ///
    /// Clones share the same time, so a test can hand one clone to the
    /// service under test and move time forward with another.
    ///
    /// # Example
    ///
    /// ```
    /// use coupon_testing::mocks::FixedClock;
    /// use coupon_core::environment::Clock;
    /// use chrono::{Duration, Utc};
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let before = clock.now();
    /// clock.advance(Duration::hours(1));
    /// assert_eq!(clock.now() - before, Duration::hours(1));
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: Arc<RwLock<DateTime<Utc>>>,
    }

    impl FixedClock {
        /// Create a clock stopped at `time`.
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(RwLock::new(time)),
            }
        }

        /// Jump to `time`.
        pub fn set(&self, time: DateTime<Utc>) {
            if let Ok(mut current) = self.time.write() {
                *current = time;
            }
        }

        /// Move forward by `by`.
        pub fn advance(&self, by: chrono::Duration) {
            if let Ok(mut current) = self.time.write() {
                *current += by;
            }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.read().unwrap_or_else(std::sync::PoisonError::into_inner)
        }
    }

    /// Create a default fixed clock for tests (2025-02-24 01:00:00 UTC, 10:00 in Seoul)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-02-24T01:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Test helpers and utilities.
pub mod helpers {
    /// Install a test-friendly `tracing` subscriber once per process.
    ///
    /// Output goes through the test harness writer so it is only shown for
    /// failing tests. Honors `RUST_LOG`.
    pub fn init_test_tracing() {
        use tracing_subscriber::EnvFilter;

        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;

    /// Owner identifiers as they arrive on the wire, including surrounding
    /// whitespace that validation trims away.
    pub fn owner_ids() -> impl Strategy<Value = String> {
        ("[ ]{0,2}", "[a-z][a-z0-9_]{2,15}", "[ ]{0,2}")
            .prop_map(|(lead, id, trail)| format!("{lead}{id}{trail}"))
    }

    /// Requested zone names: mostly real IANA zones, sometimes garbage or absent.
    pub fn requested_timezones() -> impl Strategy<Value = Option<String>> {
        prop_oneof![
            6 => prop::sample::select(chrono_tz::TZ_VARIANTS.to_vec())
                .prop_map(|tz| Some(tz.name().to_string())),
            1 => "[A-Z][a-z]{2,8}/[A-Z][a-z]{2,8}_Nowhere".prop_map(Some),
            1 => Just(None),
        ]
    }
}

// Re-export commonly used items
pub use inventory::InMemoryInventoryStore;
pub use ledger::InMemoryCouponLedger;
pub use mocks::{FixedClock, test_clock};
pub use queue::InMemoryMigrationQueue;
