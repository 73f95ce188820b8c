//! # Coupon Core
//!
//! Domain types and contracts for issuing a strictly limited number of coupons.
//!
//! The system has two halves:
//!
//! - **Issuance**: validate a request, atomically reserve one unit of a pool's
//!   inventory, and write a coupon record that expires at the end of the owner's
//!   local calendar day.
//! - **Migration**: enumerate live records, push them through an ordered,
//!   deduplicating queue, and persist them idempotently in a durable store.
//!
//! ```text
//! request ─► IssuanceService ─► InventoryStore (ephemeral, TTL-bound)
//!                                      │
//!                                ExpiryScanner
//!                                      │
//!                                MigrationQueue
//!                                      │
//!                            PersistenceWorker ─► CouponLedger (durable)
//!                                      │
//!                                      └─► cleanup in InventoryStore
//! ```
//!
//! Every external collaborator is a trait in this crate so that production
//! adapters (Redis, `PostgreSQL`, Redpanda) and in-memory fakes can be swapped
//! through the same environment.

pub mod error;
pub mod expiry;
pub mod inventory;
pub mod ledger;
pub mod queue;
pub mod timeout;
pub mod types;

pub use error::CouponError;
pub use expiry::{
    ResolvedZone, expiry_timestamp, lookup_zone, resolve_timezone, resolve_timezone_strict,
};
pub use types::{
    CouponId, CouponRecord, DurableCouponRow, IssuedCoupon, MigrationMessage, OwnerId, PoolName,
};

/// Environment module - injected dependencies that are not stores.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// Expiry arithmetic depends on "now", so every component reads time
    /// through this trait instead of calling `Utc::now()` directly.
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
