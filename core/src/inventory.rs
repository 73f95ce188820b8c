//! Ephemeral inventory store contract.
//!
//! The store holds, per pool:
//!
//! - an integer counter of coupons still available,
//! - the set of owners who already received a coupon,
//! - one TTL-bound record per live coupon,
//! - an owner → coupon mapping for lookups.
//!
//! [`InventoryStore::issue`] is the only operation that touches more than one
//! of those, and it must apply all of them atomically: either every effect of
//! an issuance is visible or none is.

use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

use crate::types::{CouponId, CouponRecord, OwnerId, PoolName};

/// Errors raised by an ephemeral store adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InventoryError {
    /// Could not reach the store.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The store rejected or failed a command.
    #[error("Command failed: {0}")]
    CommandFailed(String),

    /// A value could not be encoded for storage.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// A call did not complete within its deadline.
    #[error("Timed out during {operation}")]
    Timeout {
        /// Operation that timed out
        operation: &'static str,
    },
}

/// Boxed future returned by every [`InventoryStore`] operation.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, InventoryError>> + Send + 'a>>;

/// Everything the store needs to apply one issuance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueCommand {
    /// Pool to draw from.
    pub pool: PoolName,
    /// Recipient.
    pub owner_id: OwnerId,
    /// Identifier of the coupon to create.
    pub coupon_id: CouponId,
    /// Record to store.
    pub record: CouponRecord,
    /// Absolute expiry of the record key, epoch seconds.
    pub expires_at: i64,
}

/// Outcome of an atomic issuance attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    /// Inventory was decremented and the record written.
    Issued {
        /// Counter value after the decrement.
        remaining: u64,
    },
    /// The owner is already in the pool's dedup set. Nothing changed.
    AlreadyIssued,
    /// The counter is missing or not positive. Nothing changed.
    NoInventory,
}

/// A live record as found by enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCoupon {
    /// Coupon identifier recovered from the key.
    pub coupon_id: CouponId,
    /// Stored JSON, or `None` if the key expired between listing and reading.
    pub payload: Option<String>,
}

/// Ephemeral, TTL-capable store backing issuance.
///
/// # Dyn Compatibility
///
/// Operations return [`StoreFuture`] so the store can be shared as
/// `Arc<dyn InventoryStore>` across the issuance, scanner and worker paths.
pub trait InventoryStore: Send + Sync {
    /// Whether `owner` is in the dedup set of `pool`.
    ///
    /// Used as a cheap pre-check; [`InventoryStore::issue`] re-checks
    /// atomically.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError`] if the store cannot be queried.
    fn has_received<'a>(&'a self, pool: &'a PoolName, owner: &'a OwnerId) -> StoreFuture<'a, bool>;

    /// Atomically: re-check dedup, decrement the counter if positive, add the
    /// owner to the dedup set, write the record with its absolute expiry and
    /// record the owner → coupon mapping.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError`] if the store fails. No partial effects may
    /// remain in that case.
    fn issue<'a>(&'a self, command: &'a IssueCommand) -> StoreFuture<'a, Reservation>;

    /// Current counter value, or `None` if the pool was never initialized.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError`] if the store cannot be queried.
    fn remaining<'a>(&'a self, pool: &'a PoolName) -> StoreFuture<'a, Option<i64>>;

    /// Enumerate every live coupon record of `pool`.
    ///
    /// Adapters must page through the keyspace; a blocking full listing is
    /// not acceptable.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError`] if enumeration fails part-way.
    fn scan_coupons<'a>(&'a self, pool: &'a PoolName) -> StoreFuture<'a, Vec<RawCoupon>>;

    /// Whether the record for `coupon_id` is still live.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError`] if the store cannot be queried.
    fn coupon_exists<'a>(&'a self, coupon_id: &'a CouponId) -> StoreFuture<'a, bool>;

    /// Delete the record for `coupon_id`. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError`] if the delete fails.
    fn delete_coupon<'a>(&'a self, coupon_id: &'a CouponId) -> StoreFuture<'a, bool>;

    /// Set the counter of `pool` to `quantity` only if it does not exist.
    /// Returns whether the counter was set.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError`] if the write fails.
    fn init_pool<'a>(&'a self, pool: &'a PoolName, quantity: u64) -> StoreFuture<'a, bool>;

    /// Overwrite the counter of `pool` with `quantity`.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError`] if the write fails.
    fn reset_pool<'a>(&'a self, pool: &'a PoolName, quantity: u64) -> StoreFuture<'a, ()>;
}

/// Key layout shared by key-value adapters.
pub mod keys {
    use crate::types::{CouponId, PoolName};

    /// Prefix of every coupon record key.
    pub const COUPON_PREFIX: &str = "coupon:";

    /// Inventory counter.
    #[must_use]
    pub fn counter(pool: &PoolName) -> String {
        pool.as_str().to_string()
    }

    /// Dedup set of owners who received a coupon from `pool`.
    #[must_use]
    pub fn received(pool: &PoolName) -> String {
        format!("received_coupons:{pool}")
    }

    /// Owner → coupon hash.
    #[must_use]
    pub fn owner_map(pool: &PoolName) -> String {
        format!("user_coupons:{pool}")
    }

    /// Record key of a coupon.
    #[must_use]
    pub fn coupon(coupon_id: &CouponId) -> String {
        format!("{COUPON_PREFIX}{coupon_id}")
    }

    /// Glob matching every record of `pool`.
    #[must_use]
    pub fn coupon_pattern(pool: &PoolName) -> String {
        format!("{COUPON_PREFIX}{pool}-*")
    }

    /// Recover the coupon identifier from a record key.
    #[must_use]
    pub fn coupon_id_from_key(key: &str) -> Option<CouponId> {
        key.strip_prefix(COUPON_PREFIX)?.parse().ok()
    }
}
