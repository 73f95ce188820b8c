//! Durable coupon ledger contract.

use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

use crate::types::{CouponId, DurableCouponRow, OwnerId};

/// Errors raised by a durable store adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Could not reach the database.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A query or transaction failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// A call did not complete within its deadline.
    #[error("Timed out during {operation}")]
    Timeout {
        /// Operation that timed out
        operation: &'static str,
    },
}

/// Boxed future returned by every [`CouponLedger`] operation.
pub type LedgerFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, LedgerError>> + Send + 'a>>;

/// Result of recording a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// The row was inserted and committed.
    Inserted,
    /// A row for `(coupon_id, member_id)` already existed. Nothing changed.
    AlreadyPresent,
}

/// Permanent store of migrated coupons.
///
/// `(coupon_id, member_id)` is unique. Recording the same pair twice must
/// leave exactly one row.
pub trait CouponLedger: Send + Sync {
    /// Insert `row` in one transaction unless it is already present.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the transaction fails or times out. No row
    /// is written in that case.
    fn record<'a>(&'a self, row: &'a DurableCouponRow) -> LedgerFuture<'a, RecordOutcome>;

    /// Whether a row for `(coupon_id, member_id)` exists.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the query fails or times out.
    fn exists<'a>(
        &'a self,
        coupon_id: &'a CouponId,
        member_id: &'a OwnerId,
    ) -> LedgerFuture<'a, bool>;
}
