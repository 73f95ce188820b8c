//! In-memory [`CouponLedger`].

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use coupon_core::ledger::{CouponLedger, LedgerError, LedgerFuture, RecordOutcome};
use coupon_core::types::{CouponId, DurableCouponRow, OwnerId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

/// HashMap-backed ledger keyed by `(coupon_id, member_id)`.
///
/// # Example
///
/// ```
/// use coupon_testing::InMemoryCouponLedger;
///
/// let ledger = InMemoryCouponLedger::new();
/// assert!(ledger.is_empty());
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryCouponLedger {
    rows: Arc<RwLock<HashMap<(String, String), DurableCouponRow>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryCouponLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail, as if the database were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of stored rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.read().unwrap().len()
    }

    /// Whether no rows are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.read().unwrap().is_empty()
    }

    /// Stored row for `coupon_id`, whoever owns it.
    #[must_use]
    pub fn row(&self, coupon_id: &CouponId) -> Option<DurableCouponRow> {
        let coupon_id = coupon_id.to_string();
        self.rows
            .read()
            .unwrap()
            .iter()
            .find(|((id, _), _)| *id == coupon_id)
            .map(|(_, row)| row.clone())
    }

    /// Insert a row directly, bypassing [`CouponLedger::record`].
    pub fn insert(&self, row: DurableCouponRow) {
        self.rows.write().unwrap().insert(
            (row.coupon_id.to_string(), row.member_id.to_string()),
            row,
        );
    }

    fn check_available(&self) -> Result<(), LedgerError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LedgerError::ConnectionFailed(
                "ledger unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

impl CouponLedger for InMemoryCouponLedger {
    fn record<'a>(&'a self, row: &'a DurableCouponRow) -> LedgerFuture<'a, RecordOutcome> {
        Box::pin(async move {
            self.check_available()?;
            let key = (row.coupon_id.to_string(), row.member_id.to_string());
            let mut rows = self.rows.write().unwrap();
            if rows.contains_key(&key) {
                return Ok(RecordOutcome::AlreadyPresent);
            }
            rows.insert(key, row.clone());
            Ok(RecordOutcome::Inserted)
        })
    }

    fn exists<'a>(
        &'a self,
        coupon_id: &'a CouponId,
        member_id: &'a OwnerId,
    ) -> LedgerFuture<'a, bool> {
        Box::pin(async move {
            self.check_available()?;
            let key = (coupon_id.to_string(), member_id.to_string());
            Ok(self.rows.read().unwrap().contains_key(&key))
        })
    }
}
