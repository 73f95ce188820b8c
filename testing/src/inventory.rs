//! In-memory [`InventoryStore`].
//!
//! Mirrors the Redis key layout and semantics closely enough for service
//! tests: a single lock makes [`InventoryStore::issue`] atomic, and records
//! disappear once the injected clock passes their `expires_at`.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on a poisoned lock

use coupon_core::environment::Clock;
use coupon_core::inventory::{
    InventoryError, InventoryStore, IssueCommand, RawCoupon, Reservation, StoreFuture, keys,
};
use coupon_core::types::{CouponId, CouponRecord, OwnerId, PoolName};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
struct StoredRecord {
    coupon_id: CouponId,
    payload: String,
    expires_at: i64,
}

#[derive(Debug, Default)]
struct State {
    counters: HashMap<String, i64>,
    received: HashMap<String, HashSet<String>>,
    records: BTreeMap<String, StoredRecord>,
    owner_map: HashMap<String, HashMap<String, String>>,
}

/// In-memory inventory store with TTL driven by an injected [`Clock`].
///
/// # Example
///
/// ```
/// use coupon_testing::{InMemoryInventoryStore, test_clock};
/// use coupon_core::inventory::InventoryStore;
/// use coupon_core::PoolName;
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryInventoryStore::new(Arc::new(test_clock()));
/// let pool = PoolName::new("offline")?;
/// store.init_pool(&pool, 10).await?;
/// assert_eq!(store.remaining(&pool).await?, Some(10));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryInventoryStore {
    state: Arc<Mutex<State>>,
    clock: Arc<dyn Clock>,
    unavailable: Arc<AtomicBool>,
    fail_deletes: Arc<AtomicBool>,
    issue_calls: Arc<AtomicUsize>,
}

impl InMemoryInventoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            clock,
            unavailable: Arc::new(AtomicBool::new(false)),
            fail_deletes: Arc::new(AtomicBool::new(false)),
            issue_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Make every operation fail with a connection error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make [`InventoryStore::delete_coupon`] fail.
    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Number of times [`InventoryStore::issue`] reached the store.
    #[must_use]
    pub fn issue_calls(&self) -> usize {
        self.issue_calls.load(Ordering::SeqCst)
    }

    /// Live record for `coupon_id`, decoded.
    #[must_use]
    pub fn record(&self, coupon_id: &CouponId) -> Option<CouponRecord> {
        let mut state = self.lock();
        self.purge_expired(&mut state);
        state
            .records
            .get(&keys::coupon(coupon_id))
            .and_then(|stored| serde_json::from_str(&stored.payload).ok())
    }

    /// Number of live records across all pools.
    #[must_use]
    pub fn record_count(&self) -> usize {
        let mut state = self.lock();
        self.purge_expired(&mut state);
        state.records.len()
    }

    /// Number of owners in the dedup set of `pool`.
    #[must_use]
    pub fn received_count(&self, pool: &PoolName) -> usize {
        self.lock()
            .received
            .get(&keys::received(pool))
            .map_or(0, HashSet::len)
    }

    /// Coupon id recorded for `owner` in `pool`'s owner map.
    #[must_use]
    pub fn owner_coupon(&self, pool: &PoolName, owner: &OwnerId) -> Option<String> {
        self.lock()
            .owner_map
            .get(&keys::owner_map(pool))
            .and_then(|map| map.get(owner.as_str()).cloned())
    }

    /// Store a raw payload under `coupon_id`, bypassing issuance.
    ///
    /// Lets tests plant malformed or legacy records.
    pub fn insert_raw(&self, coupon_id: &CouponId, payload: impl Into<String>, expires_at: i64) {
        self.lock().records.insert(
            keys::coupon(coupon_id),
            StoredRecord {
                coupon_id: coupon_id.clone(),
                payload: payload.into(),
                expires_at,
            },
        );
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    fn purge_expired(&self, state: &mut State) {
        let now = self.clock.now().timestamp();
        state.records.retain(|_, stored| stored.expires_at >= now);
    }

    fn check_available(&self, operation: &str) -> Result<(), InventoryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(InventoryError::ConnectionFailed(format!(
                "{operation}: store unavailable"
            )));
        }
        Ok(())
    }

    fn apply_issue(&self, command: &IssueCommand) -> Result<Reservation, InventoryError> {
        let payload = serde_json::to_string(&command.record)
            .map_err(|e| InventoryError::SerializationFailed(e.to_string()))?;

        let mut state = self.lock();
        self.purge_expired(&mut state);

        let received_key = keys::received(&command.pool);
        let owner = command.owner_id.as_str();
        if state
            .received
            .get(&received_key)
            .is_some_and(|set| set.contains(owner))
        {
            return Ok(Reservation::AlreadyIssued);
        }

        let Some(counter) = state
            .counters
            .get_mut(&keys::counter(&command.pool))
            .filter(|remaining| **remaining > 0)
        else {
            return Ok(Reservation::NoInventory);
        };
        *counter -= 1;
        let remaining = u64::try_from(*counter).unwrap_or(0);

        state
            .received
            .entry(received_key)
            .or_default()
            .insert(owner.to_string());
        state.records.insert(
            keys::coupon(&command.coupon_id),
            StoredRecord {
                coupon_id: command.coupon_id.clone(),
                payload,
                expires_at: command.expires_at,
            },
        );
        state
            .owner_map
            .entry(keys::owner_map(&command.pool))
            .or_default()
            .insert(owner.to_string(), command.coupon_id.to_string());

        Ok(Reservation::Issued { remaining })
    }
}

impl InventoryStore for InMemoryInventoryStore {
    fn has_received<'a>(&'a self, pool: &'a PoolName, owner: &'a OwnerId) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            self.check_available("has_received")?;
            Ok(self
                .lock()
                .received
                .get(&keys::received(pool))
                .is_some_and(|set| set.contains(owner.as_str())))
        })
    }

    fn issue<'a>(&'a self, command: &'a IssueCommand) -> StoreFuture<'a, Reservation> {
        Box::pin(async move {
            self.check_available("issue")?;
            self.issue_calls.fetch_add(1, Ordering::SeqCst);
            self.apply_issue(command)
        })
    }

    fn remaining<'a>(&'a self, pool: &'a PoolName) -> StoreFuture<'a, Option<i64>> {
        Box::pin(async move {
            self.check_available("remaining")?;
            Ok(self.lock().counters.get(&keys::counter(pool)).copied())
        })
    }

    fn scan_coupons<'a>(&'a self, pool: &'a PoolName) -> StoreFuture<'a, Vec<RawCoupon>> {
        Box::pin(async move {
            self.check_available("scan")?;
            let mut state = self.lock();
            self.purge_expired(&mut state);
            Ok(state
                .records
                .values()
                .filter(|stored| stored.coupon_id.pool() == pool)
                .map(|stored| RawCoupon {
                    coupon_id: stored.coupon_id.clone(),
                    payload: Some(stored.payload.clone()),
                })
                .collect())
        })
    }

    fn coupon_exists<'a>(&'a self, coupon_id: &'a CouponId) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            self.check_available("coupon_exists")?;
            let mut state = self.lock();
            self.purge_expired(&mut state);
            Ok(state.records.contains_key(&keys::coupon(coupon_id)))
        })
    }

    fn delete_coupon<'a>(&'a self, coupon_id: &'a CouponId) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            self.check_available("delete_coupon")?;
            if self.fail_deletes.load(Ordering::SeqCst) {
                return Err(InventoryError::CommandFailed(
                    "delete_coupon: injected failure".to_string(),
                ));
            }
            let mut state = self.lock();
            self.purge_expired(&mut state);
            Ok(state.records.remove(&keys::coupon(coupon_id)).is_some())
        })
    }

    fn init_pool<'a>(&'a self, pool: &'a PoolName, quantity: u64) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            self.check_available("init_pool")?;
            let quantity = i64::try_from(quantity).unwrap_or(i64::MAX);
            let mut state = self.lock();
            let key = keys::counter(pool);
            if state.counters.contains_key(&key) {
                return Ok(false);
            }
            state.counters.insert(key, quantity);
            Ok(true)
        })
    }

    fn reset_pool<'a>(&'a self, pool: &'a PoolName, quantity: u64) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.check_available("reset_pool")?;
            let quantity = i64::try_from(quantity).unwrap_or(i64::MAX);
            self.lock().counters.insert(keys::counter(pool), quantity);
            Ok(())
        })
    }
}
