//! Redis-backed [`InventoryStore`].
//!
//! # Key layout
//!
//! | key | type | content |
//! |---|---|---|
//! | `<pool>` | string | coupons left |
//! | `received_coupons:<pool>` | set | owners who already received one |
//! | `coupon:<pool>-<uuid>` | string | record JSON, `EXPIREAT` end of local day |
//! | `user_coupons:<pool>` | hash | owner → coupon id |
//!
//! # Atomicity
//!
//! Issuance runs as one Lua script, so the dedup check, the conditional
//! decrement and every write happen without interleaving. Two requests for
//! the last unit cannot both succeed and a rejected request leaves no trace.
//!
//! The script touches four keys of the same pool. This adapter targets a
//! standalone server (or a primary with replicas); on Redis Cluster those
//! keys would have to share a hash slot.
//!
//! # Enumeration
//!
//! Records are listed with cursor-based `SCAN MATCH coupon:<pool>-*`, never
//! `KEYS`, so a scan does not block the server.

use coupon_core::inventory::{
    InventoryError, InventoryStore, IssueCommand, RawCoupon, Reservation, StoreFuture, keys,
};
use coupon_core::timeout::{DEFAULT_STORE_TIMEOUT, with_timeout};
use coupon_core::types::{CouponId, OwnerId, PoolName};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError, Script};
use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

/// Atomic issuance.
///
/// KEYS: counter, dedup set, record, owner map.
/// ARGV: owner id, record JSON, expiry (epoch seconds), coupon id.
/// Returns the counter after the decrement, `-1` if the owner already
/// received a coupon, `-2` if the pool is exhausted or missing.
const ISSUE_SCRIPT: &str = r"
    if redis.call('SISMEMBER', KEYS[2], ARGV[1]) == 1 then
        return -1
    end
    local remaining = tonumber(redis.call('GET', KEYS[1]))
    if remaining == nil or remaining <= 0 then
        return -2
    end
    remaining = redis.call('DECR', KEYS[1])
    redis.call('SADD', KEYS[2], ARGV[1])
    redis.call('SET', KEYS[3], ARGV[2])
    redis.call('EXPIREAT', KEYS[3], ARGV[3])
    redis.call('HSET', KEYS[4], ARGV[1], ARGV[4])
    return remaining
";

const ALREADY_ISSUED: i64 = -1;
const NO_INVENTORY: i64 = -2;

/// Default `COUNT` hint per `SCAN` page.
const DEFAULT_SCAN_COUNT: usize = 500;

/// `Redis` inventory store.
///
/// Cheap to clone; clones share the same `ConnectionManager`.
#[derive(Clone)]
pub struct RedisInventoryStore {
    conn_manager: ConnectionManager,
    issue_script: Script,
    timeout: Duration,
    scan_count: usize,
}

impl RedisInventoryStore {
    /// Connect to `redis_url` with the default per-call timeout.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::ConnectionFailed`] if the URL is malformed or
    /// the server cannot be reached.
    pub async fn new(redis_url: &str) -> Result<Self, InventoryError> {
        Self::with_timeout(redis_url, DEFAULT_STORE_TIMEOUT).await
    }

    /// Connect to `redis_url`, bounding every call by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::ConnectionFailed`] if the URL is malformed or
    /// the server cannot be reached within `timeout`.
    pub async fn with_timeout(redis_url: &str, timeout: Duration) -> Result<Self, InventoryError> {
        let client = Client::open(redis_url).map_err(|e| {
            InventoryError::ConnectionFailed(format!("Failed to create Redis client: {e}"))
        })?;

        let conn_manager = with_timeout(
            timeout,
            async {
                ConnectionManager::new(client).await.map_err(|e| {
                    InventoryError::ConnectionFailed(format!(
                        "Failed to create Redis connection manager: {e}"
                    ))
                })
            },
            || InventoryError::Timeout {
                operation: "connect",
            },
        )
        .await?;

        tracing::info!("RedisInventoryStore initialized");

        Ok(Self {
            conn_manager,
            issue_script: Script::new(ISSUE_SCRIPT),
            timeout,
            scan_count: DEFAULT_SCAN_COUNT,
        })
    }

    /// Override the `SCAN` page size hint.
    #[must_use]
    pub const fn with_scan_count(mut self, count: usize) -> Self {
        self.scan_count = count;
        self
    }

    /// Run one Redis call under the configured deadline.
    async fn call<T, F>(&self, operation: &'static str, future: F) -> Result<T, InventoryError>
    where
        F: Future<Output = Result<T, RedisError>>,
    {
        with_timeout(
            self.timeout,
            async { future.await.map_err(|e| command_error(operation, &e)) },
            || InventoryError::Timeout { operation },
        )
        .await
    }
}

fn command_error(operation: &str, e: &RedisError) -> InventoryError {
    if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
        InventoryError::ConnectionFailed(format!("{operation}: {e}"))
    } else {
        InventoryError::CommandFailed(format!("{operation}: {e}"))
    }
}

/// Pair scanned keys with their values.
///
/// A reply shorter than the key list marks the unmatched keys as gone, so
/// they are still reported instead of silently dropped.
fn pair_values(
    keys: Vec<String>,
    values: Vec<Option<String>>,
) -> Vec<(String, Option<String>)> {
    if values.len() != keys.len() {
        tracing::warn!(
            keys = keys.len(),
            values = values.len(),
            "MGET reply length does not match key count"
        );
    }
    let mut values = values.into_iter();
    keys.into_iter()
        .map(|key| (key, values.next().flatten()))
        .collect()
}

impl InventoryStore for RedisInventoryStore {
    fn has_received<'a>(&'a self, pool: &'a PoolName, owner: &'a OwnerId) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let key = keys::received(pool);
            self.call("has_received", conn.sismember(&key, owner.as_str()))
                .await
        })
    }

    fn issue<'a>(&'a self, command: &'a IssueCommand) -> StoreFuture<'a, Reservation> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let record = serde_json::to_string(&command.record)
                .map_err(|e| InventoryError::SerializationFailed(e.to_string()))?;
            let coupon_id = command.coupon_id.to_string();

            let mut invocation = self.issue_script.prepare_invoke();
            invocation
                .key(keys::counter(&command.pool))
                .key(keys::received(&command.pool))
                .key(keys::coupon(&command.coupon_id))
                .key(keys::owner_map(&command.pool))
                .arg(command.owner_id.as_str())
                .arg(&record)
                .arg(command.expires_at)
                .arg(&coupon_id);

            let result: i64 = self
                .call("issue", invocation.invoke_async(&mut conn))
                .await?;

            let reservation = match result {
                ALREADY_ISSUED => Reservation::AlreadyIssued,
                NO_INVENTORY => Reservation::NoInventory,
                remaining => Reservation::Issued {
                    remaining: u64::try_from(remaining).unwrap_or(0),
                },
            };

            tracing::debug!(
                pool = %command.pool,
                owner_id = %command.owner_id,
                coupon_id = %coupon_id,
                ?reservation,
                "Issuance script completed"
            );

            Ok(reservation)
        })
    }

    fn remaining<'a>(&'a self, pool: &'a PoolName) -> StoreFuture<'a, Option<i64>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let key = keys::counter(pool);
            self.call("remaining", conn.get(&key)).await
        })
    }

    fn scan_coupons<'a>(&'a self, pool: &'a PoolName) -> StoreFuture<'a, Vec<RawCoupon>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let pattern = keys::coupon_pattern(pool);
            let mut coupons = Vec::new();
            let mut seen = HashSet::new();
            let mut cursor: u64 = 0;

            loop {
                let (next, page): (u64, Vec<String>) = self
                    .call(
                        "scan",
                        redis::cmd("SCAN")
                            .arg(cursor)
                            .arg("MATCH")
                            .arg(&pattern)
                            .arg("COUNT")
                            .arg(self.scan_count)
                            .query_async(&mut conn),
                    )
                    .await?;

                // SCAN may return a key more than once.
                let fresh: Vec<String> = page
                    .into_iter()
                    .filter(|key| seen.insert(key.clone()))
                    .collect();

                if !fresh.is_empty() {
                    // Explicit MGET: the typed helper turns one key into a GET.
                    let values: Vec<Option<String>> = self
                        .call(
                            "scan_values",
                            redis::cmd("MGET").arg(&fresh).query_async(&mut conn),
                        )
                        .await?;

                    for (key, payload) in pair_values(fresh, values) {
                        if let Some(coupon_id) = keys::coupon_id_from_key(&key) {
                            coupons.push(RawCoupon { coupon_id, payload });
                        } else {
                            tracing::warn!(key = %key, "Skipping key with unparseable coupon id");
                        }
                    }
                }

                if next == 0 {
                    break;
                }
                cursor = next;
            }

            tracing::debug!(pool = %pool, count = coupons.len(), "Scanned coupon records");
            Ok(coupons)
        })
    }

    fn coupon_exists<'a>(&'a self, coupon_id: &'a CouponId) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let key = keys::coupon(coupon_id);
            self.call("coupon_exists", conn.exists(&key)).await
        })
    }

    fn delete_coupon<'a>(&'a self, coupon_id: &'a CouponId) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let key = keys::coupon(coupon_id);
            let deleted: usize = self.call("delete_coupon", conn.del(&key)).await?;
            Ok(deleted > 0)
        })
    }

    fn init_pool<'a>(&'a self, pool: &'a PoolName, quantity: u64) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let key = keys::counter(pool);
            self.call("init_pool", conn.set_nx(&key, quantity)).await
        })
    }

    fn reset_pool<'a>(&'a self, pool: &'a PoolName, quantity: u64) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let key = keys::counter(pool);
            self.call("reset_pool", conn.set(&key, quantity)).await
        })
    }
}
