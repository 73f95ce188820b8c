//! Expiry Scanner / Migration Publisher.
//!
//! Walks the live records of every configured pool and publishes one
//! [`MigrationMessage`] per record onto the migration queue, keyed for
//! deduplication by coupon id. The scanner never deletes records; the
//! persistence worker does that once the durable write has committed.

use chrono::Duration as ChronoDuration;
use coupon_core::error::Result;
use coupon_core::{CouponRecord, MigrationMessage, PoolName};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

use crate::environment::CouponEnvironment;
use crate::metrics;

/// Counts from one pass over all pools.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Records found.
    pub scanned: usize,
    /// Records accepted by the queue (including ones it deduplicated).
    pub published: usize,
    /// Records left alone: unreadable, already gone, or outside the window.
    pub skipped: usize,
    /// Records the queue refused. They are picked up again on the next pass.
    pub publish_failures: usize,
}

impl ScanReport {
    fn absorb(&mut self, other: Self) {
        self.scanned += other.scanned;
        self.published += other.published;
        self.skipped += other.skipped;
        self.publish_failures += other.publish_failures;
    }
}

/// Periodic publisher of live records.
#[derive(Debug, Clone)]
pub struct ExpiryScanner {
    env: CouponEnvironment,
    pools: Vec<PoolName>,
    lookahead: Option<Duration>,
}

impl ExpiryScanner {
    /// Scan `pools`, publishing every live record.
    #[must_use]
    pub const fn new(env: CouponEnvironment, pools: Vec<PoolName>) -> Self {
        Self {
            env,
            pools,
            lookahead: None,
        }
    }

    /// Only publish records expiring within `window` of now.
    #[must_use]
    pub fn with_lookahead(mut self, window: Duration) -> Self {
        self.lookahead = Some(window);
        self
    }

    /// One pass over every pool.
    ///
    /// # Errors
    ///
    /// Returns [`coupon_core::CouponError::Store`] if a pool cannot be
    /// enumerated. Pools scanned before the failure have already published.
    pub async fn scan_once(&self) -> Result<ScanReport> {
        let mut report = ScanReport::default();
        for pool in &self.pools {
            report.absorb(self.scan_pool(pool).await?);
        }
        info!(
            scanned = report.scanned,
            published = report.published,
            skipped = report.skipped,
            publish_failures = report.publish_failures,
            "Expiry scan complete"
        );
        Ok(report)
    }

    #[instrument(skip_all, fields(pool = %pool))]
    async fn scan_pool(&self, pool: &PoolName) -> Result<ScanReport> {
        let coupons = self.env.inventory.scan_coupons(pool).await?;
        let horizon = self.lookahead.map(|window| {
            let window = ChronoDuration::from_std(window).unwrap_or(ChronoDuration::MAX);
            self.env
                .clock
                .now()
                .checked_add_signed(window)
                .map_or(i64::MAX, |t| t.timestamp())
        });

        let mut report = ScanReport {
            scanned: coupons.len(),
            ..ScanReport::default()
        };

        for raw in coupons {
            let Some(payload) = raw.payload else {
                debug!(coupon_id = %raw.coupon_id, "Record expired before it was read");
                metrics::record_scan_skipped(pool.as_str(), "vanished");
                report.skipped += 1;
                continue;
            };

            let record: CouponRecord = match serde_json::from_str(&payload) {
                Ok(record) => record,
                Err(e) => {
                    warn!(coupon_id = %raw.coupon_id, error = %e, "Skipping unparseable record");
                    metrics::record_scan_skipped(pool.as_str(), "unparseable");
                    report.skipped += 1;
                    continue;
                },
            };

            if horizon.is_some_and(|h| record.expiry(self.env.default_timezone) > h) {
                metrics::record_scan_skipped(pool.as_str(), "outside_window");
                report.skipped += 1;
                continue;
            }

            let message = MigrationMessage::from_record(raw.coupon_id, &record);
            let body = match serde_json::to_vec(&message) {
                Ok(body) => body,
                Err(e) => {
                    warn!(coupon_id = %message.coupon_id, error = %e, "Could not encode migration message");
                    metrics::record_scan_skipped(pool.as_str(), "unparseable");
                    report.skipped += 1;
                    continue;
                },
            };

            match self.env.queue.publish(&body, &message.dedup_id()).await {
                Ok(()) => {
                    debug!(coupon_id = %message.coupon_id, "Published for migration");
                    report.published += 1;
                },
                Err(e) => {
                    warn!(coupon_id = %message.coupon_id, error = %e, "Publish failed");
                    metrics::record_scan_publish_failure(pool.as_str());
                    report.publish_failures += 1;
                },
            }
        }

        metrics::record_scan_published(
            pool.as_str(),
            u64::try_from(report.published).unwrap_or(u64::MAX),
        );
        Ok(report)
    }

    /// Scan every `interval` until `shutdown` fires.
    ///
    /// The first pass runs immediately. A failed pass is logged and the next
    /// one runs on schedule.
    pub async fn run(&self, interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        info!(pools = self.pools.len(), ?interval, "Expiry scanner started");
        // `interval` panics on a zero period.
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Expiry scanner received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.scan_once().await {
                        error!(error = %e, "Expiry scan failed");
                    }
                }
            }
        }

        info!("Expiry scanner stopped");
    }
}
