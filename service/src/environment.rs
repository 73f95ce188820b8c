//! Injected dependencies shared by every service.
//!
//! Handles are built once per process and cloned into each service; tests
//! build the same struct from the in-memory fakes.

use chrono_tz::Tz;
use coupon_core::environment::Clock;
use coupon_core::expiry::DEFAULT_TIMEZONE;
use coupon_core::inventory::InventoryStore;
use coupon_core::ledger::CouponLedger;
use coupon_core::queue::MigrationQueue;
use std::sync::Arc;

/// Stores, queue and clock used by the coupon services.
#[derive(Clone)]
pub struct CouponEnvironment {
    /// Ephemeral inventory store.
    pub inventory: Arc<dyn InventoryStore>,
    /// Durable ledger.
    pub ledger: Arc<dyn CouponLedger>,
    /// Migration queue.
    pub queue: Arc<dyn MigrationQueue>,
    /// Source of "now".
    pub clock: Arc<dyn Clock>,
    /// Zone used when a request names none or an unknown one.
    pub default_timezone: Tz,
}

impl CouponEnvironment {
    /// Create an environment using [`DEFAULT_TIMEZONE`].
    #[must_use]
    pub fn new(
        inventory: Arc<dyn InventoryStore>,
        ledger: Arc<dyn CouponLedger>,
        queue: Arc<dyn MigrationQueue>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inventory,
            ledger,
            queue,
            clock,
            default_timezone: DEFAULT_TIMEZONE,
        }
    }

    /// Override the default zone.
    #[must_use]
    pub fn with_default_timezone(mut self, tz: Tz) -> Self {
        self.default_timezone = tz;
        self
    }
}

impl std::fmt::Debug for CouponEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CouponEnvironment")
            .field("default_timezone", &self.default_timezone.name())
            .finish_non_exhaustive()
    }
}
