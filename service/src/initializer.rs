//! Pool Initializer.
//!
//! Sets starting counters. The normal path only writes pools that have no
//! counter yet; overwriting a live pool is a separate, explicit operation.

use coupon_core::error::Result;
use coupon_core::PoolName;
use tracing::{info, warn};

use crate::environment::CouponEnvironment;

/// What [`PoolInitializer::initialize_pools`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitReport {
    /// Pools whose counter was created.
    pub initialized: Vec<PoolName>,
    /// Pools that already had a counter and were left alone.
    pub untouched: Vec<PoolName>,
}

/// Writes the starting inventory of each pool.
#[derive(Debug, Clone)]
pub struct PoolInitializer {
    env: CouponEnvironment,
    pools: Vec<PoolName>,
    quantity: u64,
}

impl PoolInitializer {
    /// Initializer for `pools`, each starting at `quantity`.
    #[must_use]
    pub const fn new(env: CouponEnvironment, pools: Vec<PoolName>, quantity: u64) -> Self {
        Self {
            env,
            pools,
            quantity,
        }
    }

    /// Create each pool's counter unless it already exists.
    ///
    /// # Errors
    ///
    /// Returns [`coupon_core::CouponError::Store`] on the first failed write.
    /// Pools before it keep their new counters.
    pub async fn initialize_pools(&self) -> Result<InitReport> {
        let mut report = InitReport::default();
        for pool in &self.pools {
            if self.env.inventory.init_pool(pool, self.quantity).await? {
                info!(pool = %pool, quantity = self.quantity, "Pool initialized");
                report.initialized.push(pool.clone());
            } else {
                info!(pool = %pool, "Pool already initialized, leaving it alone");
                report.untouched.push(pool.clone());
            }
        }
        Ok(report)
    }

    /// Overwrite each pool's counter, whatever its current value.
    ///
    /// Running this while coupons are being issued silently resets live
    /// inventory.
    ///
    /// # Errors
    ///
    /// Returns [`coupon_core::CouponError::Store`] on the first failed write.
    pub async fn force_reset_pools(&self) -> Result<()> {
        for pool in &self.pools {
            let previous = self.env.inventory.remaining(pool).await?;
            self.env.inventory.reset_pool(pool, self.quantity).await?;
            warn!(
                pool = %pool,
                ?previous,
                quantity = self.quantity,
                "Pool inventory force-reset"
            );
        }
        Ok(())
    }
}
