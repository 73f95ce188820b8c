//! Set the starting inventory of every configured pool.
//!
//! By default only pools without a counter are written. `--force` overwrites
//! live counters.

use clap::Parser;
use coupon_service::bootstrap::{self, BoxError, LedgerMode};
use coupon_service::initializer::PoolInitializer;
use tracing::info;

/// Command-line arguments for `init-pools`.
#[derive(Parser, Debug, Clone)]
#[command(name = "init-pools", version, about = "Initialize coupon pool inventory")]
struct CliArgs {
    /// Overwrite existing counters. Resets live inventory.
    #[arg(long)]
    force: bool,

    /// Starting quantity; defaults to `INITIAL_QUANTITY`.
    #[arg(long)]
    quantity: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let args = CliArgs::parse();
    let config = bootstrap::init("coupon_service=info,init_pools=info")?;
    let env = bootstrap::connect(&config, LedgerMode::Lazy).await?;

    let quantity = args.quantity.unwrap_or(config.coupons.initial_quantity);
    let initializer = PoolInitializer::new(env, config.pools()?, quantity);

    if args.force {
        initializer.force_reset_pools().await?;
        info!(quantity, "Pools force-reset");
    } else {
        let report = initializer.initialize_pools().await?;
        info!(
            initialized = ?report.initialized,
            untouched = ?report.untouched,
            "Pools initialized"
        );
    }

    Ok(())
}
