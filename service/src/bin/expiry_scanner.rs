//! Periodic expiry scanner.
//!
//! Publishes every live coupon record to the migration topic once per
//! `SCAN_INTERVAL_SECS`, until Ctrl+C. `--once` runs a single pass and exits.

use clap::Parser;
use coupon_service::bootstrap::{self, BoxError, LedgerMode};
use coupon_service::scanner::ExpiryScanner;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::info;

/// Command-line arguments for `expiry-scanner`.
#[derive(Parser, Debug, Clone)]
#[command(name = "expiry-scanner", version, about = "Publish live coupons for migration")]
struct CliArgs {
    /// Run one scan and exit.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let args = CliArgs::parse();
    let config = bootstrap::init("coupon_service=info,expiry_scanner=info")?;
    let env = bootstrap::connect(&config, LedgerMode::Lazy).await?;

    let mut scanner = ExpiryScanner::new(env, config.pools()?);
    if let Some(window) = config.scan_lookahead() {
        scanner = scanner.with_lookahead(window);
    }

    if args.once {
        let report = scanner.scan_once().await?;
        info!(?report, "Single scan finished");
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let interval = config.scan_interval();
    let task = tokio::spawn(async move { scanner.run(interval, shutdown_rx).await });

    signal::ctrl_c().await?;
    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
    task.await?;

    Ok(())
}
