//! Persistence worker.
//!
//! Consumes the migration topic until Ctrl+C. With `--stdin` it instead
//! migrates a batch envelope read from stdin and prints per-record responses.

use clap::Parser;
use coupon_service::bootstrap::{self, BoxError, LedgerMode};
use coupon_service::consumer::MigrationConsumer;
use coupon_service::intake::{migrate_batch, parse_envelope};
use coupon_service::worker::PersistenceWorker;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::info;

/// Command-line arguments for `persistence-worker`.
#[derive(Parser, Debug, Clone)]
#[command(name = "persistence-worker", version, about = "Move expired coupons into the durable store")]
struct CliArgs {
    /// Migrate a batch envelope from stdin instead of consuming the topic.
    #[arg(long)]
    stdin: bool,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let args = CliArgs::parse();
    let config = bootstrap::init("coupon_service=info,persistence_worker=info")?;
    let env = bootstrap::connect(&config, LedgerMode::Migrated).await?;
    let queue = Arc::clone(&env.queue);
    let worker = PersistenceWorker::new(env);

    if args.stdin {
        let mut raw = Vec::new();
        tokio::io::stdin().read_to_end(&mut raw).await?;
        let responses = migrate_batch(&worker, parse_envelope(&raw)?).await;
        println!("{}", serde_json::to_string_pretty(&responses)?);
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let consumer = MigrationConsumer::builder()
        .queue(queue)
        .worker(worker)
        .shutdown(shutdown_rx)
        .retry_delay(config.redelivery_delay())
        .build()?;
    let handle = consumer.spawn();

    signal::ctrl_c().await?;
    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
    handle.await?;

    Ok(())
}
