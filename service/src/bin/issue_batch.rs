//! Issue coupons for a batch envelope read from stdin.
//!
//! ```text
//! echo '{"Records":[{"body":"{\"member_id\":\"user123\"}"}]}' | issue-batch --pool offline
//! ```
//!
//! Prints one `{statusCode, body}` response per record as a JSON array.

use clap::Parser;
use coupon_core::PoolName;
use coupon_service::bootstrap::{self, BoxError, LedgerMode};
use coupon_service::intake::{issue_batch, parse_envelope};
use coupon_service::issuance::IssuanceService;
use tokio::io::AsyncReadExt;
use tracing::info;

/// Command-line arguments for `issue-batch`.
#[derive(Parser, Debug, Clone)]
#[command(name = "issue-batch", version, about = "Issue coupons for a batch of requests")]
struct CliArgs {
    /// Pool to issue from.
    #[arg(long, env = "COUPON_POOL")]
    pool: PoolName,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let args = CliArgs::parse();
    let config = bootstrap::init("coupon_service=info,issue_batch=info")?;
    let env = bootstrap::connect(&config, LedgerMode::Lazy).await?;

    let mut raw = Vec::new();
    tokio::io::stdin().read_to_end(&mut raw).await?;
    let envelope = parse_envelope(&raw)?;

    let service = IssuanceService::new(env);
    let responses = issue_batch(&service, &args.pool, envelope).await;

    let settled = responses.iter().filter(|r| r.settled()).count();
    info!(pool = %args.pool, items = responses.len(), settled, "Batch processed");

    println!("{}", serde_json::to_string_pretty(&responses)?);
    Ok(())
}
