use coupon_core::ledger::{CouponLedger, LedgerError, LedgerFuture, RecordOutcome};
use coupon_core::timeout::{DEFAULT_LEDGER_TIMEOUT, with_timeout};
use coupon_core::types::{CouponId, DurableCouponRow, OwnerId};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::{Duration, Instant};

/// `PostgreSQL`-backed [`CouponLedger`].
///
/// # Example
///
/// ```no_run
/// use coupon_postgres::PostgresCouponLedger;
///
/// # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let ledger = PostgresCouponLedger::from_pool(pool);
/// ledger.migrate().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct PostgresCouponLedger {
    pool: PgPool,
    timeout: Duration,
}

impl PostgresCouponLedger {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            timeout: DEFAULT_LEDGER_TIMEOUT,
        }
    }

    /// Connect with at most `max_connections` pooled connections.
    ///
    /// `timeout` bounds both pool acquisition and every transaction.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::ConnectionFailed`] if the database is unreachable.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        timeout: Duration,
    ) -> Result<Self, LedgerError> {
        let pool = pool_options(max_connections, timeout)
            .connect(database_url)
            .await
            .map_err(|e| LedgerError::ConnectionFailed(format!("Failed to connect: {e}")))?;

        tracing::info!(max_connections, "PostgresCouponLedger connected");

        Ok(Self::from_pool(pool).with_timeout(timeout))
    }

    /// Build the pool without opening a connection.
    ///
    /// The first query connects, so a process that never writes to the
    /// ledger does not depend on the database being up.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::ConnectionFailed`] if `database_url` is malformed.
    pub fn connect_lazy(
        database_url: &str,
        max_connections: u32,
        timeout: Duration,
    ) -> Result<Self, LedgerError> {
        let pool = pool_options(max_connections, timeout)
            .connect_lazy(database_url)
            .map_err(|e| LedgerError::ConnectionFailed(format!("Invalid database url: {e}")))?;

        tracing::debug!(max_connections, "PostgresCouponLedger created (lazy)");

        Ok(Self::from_pool(pool).with_timeout(timeout))
    }

    /// Bound every transaction by `timeout`.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Create the `coupons` table if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::DatabaseError`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), LedgerError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| LedgerError::DatabaseError(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn record_in_transaction(
        &self,
        row: &DurableCouponRow,
    ) -> Result<RecordOutcome, LedgerError> {
        let coupon_id = row.coupon_id.to_string();
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let (present,): (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM coupons WHERE coupon_id = $1 AND member_id = $2)",
        )
        .bind(&coupon_id)
        .bind(row.member_id.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error)?;

        if present {
            tx.rollback().await.map_err(db_error)?;
            return Ok(RecordOutcome::AlreadyPresent);
        }

        // A concurrent worker may insert between the check and here.
        let inserted = sqlx::query(
            "INSERT INTO coupons (coupon_id, member_id, issued_at, timezone, used)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (coupon_id, member_id) DO NOTHING",
        )
        .bind(&coupon_id)
        .bind(row.member_id.as_str())
        .bind(row.issued_at)
        .bind(&row.timezone)
        .bind(row.used)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?
        .rows_affected();

        tx.commit().await.map_err(db_error)?;

        Ok(if inserted == 0 {
            RecordOutcome::AlreadyPresent
        } else {
            RecordOutcome::Inserted
        })
    }
}

fn pool_options(max_connections: u32, timeout: Duration) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(timeout)
}

fn db_error(e: sqlx::Error) -> LedgerError {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            LedgerError::ConnectionFailed(e.to_string())
        },
        other => LedgerError::DatabaseError(other.to_string()),
    }
}

impl CouponLedger for PostgresCouponLedger {
    fn record<'a>(&'a self, row: &'a DurableCouponRow) -> LedgerFuture<'a, RecordOutcome> {
        Box::pin(async move {
            let started = Instant::now();
            let outcome = with_timeout(self.timeout, self.record_in_transaction(row), || {
                LedgerError::Timeout {
                    operation: "record",
                }
            })
            .await;

            metrics::histogram!("coupons.ledger.transaction_seconds")
                .record(started.elapsed().as_secs_f64());

            match &outcome {
                Ok(result) => tracing::debug!(
                    coupon_id = %row.coupon_id,
                    member_id = %row.member_id,
                    ?result,
                    "Ledger transaction committed"
                ),
                Err(e) => tracing::warn!(
                    coupon_id = %row.coupon_id,
                    member_id = %row.member_id,
                    error = %e,
                    "Ledger transaction failed"
                ),
            }

            outcome
        })
    }

    fn exists<'a>(
        &'a self,
        coupon_id: &'a CouponId,
        member_id: &'a OwnerId,
    ) -> LedgerFuture<'a, bool> {
        Box::pin(async move {
            with_timeout(
                self.timeout,
                async {
                    let (present,): (bool,) = sqlx::query_as(
                        "SELECT EXISTS(SELECT 1 FROM coupons WHERE coupon_id = $1 AND member_id = $2)",
                    )
                    .bind(coupon_id.to_string())
                    .bind(member_id.as_str())
                    .fetch_one(&self.pool)
                    .await
                    .map_err(db_error)?;
                    Ok(present)
                },
                || LedgerError::Timeout {
                    operation: "exists",
                },
            )
            .await
        })
    }
}
