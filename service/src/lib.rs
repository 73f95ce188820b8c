//! # Coupon Service
//!
//! The moving parts of limited coupon issuance:
//!
//! - [`issuance::IssuanceService`]: atomic, deduplicated issuance from a pool
//! - [`scanner::ExpiryScanner`]: publishes live records to the migration queue
//! - [`worker::PersistenceWorker`]: idempotent durable writes, then cleanup
//! - [`initializer::PoolInitializer`]: starting inventory
//! - [`consumer::MigrationConsumer`]: drives the worker from the queue
//! - [`intake`]: batch envelopes with per-item responses
//!
//! Every component takes a [`CouponEnvironment`]; production binaries build
//! it from the Redis, `PostgreSQL` and Redpanda adapters, tests from the
//! in-memory fakes in `coupon-testing`.

pub mod config;
pub mod consumer;
pub mod environment;
pub mod initializer;
pub mod intake;
pub mod issuance;
pub mod metrics;
pub mod scanner;
pub mod worker;

pub use config::Config;
pub use environment::CouponEnvironment;

/// Production wiring shared by the binaries.
pub mod bootstrap {
    use coupon_core::environment::SystemClock;
    use coupon_postgres::PostgresCouponLedger;
    use coupon_redis::RedisInventoryStore;
    use coupon_redpanda::RedpandaMigrationQueue;
    use std::sync::Arc;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    use crate::{Config, CouponEnvironment};

    /// Boxed error for binary entry points.
    pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

    /// Load `.env`, install the tracing subscriber and read configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics exporter cannot be installed.
    pub fn init(default_filter: &str) -> Result<Config, BoxError> {
        dotenvy::dotenv().ok();

        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| default_filter.into()),
            )
            .with(tracing_subscriber::fmt::layer())
            .init();

        let config = Config::from_env();
        if let Some(addr) = config.metrics_addr {
            crate::metrics::install_exporter(addr)?;
        } else {
            crate::metrics::register_coupon_metrics();
        }
        Ok(config)
    }

    /// How [`connect`] brings up the durable ledger.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum LedgerMode {
        /// Build the pool without connecting and skip migrations. Issuance,
        /// pool setup and scanning never write to the ledger, so a database
        /// outage must not stop them.
        Lazy,
        /// Connect now and apply migrations.
        Migrated,
    }

    /// Build the durable ledger per `mode`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database URL is invalid or, for
    /// [`LedgerMode::Migrated`], the database is unreachable or a migration fails.
    pub async fn build_ledger(
        config: &Config,
        mode: LedgerMode,
    ) -> Result<PostgresCouponLedger, BoxError> {
        let url = &config.postgres.url;
        let max_connections = config.postgres.max_connections;
        let timeout = config.postgres_timeout();

        match mode {
            LedgerMode::Lazy => Ok(PostgresCouponLedger::connect_lazy(
                url,
                max_connections,
                timeout,
            )?),
            LedgerMode::Migrated => {
                let ledger = PostgresCouponLedger::connect(url, max_connections, timeout).await?;
                ledger.migrate().await?;
                tracing::info!("Connected to PostgreSQL, migrations applied");
                Ok(ledger)
            },
        }
    }

    /// Connect the adapters and build the environment.
    ///
    /// Redis is always connected up front. The Redpanda producer connects on
    /// first publish; the ledger follows `ledger_mode`.
    ///
    /// # Errors
    ///
    /// Returns an error if Redis cannot be reached, the ledger cannot be
    /// brought up per `ledger_mode`, or the configured default zone is invalid.
    pub async fn connect(
        config: &Config,
        ledger_mode: LedgerMode,
    ) -> Result<CouponEnvironment, BoxError> {
        let default_timezone = config.default_timezone()?;

        let inventory = RedisInventoryStore::with_timeout(&config.redis.url, config.redis_timeout())
            .await?;
        tracing::info!("Connected to Redis");

        let ledger = build_ledger(config, ledger_mode).await?;

        let queue = RedpandaMigrationQueue::builder()
            .brokers(&config.redpanda.brokers)
            .topic(&config.redpanda.topic)
            .consumer_group(&config.redpanda.consumer_group)
            .group_key(&config.redpanda.group_key)
            .redelivery_delay(config.redelivery_delay())
            .build()?;
        tracing::info!(brokers = %config.redpanda.brokers, topic = %config.redpanda.topic, "Redpanda producer ready");

        Ok(CouponEnvironment::new(
            Arc::new(inventory),
            Arc::new(ledger),
            Arc::new(queue),
            Arc::new(SystemClock),
        )
        .with_default_timezone(default_timezone))
    }

}
