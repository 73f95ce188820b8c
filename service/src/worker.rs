//! Persistence Worker.
//!
//! Payload-driven: everything written to the durable store comes from the
//! message itself, never from the ephemeral record. The ephemeral record is
//! only deleted after the durable transaction has committed, so a failed
//! write leaves it in place for the redelivered message.

use coupon_core::error::Result;
use coupon_core::expiry::resolve_timezone_strict;
use coupon_core::ledger::RecordOutcome;
use coupon_core::{CouponError, CouponId, DurableCouponRow, MigrationMessage};
use tracing::{debug, info, instrument, warn};

use crate::environment::CouponEnvironment;
use crate::metrics;

/// Successful result of migrating one coupon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// A new durable row was committed.
    Persisted {
        /// Migrated coupon
        coupon_id: CouponId,
    },
    /// The durable row already existed; nothing was written.
    AlreadyIssued {
        /// Migrated coupon
        coupon_id: CouponId,
    },
}

impl MigrationOutcome {
    /// Coupon the outcome refers to.
    #[must_use]
    pub const fn coupon_id(&self) -> &CouponId {
        match self {
            Self::Persisted { coupon_id } | Self::AlreadyIssued { coupon_id } => coupon_id,
        }
    }

    /// Response body for the `{statusCode, body}` surface.
    #[must_use]
    pub fn body(&self) -> String {
        match self {
            Self::Persisted { .. } => "Coupon processed successfully.".to_string(),
            Self::AlreadyIssued { coupon_id } => format!("Coupon {coupon_id} already issued."),
        }
    }
}

/// Moves coupons from the ephemeral store into the durable ledger.
#[derive(Debug, Clone)]
pub struct PersistenceWorker {
    env: CouponEnvironment,
}

impl PersistenceWorker {
    /// Create a worker over `env`.
    #[must_use]
    pub const fn new(env: CouponEnvironment) -> Self {
        Self { env }
    }

    /// Migrate the coupon described by a raw queue payload.
    ///
    /// # Errors
    ///
    /// - [`CouponError::Validation`] if the payload is not a migration message
    /// - [`CouponError::UnknownTimezone`] if it names an unknown zone
    /// - [`CouponError::Persistence`] if the durable write fails; the message
    ///   should be redelivered
    pub async fn handle(&self, payload: &[u8]) -> Result<MigrationOutcome> {
        let message: MigrationMessage = serde_json::from_slice(payload).map_err(|e| {
            warn!(error = %e, "Rejecting malformed migration message");
            CouponError::Validation(format!("invalid migration message: {e}"))
        })?;

        let result = self.persist(&message).await;
        match &result {
            Ok(MigrationOutcome::Persisted { .. }) => metrics::record_migration_persisted(),
            Ok(MigrationOutcome::AlreadyIssued { .. }) => metrics::record_migration_duplicate(),
            Err(e) => metrics::record_migration_failed(e.kind()),
        }
        result
    }

    /// Migrate one already-decoded message.
    ///
    /// # Errors
    ///
    /// See [`PersistenceWorker::handle`].
    #[instrument(skip_all, fields(coupon_id = %message.coupon_id, member_id = %message.member_id))]
    pub async fn persist(&self, message: &MigrationMessage) -> Result<MigrationOutcome> {
        let tz = resolve_timezone_strict(message.timezone.as_deref(), self.env.default_timezone)
            .inspect_err(|e| warn!(error = %e, "Rejecting migration message"))?;

        // Informational only; absence is the already-migrated case, not an error.
        let live = match self.env.inventory.coupon_exists(&message.coupon_id).await {
            Ok(live) => live,
            Err(e) => {
                warn!(error = %e, "Could not look up ephemeral record, continuing from payload");
                true
            },
        };
        if !live {
            debug!("Ephemeral record already gone");
        }

        let row = DurableCouponRow {
            coupon_id: message.coupon_id.clone(),
            member_id: message.member_id.clone(),
            issued_at: message.issued_at,
            timezone: tz.name().to_string(),
            used: message.used,
        };

        let outcome = match self.env.ledger.record(&row).await {
            Ok(RecordOutcome::Inserted) => {
                info!("Coupon persisted");
                MigrationOutcome::Persisted {
                    coupon_id: row.coupon_id,
                }
            },
            Ok(RecordOutcome::AlreadyPresent) => {
                info!("Coupon already persisted");
                MigrationOutcome::AlreadyIssued {
                    coupon_id: row.coupon_id,
                }
            },
            Err(e) => {
                warn!(error = %e, "Durable write failed, ephemeral record kept");
                return Err(e.into());
            },
        };

        if live {
            self.retire(outcome.coupon_id()).await;
        }
        Ok(outcome)
    }

    /// Delete the ephemeral record after a commit. Failures are logged; the
    /// record still expires by TTL and a re-publish finds the durable row.
    async fn retire(&self, coupon_id: &CouponId) {
        match self.env.inventory.delete_coupon(coupon_id).await {
            Ok(true) => debug!("Ephemeral record deleted"),
            Ok(false) => debug!("Ephemeral record expired before delete"),
            Err(e) => warn!(error = %e, "Could not delete ephemeral record after commit"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn outcome_bodies() {
        let coupon_id: CouponId = "offline-67e55044-10b1-426f-9247-bb680e5fe0c8".parse().unwrap();
        assert_eq!(
            MigrationOutcome::Persisted {
                coupon_id: coupon_id.clone()
            }
            .body(),
            "Coupon processed successfully."
        );
        assert_eq!(
            MigrationOutcome::AlreadyIssued { coupon_id }.body(),
            "Coupon offline-67e55044-10b1-426f-9247-bb680e5fe0c8 already issued."
        );
    }
}
