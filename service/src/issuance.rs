//! Issuance Service.
//!
//! One request: validate the owner, pre-check the pool's dedup set, resolve
//! the zone, then hand a fully built [`IssueCommand`] to the store, which
//! applies dedup, decrement and record creation atomically.

use coupon_core::error::Result;
use coupon_core::expiry::{expiry_timestamp, local_issue_time, resolve_timezone};
use coupon_core::inventory::{IssueCommand, Reservation};
use coupon_core::{CouponError, CouponId, CouponRecord, IssuedCoupon, OwnerId, PoolName};
use serde::Deserialize;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::environment::CouponEnvironment;
use crate::metrics;

/// Body of one issuance request.
///
/// Clients identify the recipient as `member_id`, `user_id` or `owner_id`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct IssueRequest {
    /// Recipient; blank or missing is rejected.
    #[serde(default, alias = "user_id", alias = "owner_id")]
    pub member_id: Option<String>,
    /// Requested IANA zone. Unknown or missing falls back to the default.
    #[serde(default)]
    pub timezone: Option<String>,
}

impl IssueRequest {
    /// Request for `owner` with no zone.
    #[must_use]
    pub fn for_owner(owner: impl Into<String>) -> Self {
        Self {
            member_id: Some(owner.into()),
            timezone: None,
        }
    }

    /// Request a zone.
    #[must_use]
    pub fn with_timezone(mut self, tz: impl Into<String>) -> Self {
        self.timezone = Some(tz.into());
        self
    }
}

/// Issues coupons from a pool.
#[derive(Debug, Clone)]
pub struct IssuanceService {
    env: CouponEnvironment,
}

impl IssuanceService {
    /// Create a service over `env`.
    #[must_use]
    pub const fn new(env: CouponEnvironment) -> Self {
        Self { env }
    }

    /// Issue one coupon from `pool`.
    ///
    /// # Errors
    ///
    /// - [`CouponError::Validation`] if the owner is missing or blank
    /// - [`CouponError::AlreadyIssued`] if the owner already holds a coupon from `pool`
    /// - [`CouponError::NoInventory`] if `pool` is exhausted or was never initialized
    /// - [`CouponError::Store`] if the ephemeral store fails
    #[instrument(skip_all, fields(pool = %pool))]
    pub async fn issue(&self, pool: &PoolName, request: &IssueRequest) -> Result<IssuedCoupon> {
        let started = Instant::now();
        let result = self.try_issue(pool, request).await;

        match &result {
            Ok(issued) => {
                metrics::record_issued(pool.as_str(), started.elapsed().as_secs_f64());
                info!(
                    owner_id = %issued.owner_id,
                    coupon_id = %issued.coupon_id,
                    remaining = issued.remaining,
                    timezone = %issued.timezone,
                    "Coupon issued"
                );
            },
            Err(e) if e.is_retryable() => {
                metrics::record_rejected(pool.as_str(), e.kind());
                warn!(error = %e, "Issuance failed");
            },
            Err(e) => {
                metrics::record_rejected(pool.as_str(), e.kind());
                debug!(error = %e, "Issuance rejected");
            },
        }

        result
    }

    async fn try_issue(&self, pool: &PoolName, request: &IssueRequest) -> Result<IssuedCoupon> {
        let owner_id = OwnerId::new(request.member_id.as_deref().unwrap_or_default())
            .map_err(|_| CouponError::Validation("missing member_id".to_string()))?;

        if self.env.inventory.has_received(pool, &owner_id).await? {
            return Err(already_issued(pool, &owner_id));
        }

        let zone = resolve_timezone(request.timezone.as_deref(), self.env.default_timezone);
        if zone.fallback && request.timezone.is_some() {
            warn!(
                owner_id = %owner_id,
                requested = request.timezone.as_deref().unwrap_or_default(),
                timezone = zone.name(),
                "Requested timezone not recognized, using default"
            );
        }

        let now = self.env.clock.now();
        let coupon_id = CouponId::generate(pool);
        let expires_at = expiry_timestamp(now, zone.tz);
        let record = CouponRecord {
            owner_id: owner_id.clone(),
            used: false,
            issued_at: local_issue_time(now, zone.tz),
            timezone: Some(zone.name().to_string()),
            expires_at: Some(expires_at),
        };
        let command = IssueCommand {
            pool: pool.clone(),
            owner_id,
            coupon_id,
            record,
            expires_at,
        };

        match self.env.inventory.issue(&command).await? {
            Reservation::Issued { remaining } => Ok(IssuedCoupon {
                coupon_id: command.coupon_id,
                pool: command.pool,
                owner_id: command.owner_id,
                issued_at: command.record.issued_at,
                expires_at: command.expires_at,
                timezone: zone.name().to_string(),
                timezone_fallback: zone.fallback,
                remaining,
            }),
            Reservation::AlreadyIssued => Err(already_issued(pool, &command.owner_id)),
            Reservation::NoInventory => Err(CouponError::NoInventory {
                pool: pool.to_string(),
            }),
        }
    }
}

fn already_issued(pool: &PoolName, owner_id: &OwnerId) -> CouponError {
    CouponError::AlreadyIssued {
        pool: pool.to_string(),
        owner_id: owner_id.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn request_accepts_every_owner_field_name() {
        for body in [
            r#"{"member_id":"user123"}"#,
            r#"{"user_id":"user123"}"#,
            r#"{"owner_id":"user123","timezone":"Asia/Tokyo"}"#,
        ] {
            let request: IssueRequest = serde_json::from_str(body).unwrap();
            assert_eq!(request.member_id.as_deref(), Some("user123"));
        }
    }

    #[test]
    fn request_without_owner_parses_as_none() {
        let request: IssueRequest = serde_json::from_str(r#"{"timezone":"UTC"}"#).unwrap();
        assert_eq!(request.member_id, None);
        assert_eq!(request.timezone.as_deref(), Some("UTC"));
    }
}
