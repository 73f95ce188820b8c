//! Domain types shared by issuance and migration.

use chrono::{DateTime, FixedOffset, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::CouponError;
use crate::expiry::{expiry_timestamp, resolve_timezone};

/// Length of a hyphenated uuid (`8-4-4-4-12`).
const UUID_LEN: usize = 36;

/// Name of a coupon pool (e.g. `offline`, `online`).
///
/// Restricted to ASCII alphanumerics and `_` so that key patterns such as
/// `coupon:<pool>-*` never match records belonging to another pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PoolName(String);

impl PoolName {
    /// Validate and wrap a pool name.
    ///
    /// # Errors
    ///
    /// Returns [`CouponError::Validation`] if the name is empty or contains
    /// characters other than ASCII alphanumerics and `_`.
    pub fn new(name: impl Into<String>) -> Result<Self, CouponError> {
        let name = name.into();
        if name.is_empty() {
            return Err(CouponError::Validation("pool name must not be empty".into()));
        }
        if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(CouponError::Validation(format!("invalid pool name: {name}")));
        }
        Ok(Self(name))
    }

    /// Borrow the name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PoolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for PoolName {
    type Error = CouponError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PoolName> for String {
    fn from(value: PoolName) -> Self {
        value.0
    }
}

impl FromStr for PoolName {
    type Err = CouponError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Identifier of the user or member receiving a coupon.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OwnerId(String);

impl OwnerId {
    /// Trim and validate an owner identifier.
    ///
    /// # Errors
    ///
    /// Returns [`CouponError::Validation`] if the identifier is blank.
    pub fn new(id: impl AsRef<str>) -> Result<Self, CouponError> {
        let id = id.as_ref().trim();
        if id.is_empty() {
            return Err(CouponError::Validation("owner id must not be empty".into()));
        }
        Ok(Self(id.to_string()))
    }

    /// Borrow the identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for OwnerId {
    type Error = CouponError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<OwnerId> for String {
    fn from(value: OwnerId) -> Self {
        value.0
    }
}

/// Globally unique coupon identifier, rendered as `<pool>-<uuid>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CouponId {
    pool: PoolName,
    uuid: Uuid,
}

impl CouponId {
    /// Generate a fresh identifier in `pool`.
    ///
    /// Uniqueness rests on uuid v4 generation; nothing checks for collisions.
    #[must_use]
    pub fn generate(pool: &PoolName) -> Self {
        Self {
            pool: pool.clone(),
            uuid: Uuid::new_v4(),
        }
    }

    /// Pool the coupon was issued from.
    #[must_use]
    pub const fn pool(&self) -> &PoolName {
        &self.pool
    }

    /// Random component of the identifier.
    #[must_use]
    pub const fn uuid(&self) -> Uuid {
        self.uuid
    }
}

impl fmt::Display for CouponId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.pool, self.uuid)
    }
}

impl FromStr for CouponId {
    type Err = CouponError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CouponError::Validation(format!("invalid coupon id: {s}"));

        // `<pool>-` needs at least two characters in front of the uuid.
        if s.len() < UUID_LEN + 2 || !s.is_char_boundary(s.len() - UUID_LEN) {
            return Err(invalid());
        }
        let (head, tail) = s.split_at(s.len() - UUID_LEN);
        let pool = head.strip_suffix('-').ok_or_else(invalid)?;
        let uuid = Uuid::parse_str(tail).map_err(|_| invalid())?;

        Ok(Self {
            pool: PoolName::new(pool).map_err(|_| invalid())?,
            uuid,
        })
    }
}

impl Serialize for CouponId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CouponId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Live coupon record held in the ephemeral store under `coupon:<coupon_id>`.
///
/// The store enforces expiry through the key's TTL. Records written by older
/// issuers carry neither `expires_at` nor, sometimes, a `timezone`; both are
/// optional when read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponRecord {
    /// Owner of the coupon. Older records used `member_id` or `user_id`.
    #[serde(alias = "member_id", alias = "user_id")]
    pub owner_id: OwnerId,

    /// Always `false` at creation; redemption is handled elsewhere.
    #[serde(default)]
    pub used: bool,

    /// Issuance instant, localized to `timezone`.
    pub issued_at: DateTime<FixedOffset>,

    /// Resolved IANA zone name the expiry was computed in. `None` (absent or
    /// `null`) means the default zone.
    #[serde(default)]
    pub timezone: Option<String>,

    /// Epoch seconds of 23:59:59 local time on the day of `issued_at`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl CouponRecord {
    /// Expiry in epoch seconds.
    ///
    /// Uses the stored value when present, otherwise applies the end-of-day
    /// rule to `issued_at` in the record's zone (or `default` when the zone is
    /// missing or unknown).
    #[must_use]
    pub fn expiry(&self, default: Tz) -> i64 {
        self.expires_at.unwrap_or_else(|| {
            let zone = resolve_timezone(self.timezone.as_deref(), default);
            expiry_timestamp(self.issued_at.with_timezone(&Utc), zone.tz)
        })
    }
}

/// Payload carried on the migration queue.
///
/// Its deduplication key is `coupon_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationMessage {
    /// Coupon being migrated.
    pub coupon_id: CouponId,

    /// Owner of the coupon.
    #[serde(alias = "owner_id", alias = "user_id")]
    pub member_id: OwnerId,

    /// Zone the coupon was issued in. Absent means the default zone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,

    /// Redemption flag at scan time.
    #[serde(default)]
    pub used: bool,

    /// Issuance instant.
    pub issued_at: DateTime<FixedOffset>,
}

impl MigrationMessage {
    /// Build the message for a scanned record.
    #[must_use]
    pub fn from_record(coupon_id: CouponId, record: &CouponRecord) -> Self {
        Self {
            coupon_id,
            member_id: record.owner_id.clone(),
            timezone: record.timezone.clone(),
            used: record.used,
            issued_at: record.issued_at,
        }
    }

    /// Deduplication key used on the queue.
    #[must_use]
    pub fn dedup_id(&self) -> String {
        self.coupon_id.to_string()
    }
}

/// Permanent audit row. `(coupon_id, member_id)` is unique.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DurableCouponRow {
    /// Coupon identifier.
    pub coupon_id: CouponId,
    /// Owner identifier.
    pub member_id: OwnerId,
    /// Issuance instant.
    pub issued_at: DateTime<FixedOffset>,
    /// Zone the coupon was issued in.
    pub timezone: String,
    /// Redemption flag at migration time.
    pub used: bool,
}

/// Result of a successful issuance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssuedCoupon {
    /// New coupon identifier.
    pub coupon_id: CouponId,
    /// Pool the coupon came from.
    pub pool: PoolName,
    /// Recipient.
    pub owner_id: OwnerId,
    /// Issuance instant in the resolved zone.
    pub issued_at: DateTime<FixedOffset>,
    /// Expiry, epoch seconds.
    pub expires_at: i64,
    /// Zone actually used.
    pub timezone: String,
    /// `true` when the requested zone was absent or unrecognized and the
    /// default zone was used instead.
    pub timezone_fallback: bool,
    /// Inventory left in the pool after this issuance.
    pub remaining: u64,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn pool_name_rejects_separator_and_glob_characters() {
        assert!(PoolName::new("offline").is_ok());
        assert!(PoolName::new("vip_2025").is_ok());
        assert!(PoolName::new("").is_err());
        assert!(PoolName::new("off-line").is_err());
        assert!(PoolName::new("off*").is_err());
    }

    #[test]
    fn owner_id_is_trimmed_and_required() {
        assert_eq!(OwnerId::new("  user123 ").unwrap().as_str(), "user123");
        assert!(OwnerId::new("   ").is_err());
    }

    #[test]
    fn coupon_id_display_and_parse_agree() {
        let pool = PoolName::new("offline").unwrap();
        let id = CouponId::generate(&pool);
        let rendered = id.to_string();

        assert!(rendered.starts_with("offline-"));
        let parsed: CouponId = rendered.parse().unwrap();
        assert_eq!(parsed, id);
        assert_eq!(parsed.pool().as_str(), "offline");
    }

    #[test]
    fn coupon_id_parse_rejects_garbage() {
        assert!("offline".parse::<CouponId>().is_err());
        assert!("offline-not-a-uuid-at-all-but-long-enough-x".parse::<CouponId>().is_err());
        assert!("-67e55044-10b1-426f-9247-bb680e5fe0c8".parse::<CouponId>().is_err());
        assert!("offline67e55044-10b1-426f-9247-bb680e5fe0c8".parse::<CouponId>().is_err());
    }

    #[test]
    fn record_reads_legacy_member_id_field() {
        let json = r#"{
            "member_id": "user123",
            "used": false,
            "issued_at": "2025-02-24T10:00:00+09:00",
            "timezone": "Asia/Seoul",
            "expires_at": 1740409199
        }"#;
        let record: CouponRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.owner_id.as_str(), "user123");

        let written = serde_json::to_value(&record).unwrap();
        assert_eq!(written["owner_id"], "user123");
    }

    #[test]
    fn record_without_expiry_or_zone_uses_default_day_end() {
        // Shape written by issuers that relied on the key TTL alone.
        let json = r#"{
            "owner_id": "user123",
            "used": false,
            "issued_at": "2025-02-24T10:00:00+09:00",
            "timezone": null
        }"#;
        let record: CouponRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.timezone, None);
        assert_eq!(record.expires_at, None);
        // 2025-02-24T23:59:59+09:00
        assert_eq!(record.expiry(chrono_tz::Asia::Seoul), 1_740_409_199);

        let written = serde_json::to_value(&record).unwrap();
        assert!(written.get("expires_at").is_none());
    }

    #[test]
    fn record_expiry_follows_its_own_zone() {
        let json = r#"{
            "user_id": "user123",
            "issued_at": "2025-02-23T20:00:00-05:00",
            "timezone": "America/New_York"
        }"#;
        let record: CouponRecord = serde_json::from_str(json).unwrap();
        // 2025-02-23T23:59:59-05:00
        assert_eq!(record.expiry(chrono_tz::Asia::Seoul), 1_740_373_199);
        assert!(!record.used);
    }

    #[test]
    fn migration_message_without_timezone_parses() {
        let json = r#"{
            "coupon_id": "offline-67e55044-10b1-426f-9247-bb680e5fe0c8",
            "member_id": "user123",
            "used": false,
            "issued_at": "2025-02-24T10:00:00+09:00"
        }"#;
        let message: MigrationMessage = serde_json::from_str(json).unwrap();
        assert_eq!(message.timezone, None);
        assert_eq!(message.dedup_id(), "offline-67e55044-10b1-426f-9247-bb680e5fe0c8");
    }

    #[test]
    fn migration_message_rejects_blank_member() {
        let json = r#"{
            "coupon_id": "offline-67e55044-10b1-426f-9247-bb680e5fe0c8",
            "member_id": "  ",
            "issued_at": "2025-02-24T10:00:00+09:00"
        }"#;
        assert!(serde_json::from_str::<MigrationMessage>(json).is_err());
    }
}
