//! Time-zone resolution and the end-of-day expiry rule.
//!
//! A coupon expires at 23:59:59 local time on the calendar day it was issued,
//! in the zone it was issued in. Equivalently: the first instant of the next
//! local day, minus one second. Phrasing it that way keeps the rule correct on
//! days where local midnight does not exist (DST transitions at 00:00).

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::CouponError;

/// Zone used when a request carries no zone or an unrecognized one.
pub const DEFAULT_TIMEZONE: Tz = chrono_tz::Asia::Seoul;

/// Outcome of resolving a requested zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedZone {
    /// Zone to compute in.
    pub tz: Tz,
    /// `true` when `tz` is the default because the request was absent,
    /// blank, or not in the zone database.
    pub fallback: bool,
}

impl ResolvedZone {
    /// IANA name of the resolved zone.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.tz.name()
    }
}

/// Look up a zone by IANA name.
///
/// Exact names match first; otherwise the name is matched ignoring ASCII
/// case, so `america/new_york` finds `America/New_York`.
#[must_use]
pub fn lookup_zone(name: &str) -> Option<Tz> {
    let name = name.trim();
    name.parse::<Tz>()
        .or_else(|_| Tz::from_str_insensitive(name))
        .ok()
}

/// Resolve a requested zone, silently falling back to `default`.
///
/// Never fails; the fallback is reported through [`ResolvedZone::fallback`].
#[must_use]
pub fn resolve_timezone(requested: Option<&str>, default: Tz) -> ResolvedZone {
    match requested.map(str::trim).filter(|s| !s.is_empty()) {
        Some(name) => match lookup_zone(name) {
            Some(tz) => ResolvedZone {
                tz,
                fallback: false,
            },
            None => {
                tracing::debug!(
                    requested = %name,
                    default = default.name(),
                    "Unrecognized timezone, using default"
                );
                ResolvedZone {
                    tz: default,
                    fallback: true,
                }
            },
        },
        None => ResolvedZone {
            tz: default,
            fallback: true,
        },
    }
}

/// Resolve a zone where an unknown name is an error.
///
/// An absent zone still resolves to `default`.
///
/// # Errors
///
/// Returns [`CouponError::UnknownTimezone`] if `requested` names no zone.
pub fn resolve_timezone_strict(requested: Option<&str>, default: Tz) -> Result<Tz, CouponError> {
    match requested {
        None => Ok(default),
        Some(name) => {
            lookup_zone(name).ok_or_else(|| CouponError::UnknownTimezone(name.to_string()))
        },
    }
}

/// `now` expressed in `tz`, with the offset frozen for serialization.
#[must_use]
pub fn local_issue_time(now: DateTime<Utc>, tz: Tz) -> DateTime<FixedOffset> {
    now.with_timezone(&tz).fixed_offset()
}

/// Expiry in epoch seconds for a coupon issued at `now` in `tz`.
#[must_use]
pub fn expiry_timestamp(now: DateTime<Utc>, tz: Tz) -> i64 {
    let today = now.with_timezone(&tz).date_naive();
    let tomorrow = today.succ_opt().unwrap_or(today);
    start_of_day(tomorrow, tz).timestamp() - 1
}

/// First instant of `date` in `tz`.
///
/// When midnight falls in a DST gap the day starts at the first local time
/// that exists; when it is ambiguous the earlier instant wins.
fn start_of_day(date: NaiveDate, tz: Tz) -> DateTime<Tz> {
    let midnight = date.and_time(NaiveTime::MIN);
    for step in 0..=96 {
        let candidate = midnight + Duration::minutes(15 * step);
        if let Some(start) = tz.from_local_datetime(&candidate).earliest() {
            return start;
        }
    }
    tz.from_utc_datetime(&midnight)
}
