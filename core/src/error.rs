//! Error taxonomy for issuance and migration.

use thiserror::Error;

use crate::inventory::InventoryError;
use crate::ledger::LedgerError;
use crate::queue::QueueError;

/// Result type alias for coupon operations.
pub type Result<T> = std::result::Result<T, CouponError>;

/// Every way an issuance or migration unit of work can fail.
///
/// None of these are retried locally. The only retry path is redelivery by
/// the migration queue, and only [`CouponError::is_retryable`] failures are
/// handed back for it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CouponError {
    // ═══════════════════════════════════════════════════════════
    // Rejections (client-visible, never retried)
    // ═══════════════════════════════════════════════════════════

    /// Missing or malformed required field.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// The owner already holds a coupon from this pool.
    #[error("Owner {owner_id} has already received a {pool} coupon")]
    AlreadyIssued {
        /// Pool name
        pool: String,
        /// Owner identifier
        owner_id: String,
    },

    /// The pool is exhausted.
    #[error("No {pool} coupons remaining")]
    NoInventory {
        /// Pool name
        pool: String,
    },

    /// A migration message named a zone outside the zone database.
    #[error("Invalid timezone: {0}")]
    UnknownTimezone(String),

    // ═══════════════════════════════════════════════════════════
    // Infrastructure
    // ═══════════════════════════════════════════════════════════

    /// Durable store connectivity or transaction failure.
    #[error("Durable store error: {0}")]
    Persistence(String),

    /// Ephemeral store failure.
    #[error("Inventory store error: {0}")]
    Store(String),

    /// Migration queue failure.
    #[error("Queue error: {0}")]
    Queue(String),

    /// Malformed batch envelope. Logged and dropped on intake.
    #[error("Malformed envelope: {0}")]
    Transport(String),
}

impl CouponError {
    /// Status code for the `{statusCode, body}` response surface.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_)
            | Self::AlreadyIssued { .. }
            | Self::NoInventory { .. }
            | Self::UnknownTimezone(_)
            | Self::Transport(_) => 400,
            Self::Persistence(_) | Self::Store(_) | Self::Queue(_) => 500,
        }
    }

    /// Whether the failed unit should be handed back to the queue.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Persistence(_) | Self::Store(_) | Self::Queue(_))
    }

    /// Short label used as a metrics dimension.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::AlreadyIssued { .. } => "already_issued",
            Self::NoInventory { .. } => "no_inventory",
            Self::UnknownTimezone(_) => "unknown_timezone",
            Self::Persistence(_) => "persistence",
            Self::Store(_) => "store",
            Self::Queue(_) => "queue",
            Self::Transport(_) => "transport",
        }
    }
}

impl From<InventoryError> for CouponError {
    fn from(e: InventoryError) -> Self {
        Self::Store(e.to_string())
    }
}

impl From<LedgerError> for CouponError {
    fn from(e: LedgerError) -> Self {
        Self::Persistence(e.to_string())
    }
}

impl From<QueueError> for CouponError {
    fn from(e: QueueError) -> Self {
        Self::Queue(e.to_string())
    }
}
