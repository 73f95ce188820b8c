//! Batch intake.
//!
//! Requests arrive as an envelope of records, each carrying a JSON body
//! string. Every record is an independent unit: one failing item never
//! affects the others, and each gets its own `{statusCode, body}` response.
//! Only items answered with 200 are settled; the rest stay with the
//! delivering transport for redelivery or dead-lettering.

use coupon_core::{CouponError, PoolName};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::issuance::{IssuanceService, IssueRequest};
use crate::worker::PersistenceWorker;

/// Incoming batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Envelope {
    /// Records in delivery order.
    #[serde(rename = "Records")]
    pub records: Vec<EnvelopeRecord>,
}

/// One delivered record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct EnvelopeRecord {
    /// Transport handle used to settle the record.
    #[serde(rename = "receiptHandle", default)]
    pub receipt_handle: Option<String>,
    /// JSON request body. A record without one is malformed.
    #[serde(default)]
    pub body: Option<String>,
}

/// Response for one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemResponse {
    /// Handle of the record this answers.
    #[serde(rename = "receiptHandle", skip_serializing_if = "Option::is_none")]
    pub receipt_handle: Option<String>,
    /// 200, 400 or 500.
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    /// Human-readable outcome.
    pub body: String,
}

impl ItemResponse {
    fn ok(receipt_handle: Option<String>, body: String) -> Self {
        Self {
            receipt_handle,
            status_code: 200,
            body,
        }
    }

    fn failed(receipt_handle: Option<String>, error: &CouponError) -> Self {
        let body = match error {
            CouponError::AlreadyIssued { .. } => "User has already received a coupon".to_string(),
            other => other.to_string(),
        };
        Self {
            receipt_handle,
            status_code: error.status_code(),
            body,
        }
    }

    /// Whether the record was handled and can be removed from the transport.
    #[must_use]
    pub const fn settled(&self) -> bool {
        self.status_code == 200
    }
}

/// Decode an envelope.
///
/// # Errors
///
/// Returns [`CouponError::Transport`] if `raw` is not an envelope with a
/// `Records` array.
pub fn parse_envelope(raw: &[u8]) -> Result<Envelope, CouponError> {
    serde_json::from_slice(raw).map_err(|e| {
        warn!(error = %e, "Dropping malformed envelope");
        CouponError::Transport(format!("No 'Records' found in event: {e}"))
    })
}

/// Pull the body out of a record, logging and dropping it if there is none.
fn body_of(record: EnvelopeRecord) -> Option<(Option<String>, String)> {
    match record.body {
        Some(body) => Some((record.receipt_handle, body)),
        None => {
            let error = CouponError::Transport("record has no body".to_string());
            warn!(
                receipt_handle = record.receipt_handle.as_deref().unwrap_or("-"),
                error = %error,
                "Dropping malformed record"
            );
            None
        },
    }
}

/// Issue one coupon from `pool` per record.
pub async fn issue_batch(
    service: &IssuanceService,
    pool: &PoolName,
    envelope: Envelope,
) -> Vec<ItemResponse> {
    let mut responses = Vec::with_capacity(envelope.records.len());

    for (receipt_handle, body) in envelope.records.into_iter().filter_map(body_of) {
        let request: IssueRequest = match serde_json::from_str(&body) {
            Ok(request) => request,
            Err(e) => {
                let error = CouponError::Validation(format!("malformed body: {e}"));
                responses.push(ItemResponse::failed(receipt_handle, &error));
                continue;
            },
        };

        let response = match service.issue(pool, &request).await {
            Ok(issued) => ItemResponse::ok(
                receipt_handle,
                format!(
                    "{pool} coupon granted successfully. Coupon ID: {}",
                    issued.coupon_id
                ),
            ),
            Err(e) => ItemResponse::failed(receipt_handle, &e),
        };
        responses.push(response);
    }

    responses
}

/// Migrate one coupon per record.
pub async fn migrate_batch(worker: &PersistenceWorker, envelope: Envelope) -> Vec<ItemResponse> {
    let mut responses = Vec::with_capacity(envelope.records.len());

    for (receipt_handle, body) in envelope.records.into_iter().filter_map(body_of) {
        let response = match worker.handle(body.as_bytes()).await {
            Ok(outcome) => ItemResponse::ok(receipt_handle, outcome.body()),
            Err(e) => ItemResponse::failed(receipt_handle, &e),
        };
        responses.push(response);
    }

    responses
}
