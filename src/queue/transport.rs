//! Transport collaborator for submitting bulk bodies.
//!
//! The queue does not speak HTTP itself. A [`Transport`] takes an encoded
//! bulk body and returns one [`ItemResult`] per submitted operation, in
//! submission order.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Whole-request failure. Retried by the flush engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The backend could not be reached.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The request timed out.
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Non-2xx response without per-item detail.
    #[error("Backend returned status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },

    /// The response could not be interpreted.
    #[error("Malformed bulk response: {0}")]
    MalformedResponse(String),
}

/// Submits encoded bulk bodies to the backend.
///
/// Implementations are shared across the scheduler, threshold flushes, and
/// synchronous callers, and may be invoked concurrently.
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send + Sync {
    /// Submit one bulk body.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when the request as a whole fails.
    fn submit(&self, payload: &[u8]) -> Result<Vec<ItemResult>, TransportError>;
}

/// Error detail reported by the backend for a rejected item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemErrorDetail {
    /// Error type, e.g. `version_conflict_engine_exception`.
    #[serde(rename = "type", default)]
    pub error_type: String,
    /// Human-readable reason.
    #[serde(default)]
    pub reason: String,
    /// Root cause, when the backend reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caused_by: Option<Box<ItemErrorDetail>>,
}

/// Result of one operation within an accepted bulk request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemResult {
    /// HTTP-style status for this item.
    pub status: Option<u16>,
    /// Error detail, present when the item was rejected.
    pub error: Option<ItemErrorDetail>,
}

impl ItemResult {
    /// An accepted item with the given status.
    #[must_use]
    pub const fn accepted(status: u16) -> Self {
        Self {
            status: Some(status),
            error: None,
        }
    }

    /// A rejected item.
    #[must_use]
    pub fn rejected(status: u16, error_type: &str, reason: &str) -> Self {
        Self {
            status: Some(status),
            error: Some(ItemErrorDetail {
                error_type: error_type.to_string(),
                reason: reason.to_string(),
                caused_by: None,
            }),
        }
    }

    /// Whether the backend accepted this item.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.status.map_or(true, |s| (200..300).contains(&s))
    }
}

#[derive(Deserialize)]
struct BulkResponseBody {
    items: Vec<std::collections::HashMap<String, BulkResponseItem>>,
}

#[derive(Deserialize)]
struct BulkResponseItem {
    status: Option<u16>,
    #[serde(default)]
    error: Option<Value>,
}

/// Parse a backend bulk response into ordered item results.
///
/// Each entry of `items` is a single-key object keyed by the action tag.
/// String-valued errors are kept as the reason with an empty type.
///
/// # Errors
///
/// Returns [`TransportError::MalformedResponse`] if the body does not have
/// the expected shape.
pub fn parse_bulk_response(body: &[u8]) -> Result<Vec<ItemResult>, TransportError> {
    let parsed: BulkResponseBody = serde_json::from_slice(body)
        .map_err(|e| TransportError::MalformedResponse(e.to_string()))?;

    parsed
        .items
        .into_iter()
        .enumerate()
        .map(|(index, entry)| {
            let item = entry.into_values().next().ok_or_else(|| {
                TransportError::MalformedResponse(format!("item {index} has no action"))
            })?;
            Ok(ItemResult {
                status: item.status,
                error: item.error.map(error_detail),
            })
        })
        .collect()
}

fn error_detail(value: Value) -> ItemErrorDetail {
    match value {
        Value::String(reason) => ItemErrorDetail {
            reason,
            ..ItemErrorDetail::default()
        },
        other => serde_json::from_value(other.clone()).unwrap_or_else(|_| ItemErrorDetail {
            reason: other.to_string(),
            ..ItemErrorDetail::default()
        }),
    }
}
