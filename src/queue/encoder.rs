//! Bulk wire format encoding.
//!
//! Each operation becomes an action metadata line followed, except for
//! deletes, by a document line:
//!
//! ```text
//! {"index":{"_index":"users","_id":"1","routing":"tenant-7"}}
//! {"name":"Ada"}
//! {"delete":{"_index":"users","_id":"2"}}
//! ```

use std::borrow::Cow;
use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use super::operation::{Operation, OperationKind, Payload};

/// Keys that mark an update payload as an already-built envelope.
const UPDATE_ENVELOPE_KEYS: [&str; 2] = ["doc", "script"];

/// Why a single operation could not be encoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    /// Raw payload bytes are not valid JSON.
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(String),

    /// The payload is valid JSON but not an object.
    #[error("{kind} payload must be a JSON object")]
    NotAnObject {
        /// Kind of the offending operation.
        kind: OperationKind,
    },

    /// A kind that needs a document was given none.
    #[error("{kind} operation requires a payload")]
    MissingPayload {
        /// Kind of the offending operation.
        kind: OperationKind,
    },

    /// The document could not be serialized.
    #[error("failed to serialize payload: {0}")]
    Serialize(String),
}

/// The two-line wire unit for one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedAction {
    /// Action metadata line, without trailing newline.
    pub metadata: Vec<u8>,
    /// Document line, absent for deletes.
    pub document: Option<Vec<u8>>,
}

impl EncodedAction {
    /// Append this unit to a bulk body, newline-terminating each line.
    pub fn write_to(&self, body: &mut Vec<u8>) {
        body.extend_from_slice(&self.metadata);
        body.push(b'\n');
        if let Some(document) = &self.document {
            body.extend_from_slice(document);
            body.push(b'\n');
        }
    }
}

#[derive(Serialize)]
struct ActionMetadata<'a> {
    #[serde(rename = "_index")]
    index: &'a str,
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    routing: Option<&'a str>,
}

/// Encode one operation into its metadata and document lines.
///
/// # Errors
///
/// Returns an [`EncodeError`] if the payload is missing, not valid JSON, or
/// not a JSON object.
pub fn encode(operation: &Operation) -> Result<EncodedAction, EncodeError> {
    let kind = operation.kind();

    let mut line = BTreeMap::new();
    line.insert(
        kind.action(),
        ActionMetadata {
            index: operation.collection(),
            id: operation.document_id(),
            routing: operation.routing(),
        },
    );
    let metadata = serde_json::to_vec(&line).map_err(|e| EncodeError::Serialize(e.to_string()))?;

    if !kind.has_document() {
        return Ok(EncodedAction {
            metadata,
            document: None,
        });
    }

    let value = match operation.payload() {
        Some(Payload::Json(value)) => Cow::Borrowed(value),
        Some(Payload::Raw(bytes)) => Cow::Owned(
            serde_json::from_slice::<Value>(bytes)
                .map_err(|e| EncodeError::InvalidJson(e.to_string()))?,
        ),
        None => return Err(EncodeError::MissingPayload { kind }),
    };

    let Value::Object(fields) = &*value else {
        return Err(EncodeError::NotAnObject { kind });
    };

    let document = if kind == OperationKind::Update && !is_update_envelope(fields) {
        let mut envelope = Map::new();
        envelope.insert("doc".to_string(), value.into_owned());
        serde_json::to_vec(&envelope)
    } else {
        serde_json::to_vec(&*value)
    }
    .map_err(|e| EncodeError::Serialize(e.to_string()))?;

    Ok(EncodedAction {
        metadata,
        document: Some(document),
    })
}

fn is_update_envelope(fields: &Map<String, Value>) -> bool {
    UPDATE_ENVELOPE_KEYS.iter().any(|key| fields.contains_key(*key))
}

/// A batch of operations encoded into one bulk body.
#[derive(Debug, Default)]
pub struct EncodedBatch {
    /// Newline-delimited bulk body.
    pub body: Vec<u8>,
    /// Batch indices of the operations present in `body`, in order.
    pub submitted: Vec<usize>,
    /// Operations left out of `body`, with the reason.
    pub failures: Vec<(usize, EncodeError)>,
}

impl EncodedBatch {
    /// Whether nothing was encoded successfully.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.submitted.is_empty()
    }
}

/// Encode a batch, preserving order and setting aside operations that fail.
#[must_use]
pub fn encode_batch(operations: &[Operation]) -> EncodedBatch {
    let mut batch = EncodedBatch::default();

    for (index, operation) in operations.iter().enumerate() {
        match encode(operation) {
            Ok(action) => {
                action.write_to(&mut batch.body);
                batch.submitted.push(index);
            },
            Err(e) => batch.failures.push((index, e)),
        }
    }

    batch
}
