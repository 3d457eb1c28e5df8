//! Operation descriptors for the bulk queue.
//!
//! An [`Operation`] names one pending write: the target collection, the kind
//! of write, an optional document id and routing key, and the document body.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The kind of write an operation performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Create a document, failing if the id already exists.
    Create,
    /// Insert or replace a document.
    #[serde(alias = "index")]
    Upsert,
    /// Partially update an existing document.
    Update,
    /// Delete a document.
    Delete,
}

impl OperationKind {
    /// The action tag used in the bulk wire format.
    #[must_use]
    pub const fn action(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Upsert => "index",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// Parse a wire action tag or kind name.
    #[must_use]
    pub fn from_action(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "create" => Some(Self::Create),
            "index" | "upsert" => Some(Self::Upsert),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }

    /// Whether this kind carries a document line.
    #[must_use]
    pub const fn has_document(&self) -> bool {
        !matches!(self, Self::Delete)
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.action())
    }
}

/// Document body of an operation. Opaque to the queue.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// An in-memory JSON value.
    Json(Value),
    /// Pre-serialized JSON bytes, validated only when encoded.
    Raw(Vec<u8>),
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Raw(bytes)
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Self::Raw(s.into_bytes())
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Self::Raw(s.as_bytes().to_vec())
    }
}

/// One pending write, immutable once enqueued.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    collection: String,
    document_id: Option<String>,
    kind: OperationKind,
    payload: Option<Payload>,
    routing: Option<String>,
}

impl Operation {
    /// Create an operation. Empty ids are treated as absent, and the payload
    /// is dropped for deletes.
    #[must_use]
    pub fn new(
        kind: OperationKind,
        collection: impl Into<String>,
        document_id: Option<String>,
        payload: Option<Payload>,
    ) -> Self {
        Self {
            collection: collection.into(),
            document_id: document_id.filter(|id| !id.is_empty()),
            kind,
            payload: if kind.has_document() { payload } else { None },
            routing: None,
        }
    }

    /// Index a document with a backend-assigned id.
    #[must_use]
    pub fn upsert(collection: impl Into<String>, payload: impl Into<Payload>) -> Self {
        Self::new(OperationKind::Upsert, collection, None, Some(payload.into()))
    }

    /// Index a document under an explicit id, replacing any existing one.
    #[must_use]
    pub fn upsert_with_id(
        collection: impl Into<String>,
        id: impl Into<String>,
        payload: impl Into<Payload>,
    ) -> Self {
        Self::new(
            OperationKind::Upsert,
            collection,
            Some(id.into()),
            Some(payload.into()),
        )
    }

    /// Create a document, failing on the backend if the id exists.
    #[must_use]
    pub fn create(
        collection: impl Into<String>,
        id: impl Into<String>,
        payload: impl Into<Payload>,
    ) -> Self {
        Self::new(
            OperationKind::Create,
            collection,
            Some(id.into()),
            Some(payload.into()),
        )
    }

    /// Partially update a document.
    ///
    /// The payload may be a bare partial object or a pre-built `doc`/`script`
    /// envelope.
    #[must_use]
    pub fn update(
        collection: impl Into<String>,
        id: impl Into<String>,
        payload: impl Into<Payload>,
    ) -> Self {
        Self::new(
            OperationKind::Update,
            collection,
            Some(id.into()),
            Some(payload.into()),
        )
    }

    /// Delete a document.
    #[must_use]
    pub fn delete(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self::new(OperationKind::Delete, collection, Some(id.into()), None)
    }

    /// Attach a routing key. Empty keys are ignored.
    #[must_use]
    pub fn with_routing(mut self, routing: impl Into<String>) -> Self {
        let routing = routing.into();
        self.routing = (!routing.is_empty()).then_some(routing);
        self
    }

    /// Target collection.
    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Document id, if one was given.
    #[must_use]
    pub fn document_id(&self) -> Option<&str> {
        self.document_id.as_deref()
    }

    /// Operation kind.
    #[must_use]
    pub const fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Document payload. Always `None` for deletes.
    #[must_use]
    pub const fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    /// Routing key, if one was given.
    #[must_use]
    pub fn routing(&self) -> Option<&str> {
        self.routing.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operation_kind_action() {
        assert_eq!(OperationKind::Upsert.action(), "index");
        assert_eq!(OperationKind::Create.to_string(), "create");
        assert_eq!(OperationKind::from_action("INDEX"), Some(OperationKind::Upsert));
        assert_eq!(OperationKind::from_action("upsert"), Some(OperationKind::Upsert));
        assert_eq!(OperationKind::from_action("merge"), None);
    }

    #[test]
    fn test_operation_kind_deserialize_alias() {
        let kind: OperationKind = serde_json::from_str("\"index\"").expect("should deserialize");
        assert_eq!(kind, OperationKind::Upsert);
    }

    #[test]
    fn test_delete_drops_payload() {
        let op = Operation::new(
            OperationKind::Delete,
            "users",
            Some("1".to_string()),
            Some(json!({"a": 1}).into()),
        );
        assert!(op.payload().is_none());
        assert_eq!(op.document_id(), Some("1"));
    }

    #[test]
    fn test_empty_id_and_routing_are_absent() {
        let op = Operation::upsert_with_id("users", "", json!({"a": 1})).with_routing("");
        assert!(op.document_id().is_none());
        assert!(op.routing().is_none());

        let routed = Operation::upsert("users", json!({})).with_routing("tenant-7");
        assert_eq!(routed.routing(), Some("tenant-7"));
    }

    #[test]
    fn test_payload_conversions() {
        assert_eq!(Payload::from("{}"), Payload::Raw(b"{}".to_vec()));
        assert_eq!(Payload::from(json!(1)), Payload::Json(json!(1)));
    }
}
