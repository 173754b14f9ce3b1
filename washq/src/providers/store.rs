//! Document store abstraction.

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Field map of a stored document (the id is kept alongside, not inside).
pub type Document = serde_json::Map<String, Value>;

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Collections used by washQ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    /// Machine documents.
    Machines,
    /// Booking documents.
    Bookings,
    /// User profiles, keyed by identity id.
    Users,
    /// Feedback entries.
    Feedback,
}

impl Collection {
    /// Collection name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Machines => "machines",
            Self::Bookings => "bookings",
            Self::Users => "users",
            Self::Feedback => "feedback",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A document together with its id.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    /// Document id.
    pub id: String,
    /// Document fields.
    pub fields: Document,
}

/// Errors reported by a document store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("document store is unreachable")]
    Unreachable,

    /// `update` targeted a document that does not exist.
    #[error("{collection} document {id} does not exist")]
    Missing {
        /// Collection searched
        collection: Collection,
        /// Requested id
        id: String,
    },

    /// The store refused the write.
    #[error("write rejected: {0}")]
    Rejected(String),

    /// A document could not be encoded or decoded.
    #[error("malformed document: {0}")]
    Malformed(String),
}

/// Document store over the washQ collections.
///
/// Every method is a single round trip. `update` merges the given fields
/// into an existing document; a `null` value clears a field. `delete` and
/// `batch_delete` succeed when the documents are already gone.
pub trait DocumentStore: Send + Sync {
    /// Every document of a collection, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store fails.
    fn list_all(&self, collection: Collection) -> BoxFuture<'_, StoreResult<Vec<StoredDocument>>>;

    /// A single document, `None` when absent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store fails.
    fn get_by_id(
        &self,
        collection: Collection,
        id: &str,
    ) -> BoxFuture<'_, StoreResult<Option<StoredDocument>>>;

    /// Create a document with a generated id and return the id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store fails.
    fn create(
        &self,
        collection: Collection,
        fields: Document,
    ) -> BoxFuture<'_, StoreResult<String>>;

    /// Create or replace a document under a caller-chosen id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store fails.
    fn put(
        &self,
        collection: Collection,
        id: &str,
        fields: Document,
    ) -> BoxFuture<'_, StoreResult<()>>;

    /// Merge fields into an existing document.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Missing`] if the document does not exist, or
    /// another [`StoreError`] if the store fails.
    fn update(
        &self,
        collection: Collection,
        id: &str,
        fields: Document,
    ) -> BoxFuture<'_, StoreResult<()>>;

    /// Delete a document.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store fails.
    fn delete(&self, collection: Collection, id: &str) -> BoxFuture<'_, StoreResult<()>>;

    /// Documents whose `field` equals `value`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store fails.
    fn query_equals(
        &self,
        collection: Collection,
        field: &str,
        value: Value,
    ) -> BoxFuture<'_, StoreResult<Vec<StoredDocument>>>;

    /// Delete several documents in one atomic write.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store fails; nothing is deleted then.
    fn batch_delete(
        &self,
        collection: Collection,
        ids: Vec<String>,
    ) -> BoxFuture<'_, StoreResult<()>>;
}

/// Encode a value as document fields, dropping its `id`.
///
/// # Errors
///
/// Returns [`StoreError::Malformed`] if the value does not serialize to an object.
pub fn to_document<T: Serialize>(value: &T) -> StoreResult<Document> {
    match serde_json::to_value(value).map_err(|e| StoreError::Malformed(e.to_string()))? {
        Value::Object(mut fields) => {
            fields.remove("id");
            Ok(fields)
        },
        other => Err(StoreError::Malformed(format!("expected an object, got {other}"))),
    }
}

/// Decode a stored document, injecting its id as the `id` field.
///
/// # Errors
///
/// Returns [`StoreError::Malformed`] if the fields do not match `T`.
pub fn from_document<T: DeserializeOwned>(document: StoredDocument) -> StoreResult<T> {
    let StoredDocument { id, mut fields } = document;
    fields.insert("id".to_string(), Value::String(id));
    serde_json::from_value(Value::Object(fields)).map_err(|e| StoreError::Malformed(e.to_string()))
}

/// Build a document from `(field, value)` pairs.
#[must_use]
pub fn fields<const N: usize>(pairs: [(&str, Value); N]) -> Document {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{Machine, MachineId};
    use chrono::Utc;

    #[test]
    fn document_round_trip_keeps_id_outside_fields() {
        let machine = Machine::new(MachineId::from("m1"), "Washer #1", None, Utc::now());
        let doc = to_document(&machine).unwrap();
        assert!(!doc.contains_key("id"));
        assert_eq!(doc["name"], "Washer #1");

        let decoded: Machine = from_document(StoredDocument {
            id: "m1".to_string(),
            fields: doc,
        })
        .unwrap();
        assert_eq!(decoded, machine);
    }

    #[test]
    fn decoding_rejects_wrong_shape() {
        let result: StoreResult<Machine> = from_document(StoredDocument {
            id: "m1".to_string(),
            fields: fields([("name", Value::from(3))]),
        });
        assert!(matches!(result, Err(StoreError::Malformed(_))));
    }
}
