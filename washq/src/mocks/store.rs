//! In-memory document store.

use crate::providers::store::{
    Collection, Document, DocumentStore, StoreError, StoreResult, StoredDocument,
};
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

/// Store operation, used to target injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    /// `list_all`
    ListAll,
    /// `get_by_id`
    Get,
    /// `create`
    Create,
    /// `put`
    Put,
    /// `update`
    Update,
    /// `delete`
    Delete,
    /// `query_equals`
    Query,
    /// `batch_delete`
    BatchDelete,
}

#[derive(Debug, Clone, Copy)]
struct Failure {
    collection: Collection,
    op: StoreOp,
    once: bool,
}

#[derive(Debug, Default)]
struct Inner {
    collections: HashMap<Collection, Vec<StoredDocument>>,
    failures: Vec<Failure>,
    offline: bool,
    latency: Duration,
}

impl Inner {
    fn check(&mut self, collection: Collection, op: StoreOp) -> StoreResult<()> {
        if self.offline {
            return Err(StoreError::Unreachable);
        }
        let hit = self
            .failures
            .iter()
            .position(|f| f.collection == collection && f.op == op);
        match hit {
            Some(index) => {
                if self.failures[index].once {
                    self.failures.remove(index);
                }
                Err(StoreError::Rejected(format!(
                    "injected {op:?} failure on {collection}"
                )))
            },
            None => Ok(()),
        }
    }

    fn docs(&mut self, collection: Collection) -> &mut Vec<StoredDocument> {
        self.collections.entry(collection).or_default()
    }
}

/// In-memory [`DocumentStore`].
///
/// Documents keep insertion order. Failures can be injected per
/// collection and operation, the whole store can be taken offline, and an
/// artificial latency can be added to every call.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDocumentStore {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryDocumentStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `op` on `collection`.
    pub fn fail_next(&self, collection: Collection, op: StoreOp) {
        self.inner().failures.push(Failure {
            collection,
            op,
            once: true,
        });
    }

    /// Fail every `op` on `collection` until [`Self::clear_failures`].
    pub fn fail_always(&self, collection: Collection, op: StoreOp) {
        self.inner().failures.push(Failure {
            collection,
            op,
            once: false,
        });
    }

    /// Remove all injected failures.
    pub fn clear_failures(&self) {
        self.inner().failures.clear();
    }

    /// Make every call fail with [`StoreError::Unreachable`].
    pub fn set_offline(&self, offline: bool) {
        self.inner().offline = offline;
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.inner().latency = latency;
    }

    /// Number of documents in `collection`.
    #[must_use]
    pub fn len(&self, collection: Collection) -> usize {
        self.inner().collections.get(&collection).map_or(0, Vec::len)
    }

    /// Whether `collection` holds no documents.
    #[must_use]
    pub fn is_empty(&self, collection: Collection) -> bool {
        self.len(collection) == 0
    }

    /// Copy of a document's fields, bypassing failure injection.
    #[must_use]
    pub fn peek(&self, collection: Collection, id: &str) -> Option<Document> {
        self.inner()
            .collections
            .get(&collection)
            .and_then(|docs| docs.iter().find(|d| d.id == id))
            .map(|d| d.fields.clone())
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        // Every mutation completes under the lock, so a poisoned guard is still consistent
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn begin(&self, collection: Collection, op: StoreOp) -> StoreResult<MutexGuard<'_, Inner>> {
        let mut inner = self.inner();
        inner.check(collection, op)?;
        Ok(inner)
    }

    async fn pause(&self) {
        let latency = self.inner().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn list_all(&self, collection: Collection) -> BoxFuture<'_, StoreResult<Vec<StoredDocument>>> {
        Box::pin(async move {
            self.pause().await;
            let mut inner = self.begin(collection, StoreOp::ListAll)?;
            Ok(inner.docs(collection).clone())
        })
    }

    fn get_by_id(
        &self,
        collection: Collection,
        id: &str,
    ) -> BoxFuture<'_, StoreResult<Option<StoredDocument>>> {
        let id = id.to_string();
        Box::pin(async move {
            self.pause().await;
            let mut inner = self.begin(collection, StoreOp::Get)?;
            Ok(inner.docs(collection).iter().find(|d| d.id == id).cloned())
        })
    }

    fn create(
        &self,
        collection: Collection,
        fields: Document,
    ) -> BoxFuture<'_, StoreResult<String>> {
        Box::pin(async move {
            self.pause().await;
            let mut inner = self.begin(collection, StoreOp::Create)?;
            let id = Uuid::new_v4().simple().to_string();
            inner.docs(collection).push(StoredDocument {
                id: id.clone(),
                fields,
            });
            Ok(id)
        })
    }

    fn put(
        &self,
        collection: Collection,
        id: &str,
        fields: Document,
    ) -> BoxFuture<'_, StoreResult<()>> {
        let id = id.to_string();
        Box::pin(async move {
            self.pause().await;
            let mut inner = self.begin(collection, StoreOp::Put)?;
            let docs = inner.docs(collection);
            match docs.iter_mut().find(|d| d.id == id) {
                Some(existing) => existing.fields = fields,
                None => docs.push(StoredDocument { id, fields }),
            }
            Ok(())
        })
    }

    fn update(
        &self,
        collection: Collection,
        id: &str,
        fields: Document,
    ) -> BoxFuture<'_, StoreResult<()>> {
        let id = id.to_string();
        Box::pin(async move {
            self.pause().await;
            let mut inner = self.begin(collection, StoreOp::Update)?;
            let existing = inner
                .docs(collection)
                .iter_mut()
                .find(|d| d.id == id)
                .ok_or_else(|| StoreError::Missing {
                    collection,
                    id: id.clone(),
                })?;
            existing.fields.extend(fields);
            Ok(())
        })
    }

    fn delete(&self, collection: Collection, id: &str) -> BoxFuture<'_, StoreResult<()>> {
        let id = id.to_string();
        Box::pin(async move {
            self.pause().await;
            let mut inner = self.begin(collection, StoreOp::Delete)?;
            inner.docs(collection).retain(|d| d.id != id);
            Ok(())
        })
    }

    fn query_equals(
        &self,
        collection: Collection,
        field: &str,
        value: Value,
    ) -> BoxFuture<'_, StoreResult<Vec<StoredDocument>>> {
        let field = field.to_string();
        Box::pin(async move {
            self.pause().await;
            let mut inner = self.begin(collection, StoreOp::Query)?;
            Ok(inner
                .docs(collection)
                .iter()
                .filter(|d| d.fields.get(&field) == Some(&value))
                .cloned()
                .collect())
        })
    }

    fn batch_delete(
        &self,
        collection: Collection,
        ids: Vec<String>,
    ) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            self.pause().await;
            let mut inner = self.begin(collection, StoreOp::BatchDelete)?;
            inner.docs(collection).retain(|d| !ids.contains(&d.id));
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::providers::store::fields;

    #[tokio::test]
    async fn update_merges_and_null_clears() {
        let store = InMemoryDocumentStore::new();
        let id = store
            .create(
                Collection::Machines,
                fields([("name", Value::from("Washer")), ("queueCount", Value::from(2))]),
            )
            .await
            .unwrap();

        store
            .update(Collection::Machines, &id, fields([("queueCount", Value::Null)]))
            .await
            .unwrap();

        let doc = store.get_by_id(Collection::Machines, &id).await.unwrap().unwrap();
        assert_eq!(doc.fields["name"], "Washer");
        assert!(doc.fields["queueCount"].is_null());
    }

    #[tokio::test]
    async fn update_of_missing_document_fails() {
        let store = InMemoryDocumentStore::new();
        let result = store
            .update(Collection::Users, "ghost", Document::new())
            .await;
        assert!(matches!(result, Err(StoreError::Missing { .. })));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = InMemoryDocumentStore::new();
        store.put(Collection::Users, "u1", Document::new()).await.unwrap();
        store.delete(Collection::Users, "u1").await.unwrap();
        store.delete(Collection::Users, "u1").await.unwrap();
        assert!(store.is_empty(Collection::Users));
    }

    #[tokio::test]
    async fn injected_failure_fires_once() {
        let store = InMemoryDocumentStore::new();
        store.fail_next(Collection::Bookings, StoreOp::Create);

        assert!(store.create(Collection::Bookings, Document::new()).await.is_err());
        assert!(store.create(Collection::Bookings, Document::new()).await.is_ok());
        assert_eq!(store.len(Collection::Bookings), 1);
    }

    #[tokio::test]
    async fn offline_store_is_unreachable() {
        let store = InMemoryDocumentStore::new();
        store.set_offline(true);
        assert_eq!(
            store.list_all(Collection::Machines).await,
            Err(StoreError::Unreachable)
        );
    }

    #[tokio::test]
    async fn query_filters_on_field_equality() {
        let store = InMemoryDocumentStore::new();
        for (id, machine) in [("b1", "m1"), ("b2", "m2"), ("b3", "m1")] {
            store
                .put(Collection::Bookings, id, fields([("machineId", Value::from(machine))]))
                .await
                .unwrap();
        }

        let hits = store
            .query_equals(Collection::Bookings, "machineId", Value::from("m1"))
            .await
            .unwrap();
        let ids: Vec<_> = hits.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, ["b1", "b3"]);
    }
}
