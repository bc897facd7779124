//! C5: the write interceptor. A thin decorator over a [`DocumentStore`] that
//! mirrors the same collection-style API and publishes fingerprints on every
//! successful mutation, so callers can swap a raw store for an intercepted
//! one without changing call sites.
//!
//! Two lookups are intentionally asymmetric, carried over verbatim from the
//! system this was modeled on:
//! - `update_one`/`update_many` resolve the touched document's id *after*
//!   the write completes, re-running the caller's original filter against
//!   post-write state. If the update itself changed the fields the filter
//!   matched on, this lookup can miss or mismatch -- a known, accepted race,
//!   not a bug to fix here.
//! - `delete_one`/`delete_many` resolve the id *before* the delete, since
//!   the filter can never match anything once the document is gone.

use crate::descriptor::{collection_fingerprint, document_fingerprint, fingerprints_for_write};
use crate::queue::BroadcastQueue;
use crate::store::{
    DeleteResult, Document, DocumentStore, InsertManyResult, InsertOneResult, Projection,
    StoreError, UpdateResult,
};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Wraps a [`DocumentStore`] and a [`BroadcastQueue`]; implements
/// [`DocumentStore`] itself so it can be used anywhere a plain store is
/// expected.
pub struct WriteInterceptor {
    inner: Arc<dyn DocumentStore>,
    queue: Arc<BroadcastQueue>,
}

impl WriteInterceptor {
    pub fn new(inner: Arc<dyn DocumentStore>, queue: Arc<BroadcastQueue>) -> Self {
        Self { inner, queue }
    }

    async fn publish_all(&self, fingerprints: Vec<String>) {
        for fingerprint in fingerprints {
            debug!(%fingerprint, "publishing write fingerprint");
            self.queue.publish(fingerprint).await;
        }
    }

    /// Publish a delete: the collection-level fingerprint bare (subscribers
    /// re-resolve), the document-level one (if any) carrying the deleted id
    /// directly, since there is nothing left to resolve once it's gone.
    async fn publish_delete(&self, db: &str, collection: &str, object_id: Option<&str>) {
        debug!(fingerprint = %collection_fingerprint(db, collection), "publishing write fingerprint");
        self.queue.publish(collection_fingerprint(db, collection)).await;
        if let Some(id) = object_id {
            let fingerprint = document_fingerprint(db, collection, id);
            debug!(%fingerprint, "publishing write fingerprint");
            self.queue
                .publish_with_payload(fingerprint, serde_json::json!({ "deleted_id": id }))
                .await;
        }
    }

    async fn lookup_id(
        &self,
        db: &str,
        collection: &str,
        filter: &Document,
    ) -> Option<String> {
        self.inner
            .find_one(db, collection, filter, Some(&Projection::IdOnly))
            .await
            .ok()
            .flatten()
            .and_then(|doc| doc.get("_id").and_then(|v| v.as_str().map(ToOwned::to_owned)))
    }

    async fn lookup_ids(
        &self,
        db: &str,
        collection: &str,
        filter: &Document,
    ) -> Vec<String> {
        self.inner
            .find(db, collection, filter, Some(&Projection::IdOnly))
            .await
            .unwrap_or_default()
            .into_iter()
            .filter_map(|doc| doc.get("_id").and_then(|v| v.as_str().map(ToOwned::to_owned)))
            .collect()
    }
}

/// The set of field names touched by an update document -- every key nested
/// one level under any operator (`$set`, `$inc`, ...), deduplicated and
/// sorted so fingerprint order is deterministic.
fn touched_fields(update: &Document) -> Vec<String> {
    let mut fields = BTreeSet::new();
    for operator in update.values() {
        if let Some(operands) = operator.as_object() {
            fields.extend(operands.keys().cloned());
        }
    }
    fields.into_iter().collect()
}

#[async_trait]
impl DocumentStore for WriteInterceptor {
    async fn insert_one(
        &self,
        db: &str,
        collection: &str,
        document: Document,
    ) -> Result<InsertOneResult, StoreError> {
        let result = self.inner.insert_one(db, collection, document).await?;
        self.publish_all(fingerprints_for_write(db, collection, None, None))
            .await;
        Ok(result)
    }

    async fn insert_many(
        &self,
        db: &str,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<InsertManyResult, StoreError> {
        let result = self.inner.insert_many(db, collection, documents).await?;
        if !result.inserted_ids.is_empty() {
            self.publish_all(fingerprints_for_write(db, collection, None, None))
                .await;
        }
        Ok(result)
    }

    async fn update_one(
        &self,
        db: &str,
        collection: &str,
        filter: &Document,
        update: &Document,
    ) -> Result<UpdateResult, StoreError> {
        let result = self.inner.update_one(db, collection, filter, update).await?;
        if result.modified_count > 0 {
            let id = self.lookup_id(db, collection, filter).await;
            let fields = touched_fields(update);
            self.publish_all(fingerprints_for_write(db, collection, id.as_deref(), Some(&fields)))
                .await;
        }
        Ok(result)
    }

    async fn update_many(
        &self,
        db: &str,
        collection: &str,
        filter: &Document,
        update: &Document,
    ) -> Result<UpdateResult, StoreError> {
        let result = self.inner.update_many(db, collection, filter, update).await?;
        if result.modified_count > 0 {
            let fields = touched_fields(update);
            let ids = self.lookup_ids(db, collection, filter).await;
            if ids.is_empty() {
                self.publish_all(fingerprints_for_write(db, collection, None, None))
                    .await;
            } else {
                for id in ids {
                    self.publish_all(fingerprints_for_write(
                        db,
                        collection,
                        Some(id.as_str()),
                        Some(&fields),
                    ))
                    .await;
                }
            }
        }
        Ok(result)
    }

    async fn delete_one(
        &self,
        db: &str,
        collection: &str,
        filter: &Document,
    ) -> Result<DeleteResult, StoreError> {
        let id = self.lookup_id(db, collection, filter).await;
        let result = self.inner.delete_one(db, collection, filter).await?;
        if result.deleted_count > 0 {
            self.publish_delete(db, collection, id.as_deref()).await;
        }
        Ok(result)
    }

    async fn delete_many(
        &self,
        db: &str,
        collection: &str,
        filter: &Document,
    ) -> Result<DeleteResult, StoreError> {
        let ids = self.lookup_ids(db, collection, filter).await;
        let result = self.inner.delete_many(db, collection, filter).await?;
        if result.deleted_count > 0 {
            if ids.is_empty() {
                self.publish_delete(db, collection, None).await;
            } else {
                for id in &ids {
                    self.publish_delete(db, collection, Some(id.as_str())).await;
                }
            }
        }
        Ok(result)
    }

    async fn find(
        &self,
        db: &str,
        collection: &str,
        filter: &Document,
        projection: Option<&Projection>,
    ) -> Result<Vec<Document>, StoreError> {
        self.inner.find(db, collection, filter, projection).await
    }

    async fn find_one(
        &self,
        db: &str,
        collection: &str,
        filter: &Document,
        projection: Option<&Projection>,
    ) -> Result<Option<Document>, StoreError> {
        self.inner.find_one(db, collection, filter, projection).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use serde_json::json;
    use tokio::time::{timeout, Duration};

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().unwrap().clone()
    }

    async fn harness() -> (WriteInterceptor, tokio::sync::mpsc::Receiver<crate::queue::SessionEvent>) {
        let queue = Arc::new(BroadcastQueue::new(16, 16));
        let (_id, rx) = queue.register().await;
        let store = Arc::new(InMemoryStore::new());
        (WriteInterceptor::new(store, queue), rx)
    }

    #[tokio::test]
    async fn insert_one_publishes_collection_fingerprint_only() {
        let (writer, mut rx) = harness().await;
        writer.insert_one("d", "c", doc(json!({"x": 1}))).await.unwrap();
        let event = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert_eq!(event.fingerprint, collection_fingerprint("d", "c"));
        assert!(timeout(Duration::from_millis(50), rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn update_one_publishes_collection_document_and_field_fingerprints() {
        let (writer, mut rx) = harness().await;
        writer.insert_one("d", "c", doc(json!({"n": 1}))).await.unwrap();
        let inserted = writer.find_one("d", "c", &Document::new(), None).await.unwrap().unwrap();
        let id = inserted.get("_id").unwrap().as_str().unwrap().to_owned();

        writer
            .update_one(
                "d",
                "c",
                &doc(json!({"_id": id})),
                &doc(json!({"$set": {"n": 2}})),
            )
            .await
            .unwrap();

        let mut seen = Vec::new();
        for _ in 0..3 {
            let event = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
            seen.push(event.fingerprint);
        }
        assert_eq!(seen[0], collection_fingerprint("d", "c"));
        assert_eq!(seen[1], document_fingerprint("d", "c", &id));
    }

    #[tokio::test]
    async fn delete_one_publishes_collection_and_document_fingerprints() {
        let (writer, mut rx) = harness().await;
        writer.insert_one("d", "c", doc(json!({"x": 1}))).await.unwrap();
        let inserted = writer.find_one("d", "c", &Document::new(), None).await.unwrap().unwrap();
        let id = inserted.get("_id").unwrap().as_str().unwrap().to_owned();

        writer.delete_one("d", "c", &doc(json!({"_id": id}))).await.unwrap();

        let first = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        let second = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert_eq!(first.fingerprint, collection_fingerprint("d", "c"));
        assert!(first.payload.is_none());
        assert_eq!(second.fingerprint, document_fingerprint("d", "c", &id));
        assert_eq!(second.payload, Some(json!({"deleted_id": id})));
    }

    #[tokio::test]
    async fn update_with_no_matching_document_publishes_nothing() {
        let (writer, mut rx) = harness().await;
        writer
            .update_one(
                "d",
                "c",
                &doc(json!({"_id": "missing"})),
                &doc(json!({"$set": {"n": 2}})),
            )
            .await
            .unwrap();
        assert!(timeout(Duration::from_millis(50), rx.recv()).await.is_err());
    }
}
