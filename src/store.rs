//! The `DocumentStore` trait: the document-store API the write interceptor
//! (C5) and the data-path resolver (C2) are written against.
//!
//! The actual wire-level MongoDB driver is an explicit external collaborator
//! (out of scope for this crate) -- this trait is the seam where a real
//! driver would be wired in. [`InMemoryStore`] is the one concrete
//! implementation shipped here, so the broker is runnable and testable
//! standalone.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A document is a plain JSON object. Using `serde_json::Map` (a `BTreeMap`
/// under the hood) rather than `bson::Document` keeps the broker's data path
/// entirely in terms of the JSON codec already used for the wire protocol;
/// BSON encoding is the actual driver's concern, not the broker's.
pub type Document = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("document not found")]
    NotFound,
    #[error("store error: {0}")]
    Other(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsertOneResult {
    pub inserted_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsertManyResult {
    pub inserted_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateResult {
    pub modified_count: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteResult {
    pub deleted_count: u64,
}

/// The two projection shapes the data-path resolver ever builds (§4.2), plus
/// an `IdOnly` shape used by the write interceptor's pre-write filter lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    /// `{path: 1}` -- a single dotted field.
    Field(String),
    /// `{_id: 1, prefix: {"$slice": [index, 1]}}` -- one array element.
    ArraySlice { prefix: String, index: i64 },
    /// `{_id: 1}`.
    IdOnly,
}

/// The document-store API consumed by the broker. Every method takes a
/// fully-qualified `(db, collection)` pair rather than a bound handle, since
/// the broker has no long-lived connection to any one collection.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn insert_one(
        &self,
        db: &str,
        collection: &str,
        document: Document,
    ) -> Result<InsertOneResult, StoreError>;

    async fn insert_many(
        &self,
        db: &str,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<InsertManyResult, StoreError>;

    async fn update_one(
        &self,
        db: &str,
        collection: &str,
        filter: &Document,
        update: &Document,
    ) -> Result<UpdateResult, StoreError>;

    async fn update_many(
        &self,
        db: &str,
        collection: &str,
        filter: &Document,
        update: &Document,
    ) -> Result<UpdateResult, StoreError>;

    async fn delete_one(
        &self,
        db: &str,
        collection: &str,
        filter: &Document,
    ) -> Result<DeleteResult, StoreError>;

    async fn delete_many(
        &self,
        db: &str,
        collection: &str,
        filter: &Document,
    ) -> Result<DeleteResult, StoreError>;

    async fn find(
        &self,
        db: &str,
        collection: &str,
        filter: &Document,
        projection: Option<&Projection>,
    ) -> Result<Vec<Document>, StoreError>;

    async fn find_one(
        &self,
        db: &str,
        collection: &str,
        filter: &Document,
        projection: Option<&Projection>,
    ) -> Result<Option<Document>, StoreError>;
}

type Key = (String, String);

/// A minimal in-process store: one `Vec<Document>` per `(db, collection)`,
/// guarded by a single `RwLock`. Its query matcher only supports top-level
/// equality filters (including `{"_id": "..."}`) and its update applicator
/// only supports `$set` and `$inc` -- enough to exercise the broker's
/// publish semantics without pulling in a real query planner.
#[derive(Default)]
pub struct InMemoryStore {
    collections: RwLock<HashMap<Key, Vec<Document>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a document directly, bypassing fingerprint publication. Intended
    /// for test setup and for pre-populating demo data.
    pub async fn seed(&self, db: &str, collection: &str, mut document: Document) -> String {
        let id = document
            .get("_id")
            .and_then(|v| v.as_str())
            .map(ToOwned::to_owned)
            .unwrap_or_else(new_object_id);
        document.insert("_id".to_owned(), serde_json::Value::String(id.clone()));
        let mut guard = self.collections.write().await;
        guard
            .entry((db.to_owned(), collection.to_owned()))
            .or_default()
            .push(document);
        id
    }
}

/// Generate a fresh 24-hex-character document id, matching MongoDB's
/// `ObjectId` wire shape.
pub fn new_object_id() -> String {
    bson::oid::ObjectId::new().to_hex()
}

fn matches(document: &Document, filter: &Document) -> bool {
    filter
        .iter()
        .all(|(key, expected)| document.get(key) == Some(expected))
}

fn project(document: &Document, projection: Option<&Projection>) -> Document {
    match projection {
        None => document.clone(),
        Some(Projection::IdOnly) => {
            let mut out = Document::new();
            if let Some(id) = document.get("_id") {
                out.insert("_id".to_owned(), id.clone());
            }
            out
        }
        Some(Projection::Field(path)) => {
            let mut out = Document::new();
            if let Some(value) = get_dotted(document, path) {
                set_dotted(&mut out, path, value.clone());
            }
            out
        }
        Some(Projection::ArraySlice { prefix, index }) => {
            let mut out = Document::new();
            if let Some(id) = document.get("_id") {
                out.insert("_id".to_owned(), id.clone());
            }
            if let Some(serde_json::Value::Array(items)) = get_dotted(document, prefix) {
                let idx = usize::try_from(*index).unwrap_or(usize::MAX);
                let slice: Vec<serde_json::Value> = items.get(idx).cloned().into_iter().collect();
                set_dotted(&mut out, prefix, serde_json::Value::Array(slice));
            }
            out
        }
    }
}

fn get_dotted<'a>(document: &'a Document, path: &str) -> Option<&'a serde_json::Value> {
    let mut parts = path.split('.');
    let first = parts.next()?;
    let mut current = document.get(first)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

fn set_dotted(document: &mut Document, path: &str, value: serde_json::Value) {
    let mut parts: Vec<&str> = path.split('.').collect();
    let last = parts.pop().expect("split always yields >= 1 part");
    let mut current = document;
    for part in parts {
        let entry = current
            .entry(part.to_owned())
            .or_insert_with(|| serde_json::Value::Object(Document::new()));
        if !entry.is_object() {
            *entry = serde_json::Value::Object(Document::new());
        }
        current = entry.as_object_mut().expect("just ensured object");
    }
    current.insert(last.to_owned(), value);
}

fn apply_update(document: &mut Document, update: &Document) {
    for (op, fields) in update {
        let Some(fields) = fields.as_object() else {
            continue;
        };
        match op.as_str() {
            "$set" => {
                for (field, value) in fields {
                    set_dotted(document, field, value.clone());
                }
            }
            "$inc" => {
                for (field, delta) in fields {
                    let delta = delta.as_f64().unwrap_or(0.0);
                    let current = get_dotted(document, field).and_then(Value::as_f64).unwrap_or(0.0);
                    set_dotted(document, field, serde_json::json!(current + delta));
                }
            }
            _ => {}
        }
    }
}

use serde_json::Value;

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn insert_one(
        &self,
        db: &str,
        collection: &str,
        mut document: Document,
    ) -> Result<InsertOneResult, StoreError> {
        let id = new_object_id();
        document.insert("_id".to_owned(), Value::String(id.clone()));
        let mut guard = self.collections.write().await;
        guard
            .entry((db.to_owned(), collection.to_owned()))
            .or_default()
            .push(document);
        Ok(InsertOneResult {
            inserted_id: Some(id),
        })
    }

    async fn insert_many(
        &self,
        db: &str,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<InsertManyResult, StoreError> {
        let mut ids = Vec::with_capacity(documents.len());
        let mut guard = self.collections.write().await;
        let slot = guard
            .entry((db.to_owned(), collection.to_owned()))
            .or_default();
        for mut document in documents {
            let id = new_object_id();
            document.insert("_id".to_owned(), Value::String(id.clone()));
            slot.push(document);
            ids.push(id);
        }
        Ok(InsertManyResult { inserted_ids: ids })
    }

    async fn update_one(
        &self,
        db: &str,
        collection: &str,
        filter: &Document,
        update: &Document,
    ) -> Result<UpdateResult, StoreError> {
        let mut guard = self.collections.write().await;
        let slot = guard
            .entry((db.to_owned(), collection.to_owned()))
            .or_default();
        let modified = slot
            .iter_mut()
            .find(|doc| matches(doc, filter))
            .map(|doc| apply_update(doc, update))
            .is_some();
        Ok(UpdateResult {
            modified_count: u64::from(modified),
        })
    }

    async fn update_many(
        &self,
        db: &str,
        collection: &str,
        filter: &Document,
        update: &Document,
    ) -> Result<UpdateResult, StoreError> {
        let mut guard = self.collections.write().await;
        let slot = guard
            .entry((db.to_owned(), collection.to_owned()))
            .or_default();
        let mut count = 0u64;
        for doc in slot.iter_mut().filter(|doc| matches(doc, filter)) {
            apply_update(doc, update);
            count += 1;
        }
        Ok(UpdateResult {
            modified_count: count,
        })
    }

    async fn delete_one(
        &self,
        db: &str,
        collection: &str,
        filter: &Document,
    ) -> Result<DeleteResult, StoreError> {
        let mut guard = self.collections.write().await;
        let slot = guard
            .entry((db.to_owned(), collection.to_owned()))
            .or_default();
        if let Some(pos) = slot.iter().position(|doc| matches(doc, filter)) {
            slot.remove(pos);
            Ok(DeleteResult { deleted_count: 1 })
        } else {
            Ok(DeleteResult { deleted_count: 0 })
        }
    }

    async fn delete_many(
        &self,
        db: &str,
        collection: &str,
        filter: &Document,
    ) -> Result<DeleteResult, StoreError> {
        let mut guard = self.collections.write().await;
        let slot = guard
            .entry((db.to_owned(), collection.to_owned()))
            .or_default();
        let before = slot.len();
        slot.retain(|doc| !matches(doc, filter));
        Ok(DeleteResult {
            deleted_count: (before - slot.len()) as u64,
        })
    }

    async fn find(
        &self,
        db: &str,
        collection: &str,
        filter: &Document,
        projection: Option<&Projection>,
    ) -> Result<Vec<Document>, StoreError> {
        let guard = self.collections.read().await;
        let slot = guard.get(&(db.to_owned(), collection.to_owned()));
        let docs = slot
            .map(|docs| {
                docs.iter()
                    .filter(|doc| matches(doc, filter))
                    .map(|doc| project(doc, projection))
                    .collect()
            })
            .unwrap_or_default();
        Ok(docs)
    }

    async fn find_one(
        &self,
        db: &str,
        collection: &str,
        filter: &Document,
        projection: Option<&Projection>,
    ) -> Result<Option<Document>, StoreError> {
        let guard = self.collections.read().await;
        let slot = guard.get(&(db.to_owned(), collection.to_owned()));
        Ok(slot
            .and_then(|docs| docs.iter().find(|doc| matches(doc, filter)))
            .map(|doc| project(doc, projection)))
    }
}

pub type SharedStore = Arc<dyn DocumentStore>;
