//! C2: given a descriptor and a `DocumentStore`, fetch the current slice.

use crate::descriptor::SubscriptionDescriptor;
use crate::store::{Document, DocumentStore, Projection, StoreError};
use serde_json::Value;

/// The materialized result of resolving a descriptor: either a whole
/// collection/cursor (always flattened into an ordered `Vec` before
/// hashing) or a single document (possibly absent).
#[derive(Debug, Clone, PartialEq)]
pub enum Slice {
    Many(Vec<Document>),
    One(Option<Document>),
}

impl Slice {
    /// The JSON form hashed for change detection and sent as `data`.
    pub fn into_value(self) -> Value {
        match self {
            Slice::Many(docs) => {
                Value::Array(docs.into_iter().map(Value::Object).collect())
            }
            Slice::One(doc) => doc.map(Value::Object).unwrap_or(Value::Null),
        }
    }
}

/// Resolve a descriptor's current slice against `store`.
pub async fn resolve(
    descriptor: &SubscriptionDescriptor,
    store: &dyn DocumentStore,
) -> Result<Slice, StoreError> {
    match (&descriptor.field, &descriptor.object_id) {
        (None, None) => {
            let docs = store
                .find(
                    &descriptor.db_name,
                    &descriptor.collection_name,
                    &Document::new(),
                    None,
                )
                .await?;
            Ok(Slice::Many(docs))
        }
        (None, Some(object_id)) => {
            let filter = id_filter(object_id);
            let doc = store
                .find_one(&descriptor.db_name, &descriptor.collection_name, &filter, None)
                .await?;
            Ok(Slice::One(doc))
        }
        (Some(field), object_id) => {
            let filter = match object_id {
                Some(id) => id_filter(id),
                None => id_filter_null(),
            };
            let projection = build_projection(field);
            let doc = store
                .find_one(
                    &descriptor.db_name,
                    &descriptor.collection_name,
                    &filter,
                    Some(&projection),
                )
                .await?;
            Ok(Slice::One(doc))
        }
    }
}

fn id_filter(object_id: &str) -> Document {
    let mut filter = Document::new();
    filter.insert("_id".to_owned(), Value::String(object_id.to_owned()));
    filter
}

fn id_filter_null() -> Document {
    let mut filter = Document::new();
    filter.insert("_id".to_owned(), Value::Null);
    filter
}

/// Build the projection for a non-empty `field` path: `{path: 1}` unless the
/// last dotted segment is a non-negative integer, in which case it's an
/// array-slice projection on the preceding prefix.
fn build_projection(field: &str) -> Projection {
    let parts: Vec<&str> = field.split('.').collect();
    let last = *parts.last().expect("split always yields >= 1 part");
    if is_numeric_index(last) {
        let index: i64 = last.parse().unwrap_or(0);
        Projection::ArraySlice {
            prefix: array_prefix(&parts),
            index,
        }
    } else {
        Projection::Field(field.to_owned())
    }
}

/// `first` plus the dotted middle segments, excluding the last (numeric)
/// segment -- e.g. `"a.b.0"` -> `"a.b"`, `"items.0"` -> `"items"`.
fn array_prefix(parts: &[&str]) -> String {
    let mut prefix = parts[0].to_owned();
    if parts.len() > 2 {
        prefix.push('.');
        prefix.push_str(&parts[1..parts.len() - 1].join("."));
    }
    prefix
}

fn is_numeric_index(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}
