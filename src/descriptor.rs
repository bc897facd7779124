//! C1: the subscription descriptor and the fingerprinting scheme that maps a
//! subscribed slice and a write path onto the same opaque routing key.

use crate::canonical::sha1_hex;
use crate::error::BrokerError;
use serde_json::Value;

/// A `(db_name, collection_name, object_id?, field?)` tuple identifying a
/// subscribed slice. Two descriptors are equal iff all four components are
/// equal -- an absent `field` and an empty one compare equal, which is why
/// `field` is normalized to `None` rather than `Some(String::new())`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionDescriptor {
    pub db_name: String,
    pub collection_name: String,
    pub object_id: Option<String>,
    pub field: Option<String>,
}

impl SubscriptionDescriptor {
    pub fn new(
        db_name: impl Into<String>,
        collection_name: impl Into<String>,
        object_id: Option<String>,
        field: Option<String>,
    ) -> Self {
        Self {
            db_name: db_name.into(),
            collection_name: collection_name.into(),
            object_id,
            field: field.filter(|f| !f.is_empty()),
        }
    }

    /// A descriptor is valid exactly when both `db_name` and
    /// `collection_name` are non-empty.
    pub fn is_valid(&self) -> bool {
        !self.db_name.is_empty() && !self.collection_name.is_empty()
    }

    /// Parse a `db_subscribe` payload already decoded into a generic JSON
    /// value. Missing required keys are `BadRequest`; a malformed
    /// `objectId` is `BadRequest`; a resulting invalid descriptor (empty
    /// `db_name`/`collection_name`) is `InvalidSubscribeMessage`.
    pub fn parse(value: &Value) -> Result<Self, BrokerError> {
        let obj = value
            .as_object()
            .ok_or_else(|| BrokerError::BadRequest("expected a JSON object".to_owned()))?;

        let db_name = obj
            .get("db_name")
            .and_then(Value::as_str)
            .ok_or_else(|| BrokerError::BadRequest("missing field: db_name".to_owned()))?
            .to_owned();
        let collection_name = obj
            .get("collection_name")
            .and_then(Value::as_str)
            .ok_or_else(|| BrokerError::BadRequest("missing field: collection_name".to_owned()))?
            .to_owned();

        let object_id = match obj.get("objectId") {
            None | Some(Value::Null) => None,
            Some(v) => Some(
                v.as_str()
                    .ok_or_else(|| BrokerError::BadRequest("objectId must be a string".to_owned()))?
                    .to_owned(),
            ),
        };

        let field = match obj.get("field") {
            None | Some(Value::Null) => None,
            Some(v) => Some(
                v.as_str()
                    .ok_or_else(|| BrokerError::BadRequest("field must be a string".to_owned()))?
                    .to_owned(),
            ),
        };

        Self::from_raw(db_name, collection_name, object_id, field)
    }

    /// Build a descriptor from already-extracted parts (e.g. a decoded
    /// [`broker_protocol::InboundMessage::DbSubscribe`]) -- validates the
    /// `objectId` hex form and descriptor validity the same way [`parse`]
    /// does for a raw JSON value.
    pub fn from_raw(
        db_name: String,
        collection_name: String,
        object_id: Option<String>,
        field: Option<String>,
    ) -> Result<Self, BrokerError> {
        let object_id = match object_id {
            None => None,
            Some(raw) => Some(parse_object_id(&raw)?),
        };
        let descriptor = SubscriptionDescriptor::new(db_name, collection_name, object_id, field);
        if !descriptor.is_valid() {
            return Err(BrokerError::InvalidSubscribeMessage);
        }
        Ok(descriptor)
    }

    /// The 40-character lowercase hex SHA-1 digest that is the wire-visible
    /// `event_id` -- the only key used to route events.
    pub fn fingerprint(&self) -> String {
        fingerprint_parts(
            &self.db_name,
            &self.collection_name,
            self.object_id.as_deref(),
            self.field.as_deref(),
        )
    }
}

/// A general (non-DB-derived) event, identified only by its path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GeneralDescriptor {
    pub event_path: String,
}

impl GeneralDescriptor {
    pub fn new(event_path: impl Into<String>) -> Self {
        Self {
            event_path: event_path.into(),
        }
    }

    pub fn fingerprint(&self) -> String {
        sha1_hex(self.event_path.as_bytes())
    }
}

/// Validate a 24-hex-character document id and normalize it to lowercase.
pub fn parse_object_id(raw: &str) -> Result<String, BrokerError> {
    if raw.len() == 24 && raw.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(raw.to_ascii_lowercase())
    } else {
        Err(BrokerError::BadRequest(format!(
            "objectId is not a 24-hex-character id: {raw}"
        )))
    }
}

fn fingerprint_parts(
    db_name: &str,
    collection_name: &str,
    object_id: Option<&str>,
    field: Option<&str>,
) -> String {
    let object_id_str = object_id.unwrap_or("None");
    let field_str = field.unwrap_or("");
    let joined = format!("{db_name}:{collection_name}:{object_id_str}:{field_str}");
    sha1_hex(joined.as_bytes())
}

/// The collection-level fingerprint `(db, collection, None, "")`.
pub fn collection_fingerprint(db_name: &str, collection_name: &str) -> String {
    fingerprint_parts(db_name, collection_name, None, None)
}

/// The document-level fingerprint `(db, collection, object_id, "")`.
pub fn document_fingerprint(db_name: &str, collection_name: &str, object_id: &str) -> String {
    fingerprint_parts(db_name, collection_name, Some(object_id), None)
}

/// C1's `fingerprints_for_write`: the ordered set of fingerprints a write
/// touches.
///
/// If `object_id` is absent, or `fields` is absent/empty, the write only
/// affects the collection-level fingerprint (a single-element result).
/// Otherwise the collection-level and document-level fingerprints are
/// *always* emitted first, followed by one fingerprint per field, so that
/// broader subscriptions still fire on narrower writes.
pub fn fingerprints_for_write(
    db_name: &str,
    collection_name: &str,
    object_id: Option<&str>,
    fields: Option<&[String]>,
) -> Vec<String> {
    let fields = fields.filter(|f| !f.is_empty());
    match (object_id, fields) {
        (Some(object_id), Some(fields)) => {
            let mut out = Vec::with_capacity(fields.len() + 2);
            out.push(collection_fingerprint(db_name, collection_name));
            out.push(document_fingerprint(db_name, collection_name, object_id));
            for field in fields {
                out.push(fingerprint_parts(
                    db_name,
                    collection_name,
                    Some(object_id),
                    Some(field),
                ));
            }
            out
        }
        _ => vec![collection_fingerprint(db_name, collection_name)],
    }
}
