// broker-protocol: wire message types for the real-time database broadcaster.
//
// Every inbound message is a JSON object discriminated by a `type` field;
// every outbound message is a plain JSON object (no shared envelope type --
// each shape below is distinct on the wire, matching the original
// client_handler.py status dicts).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Frozen wire status codes for the four closed error classes.
pub mod status_codes {
    pub const BAD_REQUEST: u32 = 400;
    pub const INVALID_SUBSCRIBE_MESSAGE: u32 = 1001;
    pub const EVENT_NOT_FOUND: u32 = 1002;
    pub const INVALID_ACTION: u32 = 1003;
}

/// A client's subscribe/unsubscribe request, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InboundMessage {
    #[serde(rename = "db_subscribe")]
    DbSubscribe {
        db_name: String,
        collection_name: String,
        #[serde(default, rename = "objectId", skip_serializing_if = "Option::is_none")]
        object_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        field: Option<String>,
    },
    #[serde(rename = "general_subscribe")]
    GeneralSubscribe { event_path: String },
    #[serde(rename = "unsubscribe")]
    Unsubscribe { event_id: String },
    #[serde(rename = "unsubscribe_all")]
    UnsubscribeAll,
}

/// Everything the session ever writes back to the socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    Connected(Connected),
    Subscribed(Subscribed),
    DataChanged(DataChanged),
    DataPublished(DataPublished),
    Unsubscribed(Unsubscribed),
    UnsubscribedAll(UnsubscribedAll),
    Error(ErrorEnvelope),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connected {
    pub status: ConnectedStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectedStatus {
    #[serde(rename = "connected")]
    Connected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscribed {
    pub status: SubscribedStatus,
    pub event_id: String,
    pub data_hash: String,
    pub data: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscribedStatus {
    #[serde(rename = "subscribed")]
    Subscribed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataChanged {
    pub event_id: String,
    pub status: DataChangedStatus,
    pub data_hash: String,
    pub data: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataChangedStatus {
    #[serde(rename = "data changed")]
    DataChanged,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPublished {
    pub event_id: String,
    pub status: DataPublishedStatus,
    pub data: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataPublishedStatus {
    #[serde(rename = "data published")]
    DataPublished,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unsubscribed {
    pub status: UnsubscribedStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnsubscribedStatus {
    #[serde(rename = "unsubscribed")]
    Unsubscribed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnsubscribedAll {
    pub status: UnsubscribedAllStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnsubscribedAllStatus {
    #[serde(rename = "unsubscribed all")]
    UnsubscribedAll,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub status_code: u32,
    pub message: String,
}

impl OutboundMessage {
    pub fn connected() -> Self {
        OutboundMessage::Connected(Connected {
            status: ConnectedStatus::Connected,
        })
    }

    pub fn subscribed(event_id: String, data_hash: String, data: Value) -> Self {
        OutboundMessage::Subscribed(Subscribed {
            status: SubscribedStatus::Subscribed,
            event_id,
            data_hash,
            data,
        })
    }

    pub fn data_changed(event_id: String, data_hash: String, data: Value) -> Self {
        OutboundMessage::DataChanged(DataChanged {
            event_id,
            status: DataChangedStatus::DataChanged,
            data_hash,
            data,
        })
    }

    pub fn data_published(event_id: String, data: Value) -> Self {
        OutboundMessage::DataPublished(DataPublished {
            event_id,
            status: DataPublishedStatus::DataPublished,
            data,
        })
    }

    pub fn unsubscribed() -> Self {
        OutboundMessage::Unsubscribed(Unsubscribed {
            status: UnsubscribedStatus::Unsubscribed,
        })
    }

    pub fn unsubscribed_all() -> Self {
        OutboundMessage::UnsubscribedAll(UnsubscribedAll {
            status: UnsubscribedAllStatus::UnsubscribedAll,
        })
    }

    pub fn error(status_code: u32, message: impl Into<String>) -> Self {
        OutboundMessage::Error(ErrorEnvelope {
            status_code,
            message: message.into(),
        })
    }

    /// Serialize to the JSON text sent over the wire.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("OutboundMessage always serializes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_subscribe_parses_optional_fields() {
        let text = r#"{"type":"db_subscribe","db_name":"d","collection_name":"c","objectId":"507f1f77bcf86cd799439011","field":"items.0"}"#;
        let msg: InboundMessage = serde_json::from_str(text).unwrap();
        match msg {
            InboundMessage::DbSubscribe {
                db_name,
                collection_name,
                object_id,
                field,
            } => {
                assert_eq!(db_name, "d");
                assert_eq!(collection_name, "c");
                assert_eq!(object_id.as_deref(), Some("507f1f77bcf86cd799439011"));
                assert_eq!(field.as_deref(), Some("items.0"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn db_subscribe_without_optional_fields() {
        let text = r#"{"type":"db_subscribe","db_name":"d","collection_name":"c"}"#;
        let msg: InboundMessage = serde_json::from_str(text).unwrap();
        assert_eq!(
            msg,
            InboundMessage::DbSubscribe {
                db_name: "d".to_owned(),
                collection_name: "c".to_owned(),
                object_id: None,
                field: None,
            }
        );
    }

    #[test]
    fn unknown_type_fails_to_parse_as_bad_request_upstream() {
        let text = r#"{"type":"frobnicate"}"#;
        assert!(serde_json::from_str::<InboundMessage>(text).is_err());
    }

    #[test]
    fn subscribed_envelope_shape() {
        let msg = OutboundMessage::subscribed(
            "abc".to_owned(),
            "def".to_owned(),
            serde_json::json!({"x": 1}),
        );
        let json = msg.to_json();
        assert!(json.contains("\"status\":\"subscribed\""));
        assert!(json.contains("\"event_id\":\"abc\""));
    }

    #[test]
    fn unsubscribed_envelope_shape() {
        assert_eq!(
            OutboundMessage::unsubscribed().to_json(),
            r#"{"status":"unsubscribed"}"#
        );
    }

    #[test]
    fn unsubscribed_all_envelope_shape() {
        assert_eq!(
            OutboundMessage::unsubscribed_all().to_json(),
            r#"{"status":"unsubscribed all"}"#
        );
    }

    #[test]
    fn error_envelope_shape() {
        let msg = OutboundMessage::error(status_codes::INVALID_ACTION, "Invalid Action");
        let json = msg.to_json();
        assert_eq!(
            json,
            r#"{"status_code":1003,"message":"Invalid Action"}"#
        );
    }
}
