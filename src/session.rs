//! C3: the client session. One task per connected websocket, holding that
//! session's private subscription table (`fingerprint -> last known state`)
//! and running the request/dispatch loop that services both inbound client
//! messages and inbound broadcast events.

use crate::descriptor::{GeneralDescriptor, SubscriptionDescriptor};
use crate::error::BrokerError;
use crate::queue::SessionEvent;
use crate::resolver::{self, Slice};
use crate::store::DocumentStore;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use broker_protocol::{InboundMessage, OutboundMessage};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::AppState;

/// One subscription's remembered state, keyed by its fingerprint in the
/// session's local table.
enum Subscription {
    Db {
        descriptor: SubscriptionDescriptor,
        data_hash: String,
    },
    General {
        descriptor: GeneralDescriptor,
    },
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (session_id, mut mailbox_rx) = state.queue.register().await;
    info!(%session_id, "session connected");

    let (mut sink, mut stream) = socket.split();
    if sink
        .send(Message::Text(OutboundMessage::connected().to_json().into()))
        .await
        .is_err()
    {
        state.queue.unregister(session_id).await;
        return;
    }

    let mut subscriptions: HashMap<String, Subscription> = HashMap::new();

    loop {
        tokio::select! {
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let reply = handle_inbound(
                            &text,
                            &state.store,
                            &mut subscriptions,
                        )
                        .await;
                        if sink.send(Message::Text(reply.to_json().into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {
                        // Binary/ping/pong frames carry no protocol meaning here.
                    }
                    Some(Err(err)) => {
                        warn!(%session_id, error = %err, "websocket read error");
                        break;
                    }
                }
            }
            event = mailbox_rx.recv() => {
                match event {
                    Some(event) => {
                        if let Some(reply) = handle_broadcast(event, &state.store, &mut subscriptions).await {
                            if sink.send(Message::Text(reply.to_json().into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    None => break,
                }
            }
        }
    }

    state.queue.unregister(session_id).await;
    info!(%session_id, "session disconnected");
}

/// Parse one inbound frame by hand for the `type` field first, rather than
/// going straight to `serde_json::from_str::<InboundMessage>`, so a missing
/// body or unrecognized `type` (`BadRequest`/`InvalidAction`) gets its
/// distinct wire status code instead of collapsing into one generic decode
/// error; a recognized `type` is then decoded through the real wire type.
async fn handle_inbound(
    text: &str,
    store: &Arc<dyn DocumentStore>,
    subscriptions: &mut HashMap<String, Subscription>,
) -> OutboundMessage {
    match dispatch_inbound(text, store, subscriptions).await {
        Ok(reply) => reply,
        Err(err) => err.to_outbound(),
    }
}

async fn dispatch_inbound(
    text: &str,
    store: &Arc<dyn DocumentStore>,
    subscriptions: &mut HashMap<String, Subscription>,
) -> Result<OutboundMessage, BrokerError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| BrokerError::BadRequest(format!("invalid JSON: {e}")))?;
    let action = value
        .as_object()
        .and_then(|obj| obj.get("type"))
        .and_then(Value::as_str)
        .ok_or_else(|| BrokerError::BadRequest("missing field: type".to_owned()))?;

    match action {
        "db_subscribe" | "general_subscribe" | "unsubscribe" | "unsubscribe_all" => {}
        _ => return Err(BrokerError::InvalidAction),
    }

    let message: InboundMessage = serde_json::from_value(value)
        .map_err(|e| BrokerError::BadRequest(format!("invalid message: {e}")))?;

    match message {
        InboundMessage::DbSubscribe {
            db_name,
            collection_name,
            object_id,
            field,
        } => db_subscribe(db_name, collection_name, object_id, field, store, subscriptions).await,
        InboundMessage::GeneralSubscribe { event_path } => {
            general_subscribe(event_path, subscriptions)
        }
        InboundMessage::Unsubscribe { event_id } => unsubscribe(event_id, subscriptions),
        InboundMessage::UnsubscribeAll => {
            subscriptions.clear();
            Ok(OutboundMessage::unsubscribed_all())
        }
    }
}

async fn db_subscribe(
    db_name: String,
    collection_name: String,
    object_id: Option<String>,
    field: Option<String>,
    store: &Arc<dyn DocumentStore>,
    subscriptions: &mut HashMap<String, Subscription>,
) -> Result<OutboundMessage, BrokerError> {
    let descriptor = SubscriptionDescriptor::from_raw(db_name, collection_name, object_id, field)?;
    let fingerprint = descriptor.fingerprint();
    let slice = resolver::resolve(&descriptor, store.as_ref())
        .await
        .map_err(|e| BrokerError::Store(e.to_string()))?;
    let data = slice_to_value(slice);
    let data_hash = crate::canonical::data_hash(&data);

    subscriptions.insert(
        fingerprint.clone(),
        Subscription::Db {
            descriptor,
            data_hash: data_hash.clone(),
        },
    );
    debug!(%fingerprint, "db_subscribe registered");
    Ok(OutboundMessage::subscribed(fingerprint, data_hash, data))
}

fn general_subscribe(
    event_path: String,
    subscriptions: &mut HashMap<String, Subscription>,
) -> Result<OutboundMessage, BrokerError> {
    let descriptor = GeneralDescriptor::new(event_path);
    let fingerprint = descriptor.fingerprint();
    let data_hash = String::new();
    subscriptions.insert(fingerprint.clone(), Subscription::General { descriptor });
    Ok(OutboundMessage::subscribed(fingerprint, data_hash, Value::Null))
}

fn unsubscribe(
    event_id: String,
    subscriptions: &mut HashMap<String, Subscription>,
) -> Result<OutboundMessage, BrokerError> {
    if subscriptions.remove(&event_id).is_none() {
        return Err(BrokerError::EventNotFound);
    }
    Ok(OutboundMessage::unsubscribed())
}

/// Handle one fan-in event from the broadcast queue. Returns `None` when the
/// event doesn't concern this session, or concerns a `db_subscribe`d slice
/// whose re-resolved data is unchanged (suppressed, not forwarded).
///
/// Dispatch is keyed on the event's *shape*, not on how this session
/// subscribed: an event carrying a payload (a general publish, or a delete's
/// document-level notice) is always forwarded verbatim, even to a
/// `db_subscribe`d entry; only a bare fingerprint triggers the resolve/diff
/// path.
async fn handle_broadcast(
    event: SessionEvent,
    store: &Arc<dyn DocumentStore>,
    subscriptions: &mut HashMap<String, Subscription>,
) -> Option<OutboundMessage> {
    let subscription = subscriptions.get_mut(&event.fingerprint)?;
    if let Some(data) = event.payload {
        return Some(OutboundMessage::data_published(event.fingerprint, data));
    }
    match subscription {
        Subscription::General { .. } => None,
        Subscription::Db { descriptor, data_hash } => {
            let slice = resolver::resolve(descriptor, store.as_ref()).await.ok()?;
            let data = slice_to_value(slice);
            let new_hash = crate::canonical::data_hash(&data);
            if new_hash == *data_hash {
                return None;
            }
            *data_hash = new_hash.clone();
            Some(OutboundMessage::data_changed(event.fingerprint, new_hash, data))
        }
    }
}

fn slice_to_value(slice: Slice) -> Value {
    slice.into_value()
}
