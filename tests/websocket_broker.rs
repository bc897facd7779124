//! End-to-end coverage driven over a real TCP socket: boot the router,
//! connect with a websocket client, exercise subscribe/publish/unsubscribe
//! the way an actual client would.

use db_broadcaster::config::Config;
use db_broadcaster::store::InMemoryStore;
use db_broadcaster::{build_router, AppState};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

async fn spawn_server() -> (std::net::SocketAddr, AppState) {
    let mut config = Config::from_env();
    config.ws_path = "/webs".to_owned();
    let state = AppState::new(Arc::new(InMemoryStore::new()), &config);
    let router = build_router(state.clone(), &config);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (addr, state)
}

async fn connect(
    addr: std::net::SocketAddr,
) -> tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>
{
    let url = format!("ws://{addr}/webs");
    let (socket, _response) = tokio_tungstenite::connect_async(url).await.unwrap();
    socket
}

async fn recv_json(
    socket: &mut tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
) -> Value {
    let msg = timeout(Duration::from_secs(2), socket.next())
        .await
        .expect("timed out waiting for a message")
        .expect("stream ended")
        .expect("websocket error");
    match msg {
        Message::Text(text) => serde_json::from_str(&text).expect("valid JSON"),
        other => panic!("expected a text frame, got {other:?}"),
    }
}

#[tokio::test]
async fn connecting_sends_a_connected_envelope() {
    let (addr, _state) = spawn_server().await;
    let mut socket = connect(addr).await;
    let greeting = recv_json(&mut socket).await;
    assert_eq!(greeting, json!({"status": "connected"}));
}

#[tokio::test]
async fn subscribe_then_insert_delivers_a_data_changed_push() {
    let (addr, state) = spawn_server().await;
    let mut socket = connect(addr).await;
    let _greeting = recv_json(&mut socket).await;

    socket
        .send(Message::Text(
            json!({"type": "db_subscribe", "db_name": "d", "collection_name": "c"})
                .to_string()
                .into(),
        ))
        .await
        .unwrap();
    let subscribed = recv_json(&mut socket).await;
    assert_eq!(subscribed["status"], "subscribed");
    assert_eq!(subscribed["data"], json!([]));

    state
        .store
        .insert_one("d", "c", json!({"x": 1}).as_object().unwrap().clone())
        .await
        .unwrap();

    let changed = recv_json(&mut socket).await;
    assert_eq!(changed["status"], "data changed");
    assert_eq!(changed["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn two_clients_subscribed_to_the_same_slice_both_receive_the_change() {
    let (addr, state) = spawn_server().await;
    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    let _ = recv_json(&mut a).await;
    let _ = recv_json(&mut b).await;

    let subscribe = json!({"type": "db_subscribe", "db_name": "d", "collection_name": "c"})
        .to_string();
    a.send(Message::Text(subscribe.clone().into())).await.unwrap();
    b.send(Message::Text(subscribe.into())).await.unwrap();
    let _ = recv_json(&mut a).await;
    let _ = recv_json(&mut b).await;

    state
        .store
        .insert_one("d", "c", json!({"x": 1}).as_object().unwrap().clone())
        .await
        .unwrap();

    let changed_a = recv_json(&mut a).await;
    let changed_b = recv_json(&mut b).await;
    assert_eq!(changed_a["status"], "data changed");
    assert_eq!(changed_b["status"], "data changed");
    assert_eq!(changed_a["event_id"], changed_b["event_id"]);
}

#[tokio::test]
async fn general_subscribe_then_publish_delivers_data_published() {
    let (addr, state) = spawn_server().await;
    let mut socket = connect(addr).await;
    let _ = recv_json(&mut socket).await;

    socket
        .send(Message::Text(
            json!({"type": "general_subscribe", "event_path": "alerts/core"})
                .to_string()
                .into(),
        ))
        .await
        .unwrap();
    let subscribed = recv_json(&mut socket).await;
    assert_eq!(subscribed["status"], "subscribed");

    state
        .publisher
        .publish("alerts/core", json!({"level": "warn"}))
        .await;

    let published = recv_json(&mut socket).await;
    assert_eq!(published["status"], "data published");
    assert_eq!(published["data"], json!({"level": "warn"}));
}

#[tokio::test]
async fn unknown_action_returns_invalid_action_error() {
    let (addr, _state) = spawn_server().await;
    let mut socket = connect(addr).await;
    let _ = recv_json(&mut socket).await;

    socket
        .send(Message::Text(json!({"type": "frobnicate"}).to_string().into()))
        .await
        .unwrap();
    let error = recv_json(&mut socket).await;
    assert_eq!(error["status_code"], 1003);
}

#[tokio::test]
async fn malformed_json_returns_bad_request_error() {
    let (addr, _state) = spawn_server().await;
    let mut socket = connect(addr).await;
    let _ = recv_json(&mut socket).await;

    socket
        .send(Message::Text("not json at all".to_owned().into()))
        .await
        .unwrap();
    let error = recv_json(&mut socket).await;
    assert_eq!(error["status_code"], 400);
}

#[tokio::test]
async fn unsubscribe_of_unknown_event_returns_event_not_found() {
    let (addr, _state) = spawn_server().await;
    let mut socket = connect(addr).await;
    let _ = recv_json(&mut socket).await;

    socket
        .send(Message::Text(
            json!({"type": "unsubscribe", "event_id": "deadbeef"}).to_string().into(),
        ))
        .await
        .unwrap();
    let error = recv_json(&mut socket).await;
    assert_eq!(error["status_code"], 1002);
}

#[tokio::test]
async fn unsubscribe_all_on_a_fresh_session_silently_succeeds() {
    let (addr, _state) = spawn_server().await;
    let mut socket = connect(addr).await;
    let _ = recv_json(&mut socket).await;

    socket
        .send(Message::Text(json!({"type": "unsubscribe_all"}).to_string().into()))
        .await
        .unwrap();
    let reply = recv_json(&mut socket).await;
    assert_eq!(reply["status"], "unsubscribed all");
}

#[tokio::test]
async fn delete_notifies_both_collection_and_document_subscribers() {
    let (addr, state) = spawn_server().await;
    let id = state
        .store
        .insert_one("d", "c", json!({"x": 1}).as_object().unwrap().clone())
        .await
        .unwrap()
        .inserted_id
        .unwrap();

    let mut collection_sub = connect(addr).await;
    let _ = recv_json(&mut collection_sub).await;
    collection_sub
        .send(Message::Text(
            json!({"type": "db_subscribe", "db_name": "d", "collection_name": "c"})
                .to_string()
                .into(),
        ))
        .await
        .unwrap();
    let _ = recv_json(&mut collection_sub).await;

    let mut document_sub = connect(addr).await;
    let _ = recv_json(&mut document_sub).await;
    document_sub
        .send(Message::Text(
            json!({
                "type": "db_subscribe",
                "db_name": "d",
                "collection_name": "c",
                "objectId": id,
            })
            .to_string()
            .into(),
        ))
        .await
        .unwrap();
    let _ = recv_json(&mut document_sub).await;

    use db_broadcaster::store::Document;
    let mut filter = Document::new();
    filter.insert("_id".to_owned(), Value::String(id.clone()));
    state.store.delete_one("d", "c", &filter).await.unwrap();

    let collection_change = recv_json(&mut collection_sub).await;
    let document_change = recv_json(&mut document_sub).await;
    assert_eq!(collection_change["status"], "data changed");
    assert_eq!(document_change["status"], "data published");
    assert_eq!(document_change["data"], json!({"deleted_id": id}));
}
