//! A real-time database broadcaster: a websocket pub/sub broker that sits in
//! front of a document store and pushes change notifications to subscribed
//! clients, plus a general-purpose publish path for events that aren't tied
//! to any document write at all.
//!
//! [`AppState`] is the one shared handle the whole service runs on: a
//! document store (wrapped in a [`writer::WriteInterceptor`] so every
//! mutation through it fans out fingerprints), the [`queue::BroadcastQueue`]
//! those fingerprints travel through, and a [`publisher::GeneralPublisher`]
//! for the non-DB publish path.

pub mod canonical;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod health;
pub mod publisher;
pub mod queue;
pub mod resolver;
pub mod session;
pub mod store;
pub mod writer;

use axum::routing::get;
use axum::Router;
use publisher::GeneralPublisher;
use queue::BroadcastQueue;
use std::sync::Arc;
use store::DocumentStore;
use tower_http::cors::CorsLayer;
use writer::WriteInterceptor;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub queue: Arc<BroadcastQueue>,
    pub publisher: GeneralPublisher,
}

impl AppState {
    /// Build state around a raw store, wrapping it in the write interceptor
    /// so writes made through `state.store` publish fingerprints.
    pub fn new(raw_store: Arc<dyn DocumentStore>, config: &config::Config) -> Self {
        let queue = Arc::new(BroadcastQueue::new(config.queue_size, config.mailbox_capacity));
        let store: Arc<dyn DocumentStore> =
            Arc::new(WriteInterceptor::new(raw_store, Arc::clone(&queue)));
        let publisher = GeneralPublisher::new(Arc::clone(&queue));
        Self { store, queue, publisher }
    }
}

/// Wire the websocket route and the liveness/readiness endpoints onto one
/// router. `ws_path` is configurable since deployments front this with
/// different reverse-proxy path prefixes. Origin checks are permissive by
/// default, matching the original broadcaster's lack of any origin check at
/// all; `config.allow_any_origin = false` tightens this to same-origin.
pub fn build_router(state: AppState, config: &config::Config) -> Router {
    let cors = if config.allow_any_origin {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
    };
    Router::new()
        .route(&config.ws_path, get(session::ws_handler))
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::store::InMemoryStore;

    #[test]
    fn app_state_constructs_without_panicking() {
        let config = Config::from_env();
        let state = AppState::new(Arc::new(InMemoryStore::new()), &config);
        let _router = build_router(state, &config);
    }
}
