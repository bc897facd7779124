//! C4 (broadcast queue) + C7 (session registry).
//!
//! A single `BroadcastQueue` fans fingerprint events out to every registered
//! session. The dispatcher task is lazily started by the first registration
//! and stopped by the last deregistration, mirroring the Python original's
//! `BroadcastingQueue` thread lifecycle -- there is no point running a
//! dispatch loop with nobody listening.

use crate::descriptor::GeneralDescriptor;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

pub type SessionId = Uuid;

/// An item traveling through the broadcast queue: a fingerprint, optionally
/// carrying the payload a general-purpose publish attaches directly (so
/// subscribers of general events don't need a resolver round-trip). `Stop` is
/// the sentinel that ends the dispatcher loop.
#[derive(Debug, Clone)]
enum QueueEvent {
    Fingerprint { fingerprint: String, payload: Option<Value> },
    Stop,
}

/// A session's inbox. The dispatcher pushes into it; the session's
/// websocket-write task reads from it. Bounded so that a slow client applies
/// backpressure to its own mailbox without blocking the whole broker.
pub struct SessionHandle {
    pub sender: mpsc::Sender<SessionEvent>,
}

/// What a session actually receives: a routed fingerprint plus whatever
/// payload (if any) the publisher attached.
#[derive(Debug, Clone)]
pub struct SessionEvent {
    pub fingerprint: String,
    pub payload: Option<Value>,
}

struct Dispatcher {
    sender: mpsc::Sender<QueueEvent>,
}

/// The shared broadcast hub: one per broker process. Fingerprints published
/// here are fanned out to every currently-registered session's mailbox.
///
/// `mailboxes`, `dispatcher` and `registered` are each held behind their own
/// `Arc` (rather than being plain fields behind one) so the dispatch loop --
/// a detached task, not a method on `&self` -- can share them directly: a
/// session whose delivery fails is removed from the registry by the loop
/// itself, which must keep `registered` and the dispatcher's lifecycle in
/// sync with that removal the same way `unregister` does.
pub struct BroadcastQueue {
    mailboxes: Arc<RwLock<HashMap<SessionId, SessionHandle>>>,
    dispatcher: Arc<Mutex<Option<Dispatcher>>>,
    queue_size: usize,
    mailbox_capacity: usize,
    registered: Arc<AtomicU64>,
}

impl BroadcastQueue {
    pub fn new(queue_size: usize, mailbox_capacity: usize) -> Self {
        Self {
            mailboxes: Arc::new(RwLock::new(HashMap::new())),
            dispatcher: Arc::new(Mutex::new(None)),
            queue_size,
            mailbox_capacity,
            registered: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Register a new session, lazily starting the dispatcher if this is the
    /// first registration. Returns the session's id and its mailbox
    /// receiver.
    pub async fn register(&self) -> (SessionId, mpsc::Receiver<SessionEvent>) {
        let session_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.mailbox_capacity);
        {
            let mut mailboxes = self.mailboxes.write().await;
            mailboxes.insert(session_id, SessionHandle { sender: tx });
        }
        if self.registered.fetch_add(1, Ordering::SeqCst) == 0 {
            self.start_dispatcher().await;
        }
        (session_id, rx)
    }

    /// Deregister a session, stopping the dispatcher if it was the last one.
    pub async fn unregister(&self, session_id: SessionId) {
        let removed = {
            let mut mailboxes = self.mailboxes.write().await;
            mailboxes.remove(&session_id).is_some()
        };
        if removed && self.registered.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.stop_dispatcher().await;
        }
    }

    /// The number of currently-registered sessions. Used by tests to observe
    /// deregistration; not otherwise load-bearing.
    pub async fn session_count(&self) -> usize {
        self.mailboxes.read().await.len()
    }

    /// Publish a bare fingerprint (the DB write-path case: every subscriber
    /// re-resolves and re-hashes for itself).
    pub async fn publish(&self, fingerprint: String) {
        self.publish_event(QueueEvent::Fingerprint {
            fingerprint,
            payload: None,
        })
        .await;
    }

    /// Publish a fingerprint carrying its payload directly (the
    /// general-publish case: there is nothing to re-resolve).
    pub async fn publish_with_payload(&self, fingerprint: String, payload: Value) {
        self.publish_event(QueueEvent::Fingerprint {
            fingerprint,
            payload: Some(payload),
        })
        .await;
    }

    async fn publish_event(&self, event: QueueEvent) {
        let dispatcher = self.dispatcher.lock().await;
        if let Some(dispatcher) = dispatcher.as_ref() {
            // A full queue means the dispatcher is backed up; block rather
            // than drop, matching the original's blocking queue semantics.
            if dispatcher.sender.send(event).await.is_err() {
                warn!("broadcast queue dispatcher is gone; dropping publish");
            }
        }
    }

    async fn start_dispatcher(&self) {
        let (tx, rx) = mpsc::channel(self.queue_size);
        {
            let mut slot = self.dispatcher.lock().await;
            *slot = Some(Dispatcher { sender: tx });
        }
        let mailboxes = Arc::clone(&self.mailboxes);
        let dispatcher = Arc::clone(&self.dispatcher);
        let registered = Arc::clone(&self.registered);
        tokio::spawn(dispatch_loop(rx, mailboxes, dispatcher, registered));
    }

    async fn stop_dispatcher(&self) {
        let dispatcher = self.dispatcher.lock().await.take();
        if let Some(dispatcher) = dispatcher {
            let _ = dispatcher.sender.send(QueueEvent::Stop).await;
        }
    }
}

/// The dispatcher loop: pop one event, snapshot the current session set,
/// deliver to each. A session whose mailbox has filled up or hung up is
/// removed from the registry -- a dead mailbox is never retried, and it
/// would otherwise silently fail every future delivery forever. If that
/// removal drops the registered count to zero, the loop stops itself and
/// clears the dispatcher slot, the same bookkeeping `unregister` does for an
/// orderly disconnect, so the next `register()` starts a fresh dispatcher
/// rather than finding a stale, already-dead one in the slot.
async fn dispatch_loop(
    mut rx: mpsc::Receiver<QueueEvent>,
    mailboxes: Arc<RwLock<HashMap<SessionId, SessionHandle>>>,
    dispatcher: Arc<Mutex<Option<Dispatcher>>>,
    registered: Arc<AtomicU64>,
) {
    while let Some(event) = rx.recv().await {
        let (fingerprint, payload) = match event {
            QueueEvent::Fingerprint { fingerprint, payload } => (fingerprint, payload),
            QueueEvent::Stop => break,
        };
        debug!(%fingerprint, "dispatching fingerprint");

        // Snapshot, not a held lock, so sends never happen under the
        // registry lock and a register/unregister during delivery never
        // deadlocks with this loop.
        let snapshot: Vec<(SessionId, mpsc::Sender<SessionEvent>)> = {
            let guard = mailboxes.read().await;
            guard
                .iter()
                .map(|(id, handle)| (*id, handle.sender.clone()))
                .collect()
        };

        let mut failed = Vec::new();
        for (session_id, sender) in snapshot {
            let event = SessionEvent {
                fingerprint: fingerprint.clone(),
                payload: payload.clone(),
            };
            if sender.try_send(event).is_err() {
                warn!(%session_id, "session mailbox full or closed; deregistering");
                failed.push(session_id);
            }
        }

        if failed.is_empty() {
            continue;
        }

        let removed = {
            let mut guard = mailboxes.write().await;
            failed
                .into_iter()
                .filter(|session_id| guard.remove(session_id).is_some())
                .count()
        };
        if removed == 0 {
            continue;
        }
        let remaining = registered.fetch_sub(removed as u64, Ordering::SeqCst) - removed as u64;
        if remaining == 0 {
            dispatcher.lock().await.take();
            break;
        }
    }
}

/// Convenience wrapper used by general (non-DB) publishers: hash the event
/// path and push its payload straight through the queue.
pub async fn publish_general(queue: &BroadcastQueue, event_path: &str, data: Value) {
    let descriptor = GeneralDescriptor::new(event_path);
    queue
        .publish_with_payload(descriptor.fingerprint(), data)
        .await;
}
