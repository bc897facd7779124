//! C6: the general-purpose publisher -- the escape hatch for events that
//! don't come from a document write at all (e.g. application-level alerts).
//! Any caller holding a handle can publish under an arbitrary path string;
//! there is no notion of a "collection" here, only the path itself.

use crate::descriptor::GeneralDescriptor;
use crate::queue::BroadcastQueue;
use serde_json::Value;
use std::sync::Arc;

#[derive(Clone)]
pub struct GeneralPublisher {
    queue: Arc<BroadcastQueue>,
}

impl GeneralPublisher {
    pub fn new(queue: Arc<BroadcastQueue>) -> Self {
        Self { queue }
    }

    /// Publish `data` under `event_path`. Every session subscribed to that
    /// path (via `general_subscribe`) receives a `data published` message
    /// carrying `data` verbatim -- there is no resolver round-trip, since a
    /// general event has no backing store to re-read.
    pub async fn publish(&self, event_path: &str, data: Value) {
        let descriptor = GeneralDescriptor::new(event_path);
        self.queue
            .publish_with_payload(descriptor.fingerprint(), data)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn publish_reaches_a_registered_session_with_its_fingerprint_and_data() {
        let queue = Arc::new(BroadcastQueue::new(16, 16));
        let (_id, mut rx) = queue.register().await;
        let publisher = GeneralPublisher::new(queue);

        publisher.publish("alerts/core", json!({"level": "warn"})).await;

        let event = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert_eq!(event.fingerprint, GeneralDescriptor::new("alerts/core").fingerprint());
        assert_eq!(event.payload, Some(json!({"level": "warn"})));
    }
}
