use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// A message delivered over the [`MessageBus`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BusMessage {
    pub sender_id: String,
    pub payload: serde_json::Value,
}

/// In-process message bus between agents, keyed by receiver id.
/// Every subscriber of a receiver id gets every message sent to it.
pub struct MessageBus {
    channels: Mutex<HashMap<String, broadcast::Sender<BusMessage>>>,
    capacity: usize,
}

impl MessageBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<String, broadcast::Sender<BusMessage>>> {
        self.channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Deliver a message to every current subscriber of `receiver_id`.
    /// Messages for a receiver nobody has subscribed to are dropped.
    pub fn send(&self, sender_id: &str, receiver_id: &str, payload: serde_json::Value) {
        let Some(tx) = self.channels().get(receiver_id).cloned() else {
            return;
        };
        let message = BusMessage {
            sender_id: sender_id.to_string(),
            payload,
        };
        // Ignore error if every receiver has been dropped
        let _ = tx.send(message);
    }

    /// Send a message on behalf of the `system` sender.
    pub fn publish(&self, receiver_id: &str, payload: serde_json::Value) {
        self.send("system", receiver_id, payload);
    }

    pub fn subscribe(&self, receiver_id: &str) -> broadcast::Receiver<BusMessage> {
        self.channels()
            .entry(receiver_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Number of receiver ids that have been subscribed to.
    pub fn channel_count(&self) -> usize {
        self.channels().len()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_send_reaches_receiver() {
        let bus = MessageBus::default();
        let mut rx = bus.subscribe("agent-b");

        bus.send("agent-a", "agent-b", json!({ "text": "hello" }));

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.sender_id, "agent-a");
        assert_eq!(msg.payload, json!({ "text": "hello" }));
    }

    #[tokio::test]
    async fn test_messages_are_scoped_by_receiver() {
        let bus = MessageBus::default();
        let mut rx_b = bus.subscribe("b");
        let mut rx_c = bus.subscribe("c");

        bus.publish("c", json!("ping"));

        let msg = rx_c.recv().await.unwrap();
        assert_eq!(msg.sender_id, "system");
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn test_send_without_subscribers_is_dropped() {
        let bus = MessageBus::default();
        bus.send("a", "nobody", json!(1));
        bus.publish("also-nobody", json!(2));
        assert_eq!(bus.channel_count(), 0);

        let mut rx = bus.subscribe("nobody");
        assert!(rx.try_recv().is_err());
        assert_eq!(bus.channel_count(), 1);
    }
}
