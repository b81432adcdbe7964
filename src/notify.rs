use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::limits::NOTIFY_CHANNEL_CAPACITY;
use crate::model::ChangeEvent;

/// Collection name for reservation changes.
pub const RESERVATIONS: &str = "reservations";

/// Broadcast hub for change notifications, one channel per collection.
pub struct NotifyHub {
    channels: DashMap<String, broadcast::Sender<ChangeEvent>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a collection. Creates the channel if needed.
    pub fn subscribe(&self, collection: &str) -> broadcast::Receiver<ChangeEvent> {
        let sender = self
            .channels
            .entry(collection.to_string())
            .or_insert_with(|| broadcast::channel(NOTIFY_CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, collection: &str, event: ChangeEvent) {
        if let Some(sender) = self.channels.get(collection) {
            let _ = sender.send(event);
        }
    }

    pub fn subscriber_count(&self, collection: &str) -> usize {
        self.channels
            .get(collection)
            .map_or(0, |s| s.receiver_count())
    }
}
