//! In-process event fan-out.
//!
//! Producers publish a stored event only after the event store append has
//! returned; the two together form the commit of an event (see
//! [`crate::runtime::commit`]). Each subscription is a bounded broadcast
//! receiver; overflow surfaces as `Lagged` and the subscription session
//! recovers by replaying from the store.

use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use mc_domain::event::StoredEvent;

pub struct EventBus {
    /// Per-subscription buffer size before lag.
    buffer: usize,
    /// Per-mission channels, created on first publish or subscribe.
    channels: RwLock<HashMap<String, broadcast::Sender<StoredEvent>>>,
    /// Firehose of every mission's events.
    global: broadcast::Sender<StoredEvent>,
}

impl EventBus {
    pub fn new(buffer: usize) -> Self {
        let (global, _) = broadcast::channel(buffer.max(1));
        Self {
            buffer: buffer.max(1),
            channels: RwLock::new(HashMap::new()),
            global,
        }
    }

    fn sender_for(&self, mission_id: &str) -> broadcast::Sender<StoredEvent> {
        if let Some(tx) = self.channels.read().get(mission_id) {
            return tx.clone();
        }
        let mut channels = self.channels.write();
        channels
            .entry(mission_id.to_owned())
            .or_insert_with(|| broadcast::channel(self.buffer).0)
            .clone()
    }

    /// Deliver a committed event to mission and global subscribers.
    /// Send errors mean "no subscribers" and are not failures.
    pub fn publish(&self, event: &StoredEvent) {
        let _ = self.sender_for(&event.mission_id).send(event.clone());
        let _ = self.global.send(event.clone());
    }

    /// Tail one mission's events from this moment on.
    pub fn subscribe_mission(&self, mission_id: &str) -> broadcast::Receiver<StoredEvent> {
        self.sender_for(mission_id).subscribe()
    }

    /// Tail every mission's events from this moment on.
    pub fn subscribe_all(&self) -> broadcast::Receiver<StoredEvent> {
        self.global.subscribe()
    }

    /// Drop the channel of a mission that will produce no more events.
    pub fn cleanup(&self, mission_id: &str) {
        self.channels.write().remove(mission_id);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mc_domain::event::EventType;
    use uuid::Uuid;

    fn event(mission_id: &str, sequence: i64) -> StoredEvent {
        StoredEvent {
            id: sequence,
            mission_id: mission_id.into(),
            sequence,
            timestamp: Utc::now(),
            event_type: EventType::TextDelta,
            event_id: Uuid::new_v4(),
            tool_call_id: None,
            tool_name: None,
            content: format!("e{sequence}"),
            metadata: Default::default(),
        }
    }

    #[tokio::test]
    async fn mission_subscribers_see_only_their_mission() {
        let bus = EventBus::new(16);
        let mut rx_a = bus.subscribe_mission("a");
        let mut rx_all = bus.subscribe_all();

        bus.publish(&event("a", 1));
        bus.publish(&event("b", 1));

        let got = rx_a.recv().await.unwrap();
        assert_eq!(got.mission_id, "a");
        assert!(rx_a.try_recv().is_err());

        // The global channel carries both.
        assert_eq!(rx_all.recv().await.unwrap().mission_id, "a");
        assert_eq!(rx_all.recv().await.unwrap().mission_id, "b");
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_fine() {
        let bus = EventBus::new(16);
        bus.publish(&event("quiet", 1));
    }

    #[tokio::test]
    async fn overflow_surfaces_as_lagged() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe_mission("m");

        for i in 1..=5 {
            bus.publish(&event("m", i));
        }

        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(missed)) => assert!(missed > 0),
            other => panic!("expected lag, got {other:?}"),
        }
        // After the lag the receiver resumes with the retained tail.
        let next = rx.recv().await.unwrap();
        assert!(next.sequence > 2);
    }

    #[tokio::test]
    async fn subscribe_after_publish_misses_history() {
        let bus = EventBus::new(16);
        bus.publish(&event("m", 1));
        let mut rx = bus.subscribe_mission("m");
        bus.publish(&event("m", 2));
        assert_eq!(rx.recv().await.unwrap().sequence, 2);
    }
}
