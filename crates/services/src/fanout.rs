//! Fire-and-forget event emission.
//!
//! Every call here happens after the mutation it describes has committed.
//! Failures are logged and swallowed: the caller's result never depends on
//! whether a subscriber was reachable.

use std::sync::Arc;

use domains::{EventPublisher, RealtimeEvent, Room};
use serde::Serialize;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct Fanout {
    publisher: Arc<dyn EventPublisher>,
}

impl Fanout {
    pub fn new(publisher: Arc<dyn EventPublisher>) -> Self {
        Self { publisher }
    }

    pub fn to_room(&self, room: Room, event: &str, payload: &impl Serialize) {
        let result =
            RealtimeEvent::new(event, payload).and_then(|e| self.publisher.publish(&room, &e));
        match result {
            Ok(reached) => debug!(%room, event, reached, "event published"),
            Err(err) => warn!(%room, event, error = %err, "realtime publish failed"),
        }
    }

    pub fn global(&self, event: &str, payload: &impl Serialize) {
        let result =
            RealtimeEvent::new(event, payload).and_then(|e| self.publisher.publish_global(&e));
        match result {
            Ok(reached) => debug!(event, reached, "global event published"),
            Err(err) => warn!(event, error = %err, "realtime global publish failed"),
        }
    }

    /// Room delivery plus a global copy for listing pages.
    pub fn to_room_and_global(&self, room: Room, event: &str, payload: &impl Serialize) {
        self.to_room(room, event, payload);
        self.global(event, payload);
    }
}
