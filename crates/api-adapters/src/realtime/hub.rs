//! # Room Hub
//!
//! Tracks live connections and their room memberships, and implements the
//! `EventPublisher` port on top of them.
//!
//! Each connection owns an unbounded queue drained by its socket task, so a
//! publish never waits on a slow client and events from one publisher reach
//! a given connection in the order they were published.

use std::collections::HashSet;

use dashmap::DashMap;
use domains::{DomainError, EventPublisher, RealtimeEvent, Result, Room};
use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

pub type ConnectionId = Uuid;

#[derive(Default)]
pub struct RoomHub {
    connections: DashMap<ConnectionId, mpsc::UnboundedSender<String>>,
    rooms: DashMap<Room, HashSet<ConnectionId>>,
    memberships: DashMap<ConnectionId, HashSet<Room>>,
    /// User each authenticated connection speaks for
    identities: DashMap<ConnectionId, Uuid>,
}

impl RoomHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection and returns the queue its socket task drains.
    pub fn connect(&self, id: ConnectionId) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.insert(id, tx);
        debug!(connection_id = %id, "connection registered");
        rx
    }

    /// Drops the connection's queue, then leaves every room.
    ///
    /// The queue goes first: `join` re-checks it after recording a
    /// membership, so a join racing this call is undone by one side or the
    /// other.
    pub fn disconnect(&self, id: ConnectionId) {
        self.connections.remove(&id);
        self.identities.remove(&id);
        if let Some((_, rooms)) = self.memberships.remove(&id) {
            for room in rooms {
                self.remove_member(&room, id);
            }
        }
        debug!(connection_id = %id, "connection dropped");
    }

    pub fn join(&self, id: ConnectionId, room: Room) {
        if !self.connections.contains_key(&id) {
            return;
        }
        self.rooms.entry(room).or_default().insert(id);
        self.memberships.entry(id).or_default().insert(room);
        if !self.connections.contains_key(&id) {
            self.leave(id, room);
            self.memberships.remove_if(&id, |_, rooms| rooms.is_empty());
            return;
        }
        debug!(connection_id = %id, %room, "joined room");
    }

    /// Binds the connection to `user`, moving it out of the room of any user
    /// it was bound to before. `None` drops the binding.
    pub fn identify(&self, id: ConnectionId, user: Option<Uuid>) {
        let previous = match user {
            Some(user_id) if self.connections.contains_key(&id) => {
                self.identities.insert(id, user_id)
            }
            Some(_) => return,
            None => self.identities.remove(&id).map(|(_, old)| old),
        };
        if let Some(old) = previous.filter(|old| Some(*old) != user) {
            self.leave(id, Room::User(old));
        }
        if let Some(user_id) = user {
            self.join(id, Room::User(user_id));
            if !self.connections.contains_key(&id) {
                self.identities.remove(&id);
            }
        }
    }

    pub fn identity(&self, id: ConnectionId) -> Option<Uuid> {
        self.identities.get(&id).map(|u| *u)
    }

    pub fn leave(&self, id: ConnectionId, room: Room) {
        if let Some(mut rooms) = self.memberships.get_mut(&id) {
            rooms.remove(&room);
        }
        self.remove_member(&room, id);
        debug!(connection_id = %id, %room, "left room");
    }

    /// Sends one frame to a single connection, outside any room.
    pub fn send_to(&self, id: ConnectionId, event: &RealtimeEvent) -> Result<bool> {
        let frame = serde_json::to_string(event)?;
        Ok(self
            .connections
            .get(&id)
            .is_some_and(|tx| tx.send(frame).is_ok()))
    }

    pub fn members(&self, room: &Room) -> usize {
        self.rooms.get(room).map_or(0, |m| m.len())
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    fn remove_member(&self, room: &Room, id: ConnectionId) {
        let now_empty = match self.rooms.get_mut(room) {
            Some(mut members) => {
                members.remove(&id);
                members.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.rooms.remove_if(room, |_, members| members.is_empty());
        }
    }

    fn deliver<'a>(
        &self,
        targets: impl IntoIterator<Item = &'a ConnectionId>,
        frame: &str,
    ) -> usize {
        targets
            .into_iter()
            .filter(|id| {
                self.connections
                    .get(id)
                    .is_some_and(|tx| tx.send(frame.to_owned()).is_ok())
            })
            .count()
    }
}

impl EventPublisher for RoomHub {
    fn publish(&self, room: &Room, event: &RealtimeEvent) -> Result<usize> {
        let frame = serde_json::to_string(event)
            .map_err(|e| DomainError::Realtime(format!("unencodable event: {e}")))?;
        // Snapshot the member set so no shard lock is held while sending.
        let members: Vec<ConnectionId> = match self.rooms.get(room) {
            Some(members) => members.iter().copied().collect(),
            None => return Ok(0),
        };
        let reached = self.deliver(&members, &frame);
        trace!(%room, event = %event.event, reached, "event published");
        Ok(reached)
    }

    fn publish_global(&self, event: &RealtimeEvent) -> Result<usize> {
        let frame = serde_json::to_string(event)
            .map_err(|e| DomainError::Realtime(format!("unencodable event: {e}")))?;
        let everyone: Vec<ConnectionId> = self.connections.iter().map(|c| *c.key()).collect();
        let reached = self.deliver(&everyone, &frame);
        trace!(event = %event.event, reached, "event broadcast");
        Ok(reached)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(name: &str, n: u32) -> RealtimeEvent {
        RealtimeEvent::new(name, &json!({ "n": n })).unwrap()
    }

    #[test]
    fn room_events_reach_members_only() {
        let hub = RoomHub::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut rx_a = hub.connect(a);
        let mut rx_b = hub.connect(b);
        let room = Room::Post(Uuid::new_v4());
        hub.join(a, room);

        assert_eq!(hub.publish(&room, &event("post:voted", 1)).unwrap(), 1);
        let frame: serde_json::Value = serde_json::from_str(&rx_a.try_recv().unwrap()).unwrap();
        assert_eq!(frame, json!({ "event": "post:voted", "data": { "n": 1 } }));
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn empty_rooms_are_a_successful_no_op() {
        let hub = RoomHub::new();
        assert_eq!(hub.publish(&Room::User(Uuid::new_v4()), &event("x", 0)).unwrap(), 0);
    }

    #[test]
    fn per_connection_order_is_publish_order() {
        let hub = RoomHub::new();
        let a = Uuid::new_v4();
        let mut rx = hub.connect(a);
        let room = Room::Post(Uuid::new_v4());
        hub.join(a, room);
        for n in 0..50 {
            hub.publish(&room, &event("post:viewed", n)).unwrap();
        }
        for n in 0..50 {
            let frame: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
            assert_eq!(frame["data"]["n"], n);
        }
    }

    #[test]
    fn disconnect_leaves_every_room() {
        let hub = RoomHub::new();
        let a = Uuid::new_v4();
        let _rx = hub.connect(a);
        let (p, u) = (Room::Post(Uuid::new_v4()), Room::User(a));
        hub.join(a, p);
        hub.join(a, u);
        assert_eq!((hub.members(&p), hub.members(&u)), (1, 1));

        hub.disconnect(a);
        assert_eq!((hub.members(&p), hub.members(&u)), (0, 0));
        assert_eq!(hub.connection_count(), 0);
        assert_eq!(hub.publish(&p, &event("x", 0)).unwrap(), 0);
    }

    #[test]
    fn global_reaches_every_connection() {
        let hub = RoomHub::new();
        let mut receivers: Vec<_> = (0..3).map(|_| hub.connect(Uuid::new_v4())).collect();
        assert_eq!(hub.publish_global(&event("post:new", 7)).unwrap(), 3);
        for rx in &mut receivers {
            assert!(rx.try_recv().is_ok());
        }
    }

    #[test]
    fn reauthenticating_moves_the_socket_between_user_rooms() {
        let hub = RoomHub::new();
        let conn = Uuid::new_v4();
        let mut rx = hub.connect(conn);
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

        hub.identify(conn, Some(alice));
        assert_eq!(hub.identity(conn), Some(alice));
        assert_eq!(hub.members(&Room::User(alice)), 1);

        hub.identify(conn, Some(bob));
        assert_eq!(hub.identity(conn), Some(bob));
        assert_eq!(hub.members(&Room::User(alice)), 0);
        assert_eq!(hub.members(&Room::User(bob)), 1);

        assert_eq!(hub.publish(&Room::User(alice), &event("notification:new", 1)).unwrap(), 0);
        assert_eq!(hub.publish(&Room::User(bob), &event("notification:new", 2)).unwrap(), 1);
        let frame: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(frame["data"]["n"], 2);
        assert!(rx.try_recv().is_err());

        hub.identify(conn, None);
        assert_eq!(hub.identity(conn), None);
        assert_eq!(hub.members(&Room::User(bob)), 0);
    }

    #[test]
    fn post_rooms_survive_a_change_of_identity() {
        let hub = RoomHub::new();
        let conn = Uuid::new_v4();
        let _rx = hub.connect(conn);
        let post = Room::Post(Uuid::new_v4());
        hub.join(conn, post);

        hub.identify(conn, Some(Uuid::new_v4()));
        hub.identify(conn, Some(Uuid::new_v4()));
        assert_eq!(hub.members(&post), 1);
    }

    #[test]
    fn joins_racing_a_disconnect_leave_nothing_behind() {
        let hub = std::sync::Arc::new(RoomHub::new());
        for _ in 0..200 {
            let conn = Uuid::new_v4();
            let _rx = hub.connect(conn);
            let rooms: Vec<Room> = (0..20).map(|_| Room::Post(Uuid::new_v4())).collect();

            let joiner = {
                let hub = hub.clone();
                let rooms = rooms.clone();
                std::thread::spawn(move || {
                    for room in rooms {
                        hub.join(conn, room);
                    }
                    hub.identify(conn, Some(Uuid::new_v4()));
                })
            };
            hub.disconnect(conn);
            joiner.join().unwrap();

            assert!(rooms.iter().all(|room| hub.members(room) == 0));
            assert!(!hub.memberships.contains_key(&conn));
            assert!(hub.identity(conn).is_none());
        }
        assert!(hub.rooms.is_empty());
    }

    #[test]
    fn unknown_connections_cannot_join() {
        let hub = RoomHub::new();
        let room = Room::Post(Uuid::new_v4());
        hub.join(Uuid::new_v4(), room);
        assert_eq!(hub.members(&room), 0);
    }
}
