use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{auth::Identity, gateway::OutboundEvent};

use super::RoomKey;

pub type ConnectionId = Uuid;

/// Outbound queue of one connection. The socket writer drains it.
pub type Outbox = mpsc::UnboundedSender<Arc<OutboundEvent>>;

struct ConnectionEntry {
    identity: Identity,
    outbox: Outbox,
    rooms: HashSet<RoomKey>,
}

#[derive(Default)]
struct Rooms {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    members: HashMap<RoomKey, HashSet<ConnectionId>>,
}

impl Rooms {
    fn join(&mut self, connection_id: ConnectionId, room: RoomKey) -> bool {
        let Some(entry) = self.connections.get_mut(&connection_id) else {
            return false;
        };
        if !entry.rooms.insert(room.clone()) {
            return false;
        }
        self.members.entry(room).or_default().insert(connection_id);
        true
    }

    fn remove_member(&mut self, connection_id: ConnectionId, room: &RoomKey) {
        if let Some(members) = self.members.get_mut(room) {
            members.remove(&connection_id);
            if members.is_empty() {
                self.members.remove(room);
            }
        }
    }
}

/// Which connections belong to which rooms.
///
/// Every operation is a short critical section with no await inside, so a
/// plain mutex is enough. Delivery pushes onto unbounded per-connection
/// queues and never blocks; a queue whose socket is gone just drops events.
#[derive(Default)]
pub struct RoomRegistry {
    inner: Mutex<Rooms>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Rooms> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a connection and subscribes it to its personal and role rooms.
    pub fn register(&self, identity: Identity, outbox: Outbox) -> ConnectionId {
        let connection_id = Uuid::now_v7();
        let personal = RoomKey::User(identity.user_id.clone());
        let role = RoomKey::Role(identity.role);

        let mut rooms = self.lock();
        rooms.connections.insert(
            connection_id,
            ConnectionEntry {
                identity,
                outbox,
                rooms: HashSet::new(),
            },
        );
        rooms.join(connection_id, personal);
        rooms.join(connection_id, role);

        connection_id
    }

    /// Drops the connection and all of its memberships in one step, returning
    /// what it held.
    pub fn unregister(&self, connection_id: ConnectionId) -> Option<(Identity, HashSet<RoomKey>)> {
        let mut rooms = self.lock();
        let entry = rooms.connections.remove(&connection_id)?;
        for room in &entry.rooms {
            rooms.remove_member(connection_id, room);
        }
        Some((entry.identity, entry.rooms))
    }

    /// Returns `true` if the membership is new.
    pub fn join(&self, connection_id: ConnectionId, room: RoomKey) -> bool {
        self.lock().join(connection_id, room)
    }

    /// Returns `true` if a membership was removed.
    pub fn leave(&self, connection_id: ConnectionId, room: &RoomKey) -> bool {
        let mut rooms = self.lock();
        let removed = rooms
            .connections
            .get_mut(&connection_id)
            .is_some_and(|entry| entry.rooms.remove(room));
        if removed {
            rooms.remove_member(connection_id, room);
        }
        removed
    }

    /// Delivers `event` to every member of `room` except `except`. Returns the
    /// number of queues it was pushed to.
    pub fn broadcast(
        &self,
        room: &RoomKey,
        event: OutboundEvent,
        except: Option<ConnectionId>,
    ) -> usize {
        let event = Arc::new(event);
        let rooms = self.lock();
        let Some(members) = rooms.members.get(room) else {
            return 0;
        };

        members
            .iter()
            .filter(|id| Some(**id) != except)
            .filter_map(|id| rooms.connections.get(id))
            .filter(|entry| entry.outbox.send(event.clone()).is_ok())
            .count()
    }

    pub fn send_to(&self, connection_id: ConnectionId, event: OutboundEvent) -> bool {
        self.lock()
            .connections
            .get(&connection_id)
            .is_some_and(|entry| entry.outbox.send(Arc::new(event)).is_ok())
    }

    pub fn memberships_of(&self, connection_id: ConnectionId) -> HashSet<RoomKey> {
        self.lock()
            .connections
            .get(&connection_id)
            .map(|entry| entry.rooms.clone())
            .unwrap_or_default()
    }

    pub fn is_member(&self, connection_id: ConnectionId, room: &RoomKey) -> bool {
        self.lock()
            .members
            .get(room)
            .is_some_and(|members| members.contains(&connection_id))
    }

    pub fn members_of(&self, room: &RoomKey) -> Vec<ConnectionId> {
        self.lock()
            .members
            .get(room)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn identity_of(&self, connection_id: ConnectionId) -> Option<Identity> {
        self.lock()
            .connections
            .get(&connection_id)
            .map(|entry| entry.identity.clone())
    }

    pub fn connection_count(&self) -> usize {
        self.lock().connections.len()
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;
    use crate::auth::Role;

    fn connect(
        registry: &RoomRegistry,
        user_id: &str,
        role: Role,
    ) -> (ConnectionId, UnboundedReceiver<Arc<OutboundEvent>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = registry.register(Identity::new(user_id, role, user_id), tx);
        (id, rx)
    }

    fn drain(rx: &mut UnboundedReceiver<Arc<OutboundEvent>>) -> Vec<Arc<OutboundEvent>> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_register_joins_personal_and_role_rooms() {
        let registry = RoomRegistry::new();
        let (id, _rx) = connect(&registry, "u1", Role::Seller);

        let rooms = registry.memberships_of(id);
        assert_eq!(rooms.len(), 2);
        assert!(rooms.contains(&RoomKey::User("u1".into())));
        assert!(rooms.contains(&RoomKey::Role(Role::Seller)));
    }

    #[test]
    fn test_join_and_leave_are_idempotent() {
        let registry = RoomRegistry::new();
        let (id, _rx) = connect(&registry, "u1", Role::User);
        let room = RoomKey::Chat(Uuid::now_v7());

        assert!(registry.join(id, room.clone()));
        assert!(!registry.join(id, room.clone()));
        assert_eq!(registry.members_of(&room), vec![id]);

        assert!(registry.leave(id, &room));
        assert!(!registry.leave(id, &room));
        assert!(registry.members_of(&room).is_empty());
        assert!(!registry.leave(id, &RoomKey::Chat(Uuid::now_v7())));
    }

    #[test]
    fn test_unknown_connection_cannot_join() {
        let registry = RoomRegistry::new();
        assert!(!registry.join(Uuid::now_v7(), RoomKey::Role(Role::User)));
        assert!(registry.members_of(&RoomKey::Role(Role::User)).is_empty());
    }

    #[test]
    fn test_broadcast_honours_exclusion() {
        let registry = RoomRegistry::new();
        let (a, mut rx_a) = connect(&registry, "a", Role::Dealer);
        let (_b, mut rx_b) = connect(&registry, "b", Role::Dealer);

        let room = RoomKey::Role(Role::Dealer);
        assert_eq!(registry.broadcast(&room, OutboundEvent::error("x"), None), 2);
        assert_eq!(registry.broadcast(&room, OutboundEvent::error("y"), Some(a)), 1);

        assert_eq!(drain(&mut rx_a).len(), 1);
        assert_eq!(drain(&mut rx_b).len(), 2);
    }

    #[test]
    fn test_unregister_discards_every_membership() {
        let registry = RoomRegistry::new();
        let (a, mut rx_a) = connect(&registry, "a", Role::User);
        let (b, _rx_b) = connect(&registry, "b", Role::User);
        let chat = RoomKey::Chat(Uuid::now_v7());
        registry.join(a, chat.clone());
        registry.join(b, chat.clone());

        let (identity, rooms) = registry.unregister(a).unwrap();
        assert_eq!(identity.user_id, "a");
        assert_eq!(rooms.len(), 3);
        assert!(registry.unregister(a).is_none());

        registry.broadcast(&chat, OutboundEvent::error("after"), None);
        registry.broadcast(&RoomKey::Role(Role::User), OutboundEvent::error("after"), None);
        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(registry.members_of(&chat), vec![b]);
        assert_eq!(registry.connection_count(), 1);
    }

    #[test]
    fn test_closed_outbox_is_not_counted() {
        let registry = RoomRegistry::new();
        let (id, rx) = connect(&registry, "a", Role::User);
        drop(rx);
        assert_eq!(
            registry.broadcast(&RoomKey::User("a".into()), OutboundEvent::error("x"), None),
            0
        );
        assert!(!registry.send_to(id, OutboundEvent::error("x")));
    }
}
