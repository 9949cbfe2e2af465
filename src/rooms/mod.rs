mod registry;

use std::fmt;

use uuid::Uuid;

use crate::auth::Role;

pub use registry::{ConnectionId, Outbox, RoomRegistry};

/// In-memory broadcast group. Rooms are pure bookkeeping; nothing about them
/// outlives the process.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoomKey {
    /// Private channel of one user, joined automatically on connect.
    User(String),
    /// Everyone currently connected with a role.
    Role(Role),
    /// Connections that explicitly joined a chat thread.
    Chat(Uuid),
}

impl RoomKey {
    pub fn wire_key(&self) -> String {
        match self {
            RoomKey::User(user_id) => format!("user_{user_id}"),
            RoomKey::Role(role) => format!("role_{role}"),
            RoomKey::Chat(thread_id) => format!("chat_{thread_id}"),
        }
    }

    pub fn parse(key: &str) -> Option<RoomKey> {
        if let Some(user_id) = key.strip_prefix("user_") {
            return (!user_id.is_empty()).then(|| RoomKey::User(user_id.to_string()));
        }
        if let Some(role) = key.strip_prefix("role_") {
            return role.parse().ok().map(RoomKey::Role);
        }
        if let Some(thread_id) = key.strip_prefix("chat_") {
            return Uuid::parse_str(thread_id).ok().map(RoomKey::Chat);
        }
        None
    }

    pub fn chat_thread(&self) -> Option<Uuid> {
        match self {
            RoomKey::Chat(thread_id) => Some(*thread_id),
            _ => None,
        }
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.wire_key())
    }
}
