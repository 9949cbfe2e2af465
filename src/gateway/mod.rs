//! The real-time gateway: one explicitly constructed object owning the room
//! registry, the chat store and the identity resolver. Handlers and the
//! outer CRUD layer reach connections only through it.

mod protocol;
mod ws;

use std::sync::Arc;

use serde_json::Value;

use crate::{
    auth::{Handshake, Identity, IdentityResolver, Role},
    chat,
    config::DEFAULT_MAX_MESSAGE_LENGTH,
    error::{ChatError, ChatResult},
    rooms::{ConnectionId, Outbox, RoomKey, RoomRegistry},
    store::ChatStore,
};

pub use protocol::*;
pub use ws::gateway_ws;

/// A live session. The identity is fixed at handshake and every handler acts
/// on its behalf.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    identity: Arc<Identity>,
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }
}

#[derive(Clone)]
pub struct Gateway {
    rooms: Arc<RoomRegistry>,
    store: Arc<dyn ChatStore>,
    resolver: Arc<IdentityResolver>,
    max_message_length: usize,
}

impl Gateway {
    pub fn new(store: Arc<dyn ChatStore>, resolver: Arc<IdentityResolver>) -> Self {
        Self {
            rooms: Arc::new(RoomRegistry::new()),
            store,
            resolver,
            max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
        }
    }

    pub fn with_max_message_length(mut self, max_message_length: usize) -> Self {
        self.max_message_length = max_message_length;
        self
    }

    pub fn rooms(&self) -> &RoomRegistry {
        &self.rooms
    }

    pub fn store(&self) -> &dyn ChatStore {
        self.store.as_ref()
    }

    pub fn max_message_length(&self) -> usize {
        self.max_message_length
    }

    /// Authenticates a handshake and registers the connection. Nothing is
    /// registered when authentication fails.
    pub fn connect(&self, handshake: &Handshake, outbox: Outbox) -> ChatResult<Connection> {
        let identity = self.resolver.resolve(handshake)?;
        Ok(self.attach(identity, outbox))
    }

    /// Registers a connection for an already verified identity and greets it.
    pub fn attach(&self, identity: Identity, outbox: Outbox) -> Connection {
        let identity = Arc::new(identity);
        let id = self.rooms.register((*identity).clone(), outbox);

        tracing::info!(
            connection_id = %id,
            user_id = %identity.user_id,
            role = %identity.role,
            "connection opened"
        );

        self.rooms.send_to(
            id,
            OutboundEvent::Connected(ConnectedPayload {
                message: "Connected successfully!".to_string(),
                user_id: identity.user_id.clone(),
                user_role: identity.role,
                user_name: identity.display_name.clone(),
                connection_id: id,
            }),
        );

        Connection { id, identity }
    }

    /// Drops every membership of the connection and tells each chat room it
    /// was in that the participant left.
    pub fn disconnect(&self, connection: &Connection) {
        let Some((identity, rooms)) = self.rooms.unregister(connection.id) else {
            return;
        };

        for thread_id in rooms.iter().filter_map(RoomKey::chat_thread) {
            self.rooms.broadcast(
                &RoomKey::Chat(thread_id),
                OutboundEvent::ParticipantLeft(ParticipantPayload {
                    thread_id,
                    user_id: identity.user_id.clone(),
                    user_name: identity.display_name.clone(),
                    user_role: None,
                }),
                None,
            );
        }

        tracing::info!(
            connection_id = %connection.id,
            user_id = %identity.user_id,
            rooms = rooms.len(),
            "connection closed"
        );
    }

    /// Handles one raw text frame. Parse failures become an `error` event.
    pub async fn handle_frame(&self, connection: &Connection, frame: &str) {
        match InboundEvent::parse(frame) {
            Ok(event) => self.handle(connection, event).await,
            Err(err) => {
                tracing::debug!(connection_id = %connection.id, error = %err, "unparseable frame");
                self.reject(connection, "process this request", &err);
            }
        }
    }

    /// Runs one inbound event to completion. Failures are reported to the
    /// acting connection only.
    pub async fn handle(&self, connection: &Connection, event: InboundEvent) {
        let name = event.name();
        let (operation, result) = match event {
            InboundEvent::JoinChat(ThreadRef { thread_id }) => (
                "join this chat",
                chat::join_chat(self, connection, thread_id).await,
            ),
            InboundEvent::LeaveChat(ThreadRef { thread_id }) => {
                chat::leave_chat(self, connection, thread_id);
                ("leave this chat", Ok(()))
            }
            InboundEvent::SendMessage(payload) => (
                "send message",
                chat::send_message(self, connection, payload).await.map(|_| ()),
            ),
            InboundEvent::TypingStart(ThreadRef { thread_id }) => {
                chat::typing(self, connection, thread_id, true);
                ("signal typing", Ok(()))
            }
            InboundEvent::TypingStop(ThreadRef { thread_id }) => {
                chat::typing(self, connection, thread_id, false);
                ("signal typing", Ok(()))
            }
            InboundEvent::MarkRead(ThreadRef { thread_id }) => (
                "mark messages as read",
                chat::mark_read(self, connection, thread_id).await,
            ),
            InboundEvent::SellerCarInquiry(data) => (
                "post car inquiries",
                chat::role_signal(self, connection, chat::RoleSignal::CarInquiry, data),
            ),
            InboundEvent::DealerLotUpdate(data) => (
                "post lot updates",
                chat::role_signal(self, connection, chat::RoleSignal::LotUpdate, data),
            ),
            InboundEvent::MechanicInspectionUpdate(data) => (
                "post inspection updates",
                chat::role_signal(self, connection, chat::RoleSignal::InspectionUpdate, data),
            ),
            InboundEvent::TowingRequestUpdate(data) => (
                "post transport updates",
                chat::role_signal(self, connection, chat::RoleSignal::TransportUpdate, data),
            ),
            InboundEvent::BidPlaced(data) => (
                "notify about this bid",
                chat::notify(self, connection, chat::Notice::Bid, data),
            ),
            InboundEvent::OfferMade(data) => (
                "notify about this offer",
                chat::notify(self, connection, chat::Notice::Offer, data),
            ),
            InboundEvent::ReservationMade(data) => (
                "notify about this reservation",
                chat::notify(self, connection, chat::Notice::Reservation, data),
            ),
            InboundEvent::Ping => {
                chat::pong(self, connection);
                ("ping", Ok(()))
            }
        };

        if let Err(err) = result {
            if matches!(err, ChatError::Storage(_)) {
                tracing::error!(
                    connection_id = %connection.id,
                    user_id = %connection.identity.user_id,
                    event = name,
                    error = %err,
                    "event failed in storage"
                );
            } else {
                tracing::info!(
                    connection_id = %connection.id,
                    user_id = %connection.identity.user_id,
                    event = name,
                    error = %err,
                    "event rejected"
                );
            }
            self.reject(connection, operation, &err);
        }
    }

    fn reject(&self, connection: &Connection, operation: &str, err: &ChatError) {
        self.rooms.send_to(
            connection.id,
            OutboundEvent::error(err.client_message(operation)),
        );
    }

    /// Pushes an event to every connection of a user.
    pub fn emit_to_user(&self, user_id: &str, name: &'static str, data: Value) -> usize {
        self.rooms.broadcast(
            &RoomKey::User(user_id.to_string()),
            OutboundEvent::Signal { name, data },
            None,
        )
    }

    /// Pushes an event to every connection holding a role.
    pub fn emit_to_role(&self, role: Role, name: &'static str, data: Value) -> usize {
        self.rooms
            .broadcast(&RoomKey::Role(role), OutboundEvent::Signal { name, data }, None)
    }

    /// Pushes an event to every connection that joined a chat thread.
    pub fn emit_to_chat(&self, thread_id: uuid::Uuid, name: &'static str, data: Value) -> usize {
        self.rooms.broadcast(
            &RoomKey::Chat(thread_id),
            OutboundEvent::Signal { name, data },
            None,
        )
    }
}
