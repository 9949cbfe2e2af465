//! JSON frames exchanged over the socket: `{"event": "...", "data": {...}}`.

use serde::{
    ser::{SerializeMap, Serializer},
    Deserialize, Serialize,
};
use serde_json::Value;
use uuid::Uuid;

use crate::{
    auth::{Identity, Role},
    error::{ChatError, ChatResult},
    store::{LastMessage, Message, MessageKind},
};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadRef {
    #[serde(alias = "chatId")]
    pub thread_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    #[serde(alias = "chatId")]
    pub thread_id: Uuid,
    #[serde(alias = "message")]
    pub content: String,
    #[serde(rename = "type", alias = "messageType", default)]
    pub kind: MessageKind,
    #[serde(default)]
    pub attachments: Vec<Value>,
}

/// Client to server events. Every variant is handled on behalf of the
/// identity bound to the connection.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum InboundEvent {
    JoinChat(ThreadRef),
    LeaveChat(ThreadRef),
    SendMessage(SendMessage),
    TypingStart(ThreadRef),
    TypingStop(ThreadRef),
    #[serde(alias = "mark_messages_read")]
    MarkRead(ThreadRef),
    SellerCarInquiry(Value),
    DealerLotUpdate(Value),
    MechanicInspectionUpdate(Value),
    TowingRequestUpdate(Value),
    BidPlaced(Value),
    OfferMade(Value),
    ReservationMade(Value),
    Ping,
}

impl InboundEvent {
    pub fn parse(frame: &str) -> ChatResult<Self> {
        serde_json::from_str(frame).map_err(|err| ChatError::MalformedPayload(err.to_string()))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinChat(_) => "join_chat",
            Self::LeaveChat(_) => "leave_chat",
            Self::SendMessage(_) => "send_message",
            Self::TypingStart(_) => "typing_start",
            Self::TypingStop(_) => "typing_stop",
            Self::MarkRead(_) => "mark_read",
            Self::SellerCarInquiry(_) => "seller_car_inquiry",
            Self::DealerLotUpdate(_) => "dealer_lot_update",
            Self::MechanicInspectionUpdate(_) => "mechanic_inspection_update",
            Self::TowingRequestUpdate(_) => "towing_request_update",
            Self::BidPlaced(_) => "bid_placed",
            Self::OfferMade(_) => "offer_made",
            Self::ReservationMade(_) => "reservation_made",
            Self::Ping => "ping",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedPayload {
    pub message: String,
    pub user_id: String,
    pub user_role: Role,
    pub user_name: String,
    pub connection_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinedChatPayload {
    pub thread_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantPayload {
    pub thread_id: Uuid,
    pub user_id: String,
    pub user_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_role: Option<Role>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderView {
    pub id: String,
    pub name: String,
    pub role: Role,
}

/// A persisted message with the sender's display fields resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: Uuid,
    pub sender: SenderView,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub attachments: Vec<Value>,
    pub is_read: bool,
    pub created_at: i64,
}

impl MessageView {
    pub fn new(message: &Message, sender: &Identity) -> Self {
        Self {
            id: message.id,
            sender: SenderView {
                id: message.sender_id.clone(),
                name: sender.display_name.clone(),
                role: sender.role,
            },
            content: message.content.clone(),
            kind: message.kind,
            attachments: message.attachments.clone(),
            is_read: message.is_read,
            created_at: message.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadSummary {
    pub id: Uuid,
    pub last_message: Option<LastMessage>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessagePayload {
    pub thread_id: Uuid,
    pub message: MessageView,
    pub chat: ThreadSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatNotificationPayload {
    pub thread_id: Uuid,
    pub message: MessageView,
    pub sender_name: String,
    pub sender_role: Role,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceiptPayload {
    pub thread_id: Uuid,
    pub read_by: String,
    pub read_by_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub thread_id: Uuid,
    pub user_id: String,
    pub user_name: String,
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PongPayload {
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorPayload {
    pub message: String,
}

/// Server to client events.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundEvent {
    Connected(ConnectedPayload),
    JoinedChat(JoinedChatPayload),
    ParticipantJoined(ParticipantPayload),
    ParticipantLeft(ParticipantPayload),
    NewMessage(NewMessagePayload),
    ChatNotification(ChatNotificationPayload),
    MessagesRead(ReadReceiptPayload),
    UserTyping(TypingPayload),
    /// Role-scoped advisories and targeted notifications; the payload is
    /// relayed as the client sent it, plus sender fields.
    Signal { name: &'static str, data: Value },
    Pong(PongPayload),
    Error(ErrorPayload),
}

impl OutboundEvent {
    pub fn error(message: impl Into<String>) -> Self {
        OutboundEvent::Error(ErrorPayload {
            message: message.into(),
        })
    }

    pub fn name(&self) -> &'static str {
        use OutboundEvent::*;
        match self {
            Connected(_) => "connected",
            JoinedChat(_) => "joined_chat",
            ParticipantJoined(_) => "participant_joined",
            ParticipantLeft(_) => "participant_left",
            NewMessage(_) => "new_message",
            ChatNotification(_) => "chat_notification",
            MessagesRead(_) => "messages_read",
            UserTyping(_) => "user_typing",
            Signal { name, .. } => *name,
            Pong(_) => "pong",
            Error(_) => "error",
        }
    }

    pub fn to_frame(&self) -> ChatResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl Serialize for OutboundEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut frame = serializer.serialize_map(Some(2))?;
        frame.serialize_entry("event", self.name())?;

        use OutboundEvent::*;
        match self {
            Connected(data) => frame.serialize_entry("data", data)?,
            JoinedChat(data) => frame.serialize_entry("data", data)?,
            ParticipantJoined(data) | ParticipantLeft(data) => {
                frame.serialize_entry("data", data)?
            }
            NewMessage(data) => frame.serialize_entry("data", data)?,
            ChatNotification(data) => frame.serialize_entry("data", data)?,
            MessagesRead(data) => frame.serialize_entry("data", data)?,
            UserTyping(data) => frame.serialize_entry("data", data)?,
            Signal { data, .. } => frame.serialize_entry("data", data)?,
            Pong(data) => frame.serialize_entry("data", data)?,
            Error(data) => frame.serialize_entry("data", data)?,
        }

        frame.end()
    }
}
