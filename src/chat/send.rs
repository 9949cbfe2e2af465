use uuid::Uuid;

use crate::{
    error::{ChatError, ChatResult},
    gateway::{
        ChatNotificationPayload, Connection, Gateway, MessageView, NewMessagePayload,
        OutboundEvent, SendMessage, ThreadSummary,
    },
    rooms::RoomKey,
    store::{Appended, ChatThread, NewMessage, MAX_ATTACHMENTS},
};

/// Result of a send that reached the broadcast stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub thread_id: Uuid,
    pub message_id: Uuid,
    /// Queues the `new_message` event was pushed to.
    pub recipients: usize,
    /// Participants that got a `chat_notification` on their personal room.
    pub notified: usize,
}

/// One in-flight send. A rejection at any stage is the `Err` of [`step`].
enum SendState {
    Received(SendMessage),
    Validated { thread: ChatThread, draft: NewMessage },
    Persisted(Appended),
    Broadcast(Delivery),
}

impl SendState {
    fn stage(&self) -> &'static str {
        match self {
            SendState::Received(_) => "received",
            SendState::Validated { .. } => "validated",
            SendState::Persisted(_) => "persisted",
            SendState::Broadcast(_) => "broadcast",
        }
    }
}

/// Validates, persists and fans out one message.
///
/// The sender's own connection gets the persisted copy like everyone else;
/// if it never joined the chat room the copy is delivered to it directly.
pub async fn send_message(
    gateway: &Gateway,
    connection: &Connection,
    payload: SendMessage,
) -> ChatResult<Delivery> {
    let mut state = SendState::Received(payload);

    loop {
        let stage = state.stage();
        state = match step(gateway, connection, state).await {
            Ok(SendState::Broadcast(delivery)) => {
                tracing::debug!(
                    connection_id = %connection.id(),
                    thread_id = %delivery.thread_id,
                    message_id = %delivery.message_id,
                    recipients = delivery.recipients,
                    "message delivered"
                );
                return Ok(delivery);
            }
            Ok(next) => next,
            Err(err) => {
                if let ChatError::Storage(detail) = &err {
                    tracing::error!(stage, connection_id = %connection.id(), %detail, "send failed");
                } else {
                    tracing::debug!(stage, connection_id = %connection.id(), error = %err, "send rejected");
                }
                return Err(err);
            }
        };
    }
}

async fn step(gateway: &Gateway, connection: &Connection, state: SendState) -> ChatResult<SendState> {
    match state {
        SendState::Received(payload) => validate(gateway, connection, payload).await,
        SendState::Validated { thread, draft } => Ok(SendState::Persisted(
            gateway.store().append_message(thread.id, draft).await?,
        )),
        SendState::Persisted(appended) => Ok(SendState::Broadcast(broadcast(
            gateway, connection, appended,
        ))),
        done @ SendState::Broadcast(_) => Ok(done),
    }
}

async fn validate(
    gateway: &Gateway,
    connection: &Connection,
    payload: SendMessage,
) -> ChatResult<SendState> {
    let thread_id = payload.thread_id;
    let draft = draft_message(
        connection.identity().user_id.clone(),
        payload,
        gateway.max_message_length(),
    )?;

    let thread = gateway
        .store()
        .get_thread(thread_id)
        .await?
        .ok_or(ChatError::ThreadNotFound(thread_id))?;
    if !thread.is_participant(&draft.sender_id) {
        return Err(ChatError::NotParticipant);
    }
    if !thread.is_active {
        return Err(ChatError::ThreadInactive(thread.id));
    }

    Ok(SendState::Validated { thread, draft })
}

/// Payload checks that need no storage round trip.
fn draft_message(
    sender_id: String,
    payload: SendMessage,
    max_length: usize,
) -> ChatResult<NewMessage> {
    let content = payload.content.trim();
    if content.is_empty() {
        return Err(ChatError::MalformedPayload("message content is required".into()));
    }
    if content.chars().count() > max_length {
        return Err(ChatError::MalformedPayload(format!(
            "message content exceeds {max_length} characters"
        )));
    }
    if payload.attachments.len() > MAX_ATTACHMENTS {
        return Err(ChatError::MalformedPayload(format!(
            "at most {MAX_ATTACHMENTS} attachments are allowed"
        )));
    }

    Ok(NewMessage {
        sender_id,
        content: content.to_string(),
        kind: payload.kind,
        attachments: payload.attachments,
    })
}

fn broadcast(gateway: &Gateway, connection: &Connection, appended: Appended) -> Delivery {
    let Appended { thread, message } = appended;
    let sender = connection.identity();
    let rooms = gateway.rooms();
    let room = RoomKey::Chat(thread.id);
    let view = MessageView::new(&message, sender);

    let event = OutboundEvent::NewMessage(NewMessagePayload {
        thread_id: thread.id,
        message: view.clone(),
        chat: ThreadSummary {
            id: thread.id,
            last_message: thread.last_message.clone(),
        },
    });

    // only this connection's own handler changes its memberships, and it is
    // busy right here
    let sender_joined = rooms.is_member(connection.id(), &room);
    let mut recipients = rooms.broadcast(&room, event.clone(), None);
    if !sender_joined && rooms.send_to(connection.id(), event) {
        recipients += 1;
    }

    let mut notified = 0;
    for participant in thread.participants.iter().filter(|id| *id != sender.user_id) {
        let notification = OutboundEvent::ChatNotification(ChatNotificationPayload {
            thread_id: thread.id,
            message: view.clone(),
            sender_name: sender.display_name.clone(),
            sender_role: sender.role,
        });
        if rooms.broadcast(&RoomKey::User(participant.to_string()), notification, None) > 0 {
            notified += 1;
        }
    }

    Delivery {
        thread_id: thread.id,
        message_id: message.id,
        recipients,
        notified,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::store::MessageKind;

    fn payload(content: &str) -> SendMessage {
        SendMessage {
            thread_id: Uuid::now_v7(),
            content: content.into(),
            kind: MessageKind::Text,
            attachments: Vec::new(),
        }
    }

    #[test]
    fn test_draft_trims_content() {
        let draft = draft_message("a".into(), payload("  hi  "), 10).unwrap();
        assert_eq!(draft.content, "hi");
        assert_eq!(draft.sender_id, "a");
    }

    #[test]
    fn test_draft_rejects_blank_and_oversized() {
        assert!(matches!(
            draft_message("a".into(), payload("   "), 10),
            Err(ChatError::MalformedPayload(_))
        ));
        assert!(matches!(
            draft_message("a".into(), payload("ééééééééééé"), 10),
            Err(ChatError::MalformedPayload(_))
        ));
        assert!(draft_message("a".into(), payload("éééééééééé"), 10).is_ok());
    }

    #[test]
    fn test_draft_limits_attachments() {
        let mut too_many = payload("files");
        too_many.attachments = vec![json!({}); MAX_ATTACHMENTS + 1];
        assert!(matches!(
            draft_message("a".into(), too_many, 100),
            Err(ChatError::MalformedPayload(_))
        ));
    }
}
