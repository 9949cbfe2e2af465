use uuid::Uuid;

use crate::{
    error::{ChatError, ChatResult},
    gateway::{
        Connection, Gateway, JoinedChatPayload, OutboundEvent, ParticipantPayload,
        ReadReceiptPayload, TypingPayload,
    },
    rooms::RoomKey,
    store::ChatThread,
};

async fn participant_thread(
    gateway: &Gateway,
    connection: &Connection,
    thread_id: Uuid,
) -> ChatResult<ChatThread> {
    let thread = gateway
        .store()
        .get_thread(thread_id)
        .await?
        .ok_or(ChatError::ThreadNotFound(thread_id))?;

    if !thread.is_participant(&connection.identity().user_id) {
        return Err(ChatError::NotParticipant);
    }
    Ok(thread)
}

/// Subscribes a participant to a thread room. A repeated join is
/// acknowledged again without telling the room twice.
pub async fn join_chat(gateway: &Gateway, connection: &Connection, thread_id: Uuid) -> ChatResult<()> {
    participant_thread(gateway, connection, thread_id).await?;

    let rooms = gateway.rooms();
    let room = RoomKey::Chat(thread_id);
    let identity = connection.identity();
    let joined = rooms.join(connection.id(), room.clone());

    rooms.send_to(
        connection.id(),
        OutboundEvent::JoinedChat(JoinedChatPayload { thread_id }),
    );

    if joined {
        tracing::debug!(
            connection_id = %connection.id(),
            user_id = %identity.user_id,
            %room,
            "joined chat"
        );
        rooms.broadcast(
            &room,
            OutboundEvent::ParticipantJoined(ParticipantPayload {
                thread_id,
                user_id: identity.user_id.clone(),
                user_name: identity.display_name.clone(),
                user_role: Some(identity.role),
            }),
            Some(connection.id()),
        );
    }

    Ok(())
}

/// Always permitted. Only an actual departure is announced.
pub fn leave_chat(gateway: &Gateway, connection: &Connection, thread_id: Uuid) {
    let rooms = gateway.rooms();
    let room = RoomKey::Chat(thread_id);
    if !rooms.leave(connection.id(), &room) {
        return;
    }

    let identity = connection.identity();
    tracing::debug!(
        connection_id = %connection.id(),
        user_id = %identity.user_id,
        %room,
        "left chat"
    );
    rooms.broadcast(
        &room,
        OutboundEvent::ParticipantLeft(ParticipantPayload {
            thread_id,
            user_id: identity.user_id.clone(),
            user_name: identity.display_name.clone(),
            user_role: None,
        }),
        Some(connection.id()),
    );
}

pub fn typing(gateway: &Gateway, connection: &Connection, thread_id: Uuid, is_typing: bool) {
    let identity = connection.identity();
    gateway.rooms().broadcast(
        &RoomKey::Chat(thread_id),
        OutboundEvent::UserTyping(TypingPayload {
            thread_id,
            user_id: identity.user_id.clone(),
            user_name: identity.display_name.clone(),
            is_typing,
        }),
        Some(connection.id()),
    );
}

/// Marks the other participants' messages as read and sends a receipt to the
/// rest of the room.
pub async fn mark_read(gateway: &Gateway, connection: &Connection, thread_id: Uuid) -> ChatResult<()> {
    participant_thread(gateway, connection, thread_id).await?;

    let identity = connection.identity();
    let updated = gateway
        .store()
        .mark_read(thread_id, identity.user_id.clone())
        .await?;

    tracing::debug!(
        connection_id = %connection.id(),
        user_id = %identity.user_id,
        %thread_id,
        updated,
        "messages marked read"
    );

    gateway.rooms().broadcast(
        &RoomKey::Chat(thread_id),
        OutboundEvent::MessagesRead(ReadReceiptPayload {
            thread_id,
            read_by: identity.user_id.clone(),
            read_by_name: identity.display_name.clone(),
        }),
        Some(connection.id()),
    );

    Ok(())
}
