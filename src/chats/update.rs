use std::sync::Arc;

use axum::{debug_handler, extract::State, Json};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    auth::Caller,
    error::ChatError,
    store::{ChatStore, ChatThread},
    AppJson, AppPath, AppResult,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UpdateChatBody {
    is_active: bool,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn update_chat(
    State(store): State<Arc<dyn ChatStore>>,
    Caller(identity): Caller,
    AppPath(thread_id): AppPath<Uuid>,

    AppJson(UpdateChatBody { is_active }): AppJson<UpdateChatBody>,
) -> AppResult<Json<ChatThread>> {
    let thread = store
        .get_thread(thread_id)
        .await?
        .ok_or(ChatError::ThreadNotFound(thread_id))?;
    if !thread.is_participant(&identity.user_id) {
        return Err(ChatError::NotParticipant.into());
    }

    let thread = store.set_active(thread_id, is_active).await?;
    tracing::info!(%thread_id, user_id = %identity.user_id, is_active, "chat activity changed");

    Ok(Json(thread))
}
