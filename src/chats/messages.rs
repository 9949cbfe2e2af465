use std::sync::Arc;

use axum::{debug_handler, extract::State, Json};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    auth::Caller,
    error::ChatError,
    store::{ChatStore, Message, MessagePage},
    AppPath, AppQuery, AppResult,
};

#[derive(Debug, Deserialize)]
pub(crate) struct HistoryQuery {
    before: Option<i64>,
    limit: Option<usize>,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn chat_messages(
    State(store): State<Arc<dyn ChatStore>>,
    Caller(identity): Caller,
    AppPath(thread_id): AppPath<Uuid>,

    AppQuery(HistoryQuery { before, limit }): AppQuery<HistoryQuery>,
) -> AppResult<Json<Vec<Message>>> {
    let thread = store
        .get_thread(thread_id)
        .await?
        .ok_or(ChatError::ThreadNotFound(thread_id))?;
    if !thread.is_participant(&identity.user_id) {
        return Err(ChatError::NotParticipant.into());
    }

    Ok(Json(
        store
            .list_messages(thread_id, MessagePage::new(before, limit))
            .await?,
    ))
}
