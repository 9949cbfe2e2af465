use std::sync::Arc;

use axum::{debug_handler, extract::State, Json};

use crate::{auth::Caller, store::{ChatStore, ChatThread}, AppResult};

#[debug_handler(state = crate::AppState)]
pub(crate) async fn list_chats(
    State(store): State<Arc<dyn ChatStore>>,
    Caller(identity): Caller,
) -> AppResult<Json<Vec<ChatThread>>> {
    Ok(Json(store.list_for_user(identity.user_id).await?))
}
