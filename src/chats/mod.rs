//! Thin REST surface over the chat store: thread list, history, creation and
//! soft (de)activation. Every route needs a bearer token.

mod list;
mod messages;
mod new;
mod update;

use axum::{routing::{get, patch}, Router};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list::list_chats).post(new::new_chat))
        .route("/{thread_id}", patch(update::update_chat))
        .route("/{thread_id}/messages", get(messages::chat_messages))
}
