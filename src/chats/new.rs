use std::sync::Arc;

use axum::{
    debug_handler,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;

use crate::{
    auth::Caller,
    store::{ChatStore, ParticipantSet},
    AppJson, AppResult,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NewChatBody {
    participant_id: String,
    car_id: Option<String>,
}

/// 201 with the new thread, or 200 with the one that already existed.
#[debug_handler(state = crate::AppState)]
pub(crate) async fn new_chat(
    State(store): State<Arc<dyn ChatStore>>,
    Caller(identity): Caller,

    AppJson(NewChatBody { participant_id, car_id }): AppJson<NewChatBody>,
) -> AppResult<Response> {
    let participants = ParticipantSet::new([identity.user_id.clone(), participant_id])?;
    let car_ref = car_id.filter(|car| !car.trim().is_empty());

    let (thread, created) = store.find_or_create_thread(participants, car_ref).await?;
    if created {
        tracing::info!(thread_id = %thread.id, user_id = %identity.user_id, "chat created");
    }

    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(thread)).into_response())
}
