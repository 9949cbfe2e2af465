use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        FromRequest, FromRequestParts,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::error::ChatError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let Some((status, message)) = rejection(&self.0) {
            return (status, Json(serde_json::json!({ "error": message }))).into_response();
        }

        let (status, message) = match self.0.downcast_ref::<ChatError>() {
            Some(err @ (ChatError::MissingCredential | ChatError::AuthFailed(_))) => {
                (StatusCode::UNAUTHORIZED, err.to_string())
            }
            Some(err @ (ChatError::NotParticipant | ChatError::Forbidden(_))) => {
                (StatusCode::FORBIDDEN, err.to_string())
            }
            Some(err @ ChatError::ThreadNotFound(_)) => (StatusCode::NOT_FOUND, err.to_string()),
            Some(err @ (ChatError::MalformedPayload(_) | ChatError::ThreadInactive(_))) => {
                (StatusCode::BAD_REQUEST, err.to_string())
            }
            Some(ChatError::Storage(_)) | None => {
                tracing::error!(error = %self.0, "request failed\n{}", self.0.backtrace());
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

/// Extractor failures keep axum's status and text but use the JSON error body.
fn rejection(err: &anyhow::Error) -> Option<(StatusCode, String)> {
    if let Some(rejection) = err.downcast_ref::<JsonRejection>() {
        return Some((rejection.status(), rejection.body_text()));
    }
    if let Some(rejection) = err.downcast_ref::<PathRejection>() {
        return Some((rejection.status(), rejection.body_text()));
    }
    err.downcast_ref::<QueryRejection>()
        .map(|rejection| (rejection.status(), rejection.body_text()))
}

#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct AppJson<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(AppError))]
pub struct AppPath<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(AppError))]
pub struct AppQuery<T>(pub T);

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
