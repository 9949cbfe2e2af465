pub mod appresult;
pub mod auth;
pub mod chat;
pub mod chats;
pub mod config;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod rooms;
pub mod store;

use std::sync::Arc;

use axum::{
    extract::{FromRef, State},
    http::{header, HeaderValue, Method},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    auth::IdentityResolver,
    error::{ChatError, ChatResult},
    gateway::Gateway,
    store::ChatStore,
};

pub use appresult::{AppError, AppJson, AppPath, AppQuery, AppResult};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub gateway: Gateway,
    pub store: Arc<dyn ChatStore>,
    pub resolver: Arc<IdentityResolver>,
}

impl AppState {
    pub fn new(store: Arc<dyn ChatStore>, resolver: Arc<IdentityResolver>, max_message_length: usize) -> Self {
        Self {
            gateway: Gateway::new(store.clone(), resolver.clone())
                .with_max_message_length(max_message_length),
            store,
            resolver,
        }
    }
}

/// Field access on loosely typed client payloads.
pub trait GetField {
    fn get_str_field(&self, field: &str) -> ChatResult<String>;
    fn get_obj_field(&self, field: &str) -> ChatResult<&Value>;
}

impl GetField for Value {
    fn get_str_field(&self, field: &str) -> ChatResult<String> {
        Ok(self
            .get(field)
            .ok_or_else(|| ChatError::MalformedPayload(format!("expected {field}")))?
            .as_str()
            .filter(|value| !value.is_empty())
            .ok_or_else(|| ChatError::MalformedPayload(format!("expected {field} to be a string")))?
            .to_owned())
    }

    fn get_obj_field(&self, field: &str) -> ChatResult<&Value> {
        self.get(field)
            .ok_or_else(|| ChatError::MalformedPayload(format!("expected {field}")))
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

pub fn router(state: AppState, client_url: &str) -> Router {
    Router::new()
        .route("/ws", get(gateway::gateway_ws))
        .route("/health", get(health))
        .nest("/api/chats", chats::router())
        .with_state(state)
        .layer(cors_layer(client_url))
        .layer(TraceLayer::new_for_http())
}

async fn health(State(gateway): State<Gateway>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "connections": gateway.rooms().connection_count(),
        "timestamp": now_ms(),
    }))
}

fn cors_layer(client_url: &str) -> CorsLayer {
    let any = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    if client_url == "*" {
        return any;
    }

    match HeaderValue::from_str(client_url) {
        Ok(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::OPTIONS])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
            .allow_credentials(true),
        Err(_) => {
            tracing::warn!(client_url, "Invalid CLIENT_URL, allowing any origin");
            any
        }
    }
}
