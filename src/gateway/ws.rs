use axum::{
    debug_handler,
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::{header, HeaderMap},
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::auth::Handshake;

use super::Gateway;

#[debug_handler(state = crate::AppState)]
pub async fn gateway_ws(
    State(gateway): State<Gateway>,
    Query(mut handshake): Query<Handshake>,
    headers: HeaderMap,

    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    if handshake.token.is_none() {
        handshake.token = headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::to_owned);
    }

    ws.on_upgrade(move |socket| serve_socket(gateway, handshake, socket))
}

async fn serve_socket(gateway: Gateway, handshake: Handshake, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let connection = match gateway.connect(&handshake, tx) {
        Ok(connection) => connection,
        Err(err) => {
            tracing::info!(error = %err, "handshake rejected");
            let _ = sender
                .send(Message::Close(Some(CloseFrame {
                    code: close_code::POLICY,
                    reason: err.to_string().into(),
                })))
                .await;
            return;
        }
    };

    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let frame = match event.to_frame() {
                Ok(frame) => frame,
                Err(err) => {
                    tracing::error!(event = event.name(), error = %err, "unserializable event");
                    continue;
                }
            };
            if sender.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    // one frame at a time keeps a connection's sends in order
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => gateway.handle_frame(&connection, text.as_str()).await,
            Message::Close(_) => break,
            _ => {}
        }
    }

    gateway.disconnect(&connection);
    writer.abort();
}
