//! HTTP and WebSocket handlers for the relay
//!
//! One port serves everything: `GET /` upgrades to the chat WebSocket when
//! the request asks for it and otherwise returns the web UI, `/health` is a
//! health check, and every other path falls through to the static files.

use crate::relay::server::RelayServer;
use crate::relay::slot::Outbound;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Request, State,
    },
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tower::ServiceExt;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// Create the relay router
pub fn router(server: Arc<RelayServer>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .fallback_service(ServeDir::new(server.static_dir()))
        .layer(TraceLayer::new_for_http())
        .with_state(server)
}

/// WebSocket upgrade on the page path, static UI otherwise
async fn root(
    State(server): State<Arc<RelayServer>>,
    ws: Option<WebSocketUpgrade>,
    request: Request,
) -> Response {
    match ws {
        Some(ws) => ws.on_upgrade(move |socket| handle_socket(socket, server)),
        None => ServeDir::new(server.static_dir())
            .oneshot(request)
            .await
            .into_response(),
    }
}

/// Health check response
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    connected: bool,
}

/// Health check endpoint
async fn health_check(State(server): State<Arc<RelayServer>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        connected: server.slot().is_occupied().await,
    })
}

/// Drive one chat WebSocket until either side goes away
async fn handle_socket(socket: WebSocket, server: Arc<RelayServer>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let accepted = server.accept().await;
    let id = accepted.id;
    let mut outbound = accepted.outbound;

    // Forward slot → browser frames
    let mut send_task = tokio::spawn(async move {
        while let Some(out) = outbound.recv().await {
            match out {
                Outbound::Frame(frame) => {
                    if ws_sender.send(Message::Text(frame.to_json())).await.is_err() {
                        tracing::debug!(connection_id = id, "WebSocket send failed");
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = ws_sender.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    if !accepted.admission.is_admitted() {
        let _ = send_task.await;
        return;
    }

    // Receive browser → relay frames
    let recv_server = server.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(Message::Text(text)) => recv_server.handle_text(id, &text).await,
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(connection_id = id, "WebSocket error: {}", e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    server.disconnect(id).await;
}
