//! HTTP 서버: WebSocket 제어 연결 및 헬스 체크

use crate::handlers;
use crate::protocol::ServerMessage;
use crate::state::Coordinator;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::HeaderValue,
    response::{Html, IntoResponse, Json},
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// 라우터 구성
pub fn app(state: Arc<Coordinator>) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/api/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .layer(cors_layer(&state))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(state: &Coordinator) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if state.config.allows_any_origin() {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = state
        .config
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

async fn index_handler() -> Html<&'static str> {
    Html("<h1>PeerShare Signaling</h1><p>WebSocket endpoint: /ws</p>")
}

async fn health_handler(State(state): State<Arc<Coordinator>>) -> Json<serde_json::Value> {
    let (clients, rooms) = {
        let registry = state.lock().await;
        (registry.client_count(), registry.room_count())
    };
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();

    Json(serde_json::json!({
        "status": "ok",
        "server": "peershare-signaling",
        "clients": clients,
        "rooms": rooms,
        "timestamp": timestamp,
    }))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<Coordinator>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// 제어 연결당 태스크 하나
///
/// 송신 메시지는 unbounded 채널을 거쳐 writer 태스크가 소켓에 쓴다.
/// 레지스트리 코드는 소켓을 기다리지 않는다.
async fn handle_socket(socket: WebSocket, state: Arc<Coordinator>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let client_id = handlers::handle_connection(&state, tx).await;

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(err) => tracing::error!(error = %err, "Failed to encode outbound message"),
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                handlers::handle_text(&state, &client_id, &text).await;
            }
            Ok(Message::Close(_)) => break,
            Err(err) => {
                tracing::debug!(client_id = %client_id, error = %err, "WebSocket read failed");
                break;
            }
            _ => {}
        }
    }

    handlers::handle_disconnect(&state, &client_id).await;
    send_task.abort();
}
