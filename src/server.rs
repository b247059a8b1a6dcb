//! HTTP/WebSocket 서버 (라우터, 소켓 루프, 메시지 디스패치)

use crate::handlers::{self, WebRtcKind};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::state::AppState;
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
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// 닫힌 세션 정리 주기
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// 라우터 구성
pub fn router(state: Arc<AppState>) -> Router {
    let origins = if state.config.allows_any_origin() {
        AllowOrigin::any()
    } else {
        let list: Vec<HeaderValue> = state
            .config
            .cors_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        AllowOrigin::list(list)
    };

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .route("/api/users/count", get(user_count_handler))
        .route("/api/ice-servers", get(handlers::ice_servers_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// 전송로가 닫혔는데 남은 세션을 주기적으로 정리
pub fn spawn_sweeper(state: Arc<AppState>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            let swept = state.registry.lock().await.sweep_closed();
            if !swept.is_empty() {
                tracing::info!(count = swept.len(), "Swept closed sessions");
                handlers::broadcast_user_count(&state).await;
            }
        }
    })
}

async fn index_handler() -> Html<&'static str> {
    Html("<h1>PairChat Signaling Server</h1><p>WebSocket endpoint: /ws</p>")
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "server": "pairchat-signaling-rs",
        "timestamp": handlers::unix_secs()
    }))
}

async fn user_count_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let count = state.registry.lock().await.len();
    Json(serde_json::json!({ "count": count }))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    // 송신 태스크
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::error!(kind = msg.kind(), "Failed to encode message: {}", e),
            }
        }
        let _ = ws_sender.close().await;
    });

    let session_id = handlers::handle_connection(state.clone(), tx.clone()).await;

    // 수신 처리
    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => match ClientMessage::decode(&text) {
                Ok(msg) => {
                    if handle_client_message(&state, &session_id, &tx, msg).await.is_break() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(session_id = %session_id, "Dropped invalid frame: {}", e);
                }
            },
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::debug!(session_id = %session_id, "WebSocket receive error: {}", e);
                break;
            }
            _ => {}
        }
    }

    // 연결 해제. 남은 프레임은 잠깐 기다렸다가 버린다
    handlers::handle_disconnect(state, &session_id).await;
    drop(tx);
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut send_task).await.is_err() {
        send_task.abort();
    }
}

/// 디코딩된 메시지를 레지스트리 연산으로 분기
pub async fn handle_client_message(
    state: &Arc<AppState>,
    session_id: &str,
    sender: &mpsc::UnboundedSender<ServerMessage>,
    msg: ClientMessage,
) -> ControlFlow<()> {
    match msg {
        ClientMessage::Ping { timestamp } => {
            handlers::handle_ping(sender, timestamp);
        }
        ClientMessage::Join {
            chat_type,
            interests,
            skip_reconnect,
        } => {
            handlers::handle_join(
                state.clone(),
                session_id,
                sender,
                chat_type,
                interests,
                skip_reconnect,
            )
            .await;
        }
        ClientMessage::Leave { skip_id, expect_ack } => {
            handlers::handle_leave(state.clone(), session_id, sender, skip_id, expect_ack).await;
        }
        ClientMessage::Message { message } => {
            handlers::handle_message(state.clone(), session_id, &message).await;
        }
        ClientMessage::Typing { is_typing } => {
            handlers::handle_typing(state.clone(), session_id, is_typing).await;
        }
        ClientMessage::WebrtcOffer { offer } => {
            handlers::handle_webrtc(state.clone(), session_id, WebRtcKind::Offer, offer).await;
        }
        ClientMessage::WebrtcAnswer { answer } => {
            handlers::handle_webrtc(state.clone(), session_id, WebRtcKind::Answer, answer).await;
        }
        ClientMessage::WebrtcIceCandidate { candidate } => {
            handlers::handle_webrtc(state.clone(), session_id, WebRtcKind::IceCandidate, candidate)
                .await;
        }
        ClientMessage::NsfwViolation { confidence } => {
            return handlers::handle_violation(state.clone(), session_id, confidence).await;
        }
    }
    ControlFlow::Continue(())
}
