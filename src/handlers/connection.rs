//! 연결 핸들러

use crate::handlers::broadcast_user_count;
use crate::protocol::ServerMessage;
use crate::state::{AppState, SessionId};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

/// 새 연결 처리. 세션을 등록하고 접속자 수를 알린다
pub async fn handle_connection(
    state: Arc<AppState>,
    sender: UnboundedSender<ServerMessage>,
) -> SessionId {
    let session_id = Uuid::new_v4().to_string();

    state.connections.insert(session_id.clone(), sender.clone());
    state.registry.lock().await.register(session_id.clone(), sender);

    tracing::info!(session_id = %session_id, "New connection established");
    broadcast_user_count(&state).await;
    session_id
}

/// 연결 해제 처리
pub async fn handle_disconnect(state: Arc<AppState>, session_id: &str) {
    state.connections.remove(session_id);
    let removed = state.registry.lock().await.leave(session_id);

    tracing::info!(
        session_id = %session_id,
        registered = removed.is_some(),
        "Connection closed"
    );
    broadcast_user_count(&state).await;
}

/// Ping 처리. 등록 여부와 쿨다운에 관계없이 항상 응답한다
pub fn handle_ping(sender: &UnboundedSender<ServerMessage>, timestamp: Option<u64>) {
    let timestamp = timestamp.unwrap_or_else(crate::handlers::unix_millis);
    let _ = sender.send(ServerMessage::Pong { timestamp });
}
