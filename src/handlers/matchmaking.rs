//! 매칭 핸들러 (join / leave / 위반 신고)

use crate::protocol::{ChatType, ServerMessage};
use crate::state::{AppState, JoinOutcome, ViolationOutcome};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::UnboundedSender;

/// 매칭 요청 처리. leave 이후의 join 은 같은 연결로 세션을 다시 등록한다
pub async fn handle_join(
    state: Arc<AppState>,
    session_id: &str,
    sender: &UnboundedSender<ServerMessage>,
    chat_type: ChatType,
    interests: Vec<String>,
    skip_reconnect: bool,
) {
    let (outcome, reregistered) = {
        let mut registry = state.registry.lock().await;
        let reregistered = !registry.contains(session_id)
            && registry.register(session_id.to_string(), sender.clone());
        (registry.join(session_id, chat_type, interests), reregistered)
    };

    tracing::info!(
        session_id = %session_id,
        chat_type = ?chat_type,
        skip_reconnect,
        outcome = ?outcome,
        "Join processed"
    );

    if reregistered {
        broadcast_user_count(&state).await;
    }
    debug_assert!(outcome != JoinOutcome::NotRegistered);
}

/// 이탈 처리. `expect_ack` 이면 같은 전송로로 skip_acknowledged 를 돌려준다
pub async fn handle_leave(
    state: Arc<AppState>,
    session_id: &str,
    sender: &UnboundedSender<ServerMessage>,
    skip_id: Option<String>,
    expect_ack: bool,
) {
    let removed = state.registry.lock().await.leave(session_id);
    let left = removed.is_some();

    tracing::info!(session_id = %session_id, skip_id = ?skip_id, left, "Leave processed");

    if left {
        broadcast_user_count(&state).await;
    }

    if let (true, Some(skip_id)) = (expect_ack, skip_id) {
        let _ = sender.send(ServerMessage::SkipAcknowledged { skip_id });
    }
}

/// 콘텐츠 정책 위반 처리. 강제 이탈되면 `Break` 를 돌려 연결을 닫게 한다
pub async fn handle_violation(
    state: Arc<AppState>,
    session_id: &str,
    confidence: Option<f64>,
) -> ControlFlow<()> {
    let outcome = state
        .registry
        .lock()
        .await
        .record_violation(session_id, confidence, Instant::now());

    match outcome {
        ViolationOutcome::Disconnected { .. } => {
            broadcast_user_count(&state).await;
            ControlFlow::Break(())
        }
        ViolationOutcome::Warned { .. } | ViolationOutcome::NotRegistered => ControlFlow::Continue(()),
    }
}

/// 현재 등록 세션 수를 모든 연결에 브로드캐스트
pub async fn broadcast_user_count(state: &AppState) {
    let count = state.registry.lock().await.len();
    let mut delivered = 0usize;
    for entry in state.connections.iter() {
        if entry.value().send(ServerMessage::UserCount { count }).is_ok() {
            delivered += 1;
        }
    }
    tracing::debug!(count, delivered, "Broadcast user count");
}
