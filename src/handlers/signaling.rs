//! 릴레이 핸들러 (채팅 메시지 / 타이핑 / WebRTC 시그널링)

use crate::handlers::unix_millis;
use crate::protocol::ServerMessage;
use crate::state::{AppState, RelayOutcome};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

/// 채팅 메시지 릴레이. 거부/속도 제한은 응답 없이 버린다
pub async fn handle_message(state: Arc<AppState>, session_id: &str, text: &str) {
    let outcome = state
        .registry
        .lock()
        .await
        .relay_message(session_id, text, Instant::now());

    match outcome {
        RelayOutcome::Forwarded => {
            tracing::debug!(session_id = %session_id, "Relayed chat message");
        }
        other => {
            tracing::debug!(session_id = %session_id, outcome = ?other, "Chat message dropped");
        }
    }
}

/// 타이핑 표시 릴레이 (서버 시각으로 timestamp 부여)
pub async fn handle_typing(state: Arc<AppState>, session_id: &str, is_typing: bool) {
    let message = ServerMessage::Typing {
        is_typing,
        timestamp: unix_millis(),
    };
    let outcome = state.registry.lock().await.relay_to_partner(session_id, message);
    tracing::debug!(session_id = %session_id, is_typing, outcome = ?outcome, "Typing relay");
}

/// WebRTC 페이로드 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebRtcKind {
    Offer,
    Answer,
    IceCandidate,
}

/// WebRTC 시그널링 릴레이. 페이로드는 검사하지 않고 파트너에게만 전달
pub async fn handle_webrtc(state: Arc<AppState>, session_id: &str, kind: WebRtcKind, payload: Value) {
    let message = match kind {
        WebRtcKind::Offer => ServerMessage::WebrtcOffer { offer: payload },
        WebRtcKind::Answer => ServerMessage::WebrtcAnswer { answer: payload },
        WebRtcKind::IceCandidate => ServerMessage::WebrtcIceCandidate { candidate: payload },
    };

    let outcome = state.registry.lock().await.relay_to_partner(session_id, message);

    match outcome {
        RelayOutcome::Forwarded => {
            tracing::debug!(session_id = %session_id, kind = ?kind, "Relayed WebRTC signal");
        }
        other => {
            tracing::warn!(session_id = %session_id, kind = ?kind, outcome = ?other, "WebRTC signal not relayed");
        }
    }
}
