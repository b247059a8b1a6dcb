//! 연결 실패 분석과 복구 전략

use super::config::ClientConfig;
use super::peer::{IceConnectionState, PeerConnectionState, SignalingState};
use std::time::Duration;
use tokio::time::Instant;

/// 실패를 알린 신호
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    IceFailed,
    /// 하드 실패 (connectionState `failed`)
    ConnectionFailed,
    /// 유예 후에도 `disconnected`
    Disconnected,
    Timeout,
    SignalingClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    NatTraversalFailed,
    IceConnectivityFailed,
    PeerConnectionFailed,
    ConnectionTimeout,
    RemotePeerDisconnected,
    SignalingClosed,
    Unknown,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::NatTraversalFailed => "nat_traversal_failed",
            FailureReason::IceConnectivityFailed => "ice_connectivity_failed",
            FailureReason::PeerConnectionFailed => "peer_connection_failed",
            FailureReason::ConnectionTimeout => "connection_timeout",
            FailureReason::RemotePeerDisconnected => "remote_peer_disconnected",
            FailureReason::SignalingClosed => "signaling_closed",
            FailureReason::Unknown => "unknown",
        }
    }

    /// 최종 실패 시 사용자 안내
    pub fn user_message(&self) -> &'static str {
        match self {
            FailureReason::NatTraversalFailed => {
                "NAT traversal failed. Your network may be blocking video connections."
            }
            FailureReason::IceConnectivityFailed => "Failed to establish peer-to-peer connection.",
            FailureReason::PeerConnectionFailed => "Peer connection failed due to network issues.",
            FailureReason::ConnectionTimeout => {
                "Connection timed out. Please check your internet connection."
            }
            FailureReason::RemotePeerDisconnected => "The other person has disconnected.",
            FailureReason::SignalingClosed => "Connection to the server was lost.",
            FailureReason::Unknown => "Unknown connection error occurred.",
        }
    }

    /// 상대가 떠났거나 시그널링이 닫혔으면 재시도하지 않는다
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            FailureReason::RemotePeerDisconnected | FailureReason::SignalingClosed
        )
    }
}

/// 실패 시점의 연결 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    pub connection: PeerConnectionState,
    pub ice: IceConnectionState,
    pub signaling: SignalingState,
}

/// 세션이 지켜본 관측치
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Observations {
    /// 마지막 연결/ICE 상태가 상대 활동을 가리킴 (`disconnected`, `closed` 이면 false)
    pub remote_peer_active: bool,
    /// 로컬 후보 수집 완료
    pub candidates_exhausted: bool,
    /// relay 후보를 본 적 있음
    pub relay_seen: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureAnalysis {
    pub kind: FailureKind,
    pub reason: FailureReason,
    pub snapshot: ConnectionSnapshot,
}

pub fn analyze_failure(
    kind: FailureKind,
    snapshot: ConnectionSnapshot,
    observed: Observations,
) -> FailureAnalysis {
    let ice_failed = kind == FailureKind::IceFailed || snapshot.ice == IceConnectionState::Failed;
    let connection_failed =
        kind == FailureKind::ConnectionFailed || snapshot.connection == PeerConnectionState::Failed;

    let reason = match kind {
        FailureKind::SignalingClosed => FailureReason::SignalingClosed,
        _ if snapshot.signaling == SignalingState::Closed => FailureReason::SignalingClosed,
        _ if ice_failed => {
            if !observed.relay_seen && observed.candidates_exhausted {
                FailureReason::NatTraversalFailed
            } else if !observed.remote_peer_active {
                FailureReason::RemotePeerDisconnected
            } else {
                FailureReason::IceConnectivityFailed
            }
        }
        _ if connection_failed => FailureReason::PeerConnectionFailed,
        FailureKind::Timeout => FailureReason::ConnectionTimeout,
        _ => FailureReason::Unknown,
    };

    FailureAnalysis {
        kind,
        reason,
        snapshot,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryMethod {
    IceRestart,
    /// 피어 연결을 새로 만들고 다시 협상
    FullReconnection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryStrategy {
    pub method: RecoveryMethod,
    pub delay: Duration,
}

/// 재시도 상태
#[derive(Debug, Clone)]
pub struct RetryState {
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub last_failure_reason: Option<FailureReason>,
    started_at: Instant,
}

impl RetryState {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempt_count: 0,
            max_attempts,
            last_failure_reason: None,
            started_at: Instant::now(),
        }
    }

    /// 연결 성공 시 카운터만 초기화 (세션 경과 시간은 유지)
    pub fn clear(&mut self) {
        self.attempt_count = 0;
        self.last_failure_reason = None;
    }

    /// 새 페어링 시작
    pub fn restart(&mut self) {
        self.clear();
        self.started_at = Instant::now();
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn should_retry(&self, analysis: &FailureAnalysis) -> bool {
        analysis.reason.is_retryable() && self.attempt_count < self.max_attempts
    }

    pub fn strategy_for(&self, analysis: &FailureAnalysis, config: &ClientConfig) -> RecoveryStrategy {
        let full = analysis.kind == FailureKind::ConnectionFailed
            || analysis.reason == FailureReason::PeerConnectionFailed
            || self.elapsed() > config.full_reconnect_after;

        RecoveryStrategy {
            method: if full {
                RecoveryMethod::FullReconnection
            } else {
                RecoveryMethod::IceRestart
            },
            delay: config.retry_delay(self.attempt_count),
        }
    }

    pub fn record_attempt(&mut self, reason: FailureReason) {
        self.attempt_count += 1;
        self.last_failure_reason = Some(reason);
    }
}
