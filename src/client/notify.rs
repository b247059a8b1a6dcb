//! 사용자 알림 싱크

use super::recovery::FailureReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Success,
    Warning,
    Error,
}

/// 화면 상태 (버튼/애니메이션 전환용)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiState {
    Idle,
    /// 상대 탐색 중. 상대 쪽 연결 애니메이션은 켜지 않는다
    Searching,
    Connecting,
    Connected,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    Status { level: Level, text: String },
    Ui(UiState),
    /// 상대가 보낸 채팅
    Chat { text: String },
    Typing { is_typing: bool },
    UserCount { count: usize },
    /// 미디어 획득 실패. 사용자가 다시 시도해야 한다
    MediaBlocked { message: String, retry: bool },
    /// 재시도 소진 또는 재시도 불가 실패
    TerminalFailure { reason: FailureReason, message: String },
}

impl Notice {
    pub fn status(level: Level, text: impl Into<String>) -> Self {
        Notice::Status {
            level,
            text: text.into(),
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// 알림을 로그로만 남기는 기본 구현
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notice: Notice) {
        match &notice {
            Notice::Status {
                level: Level::Error, ..
            }
            | Notice::TerminalFailure { .. }
            | Notice::MediaBlocked { .. } => tracing::error!(?notice, "Notice"),
            Notice::Status {
                level: Level::Warning,
                ..
            } => tracing::warn!(?notice, "Notice"),
            _ => tracing::info!(?notice, "Notice"),
        }
    }
}
