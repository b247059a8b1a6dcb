//! 애플리케이션 상태 관리
//!
//! 매칭 레지스트리는 동기 구조체 하나이며 `AppState` 의 단일 Mutex 뒤에 있다.
//! 짝짓기/해제는 두 세션 레코드를 동시에 바꾸므로 항상 락 안에서 끝까지 실행된다.

use crate::config::{Config, MatchmakingConfig};
use crate::protocol::{ChatType, ServerMessage};
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc::UnboundedSender, Mutex};

pub type SessionId = String;

/// 파트너에게 보내는 영상 차단 사유
pub const VIDEO_BLOCKED_REASON: &str = "Inappropriate content detected";
const NSFW_WARNING_MESSAGE: &str = "Inappropriate content detected. Video transmission blocked.";

/// 전역 애플리케이션 상태
pub struct AppState {
    /// 매칭 레지스트리 (join/leave/match 직렬화)
    pub registry: Mutex<Registry>,
    /// 열린 모든 연결 (등록 여부와 무관, presence 브로드캐스트용)
    pub connections: DashMap<SessionId, UnboundedSender<ServerMessage>>,
    /// 설정
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            registry: Mutex::new(Registry::new(config.matchmaking.clone())),
            connections: DashMap::new(),
            config: Arc::new(config),
        }
    }
}

/// 정책 위반 기록
#[derive(Debug, Clone)]
pub struct Violation {
    pub at: Instant,
    pub confidence: Option<f64>,
}

/// 사용자 세션 (연결 하나의 수명)
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub sender: UnboundedSender<ServerMessage>,
    pub chat_type: ChatType,
    pub interests: HashSet<String>,
    pub partner_id: Option<SessionId>,
    pub waiting: bool,
    pub last_message_at: Option<Instant>,
    pub violations: Vec<Violation>,
    pub connected_at: Instant,
}

impl Session {
    pub fn new(id: SessionId, sender: UnboundedSender<ServerMessage>) -> Self {
        Self {
            id,
            sender,
            chat_type: ChatType::Text,
            interests: HashSet::new(),
            partner_id: None,
            waiting: false,
            last_message_at: None,
            violations: Vec::new(),
            connected_at: Instant::now(),
        }
    }

    pub fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }

    /// best-effort 전송. 닫힌 전송로면 로그만 남기고 버린다.
    pub fn send(&self, message: ServerMessage) -> bool {
        let kind = message.kind();
        if self.sender.send(message).is_err() {
            tracing::debug!(session_id = %self.id, kind, "Transport closed, message dropped");
            return false;
        }
        true
    }
}

/// join 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    Matched { partner_id: SessionId },
    Waiting,
    /// 알림 시점에 한쪽 전송로가 닫혀 짝짓기를 되돌림
    RolledBack,
    NotRegistered,
}

/// 릴레이 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    Forwarded,
    NoPartner,
    Rejected,
    RateLimited,
    PartnerUnavailable,
}

/// 위반 처리 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationOutcome {
    Warned { violations: u32 },
    Disconnected { violations: u32 },
    NotRegistered,
}

/// 관심사 조건: 한쪽이 비어 있거나 공통 태그가 하나라도 있으면 매칭 가능
pub fn interests_compatible(a: &HashSet<String>, b: &HashSet<String>) -> bool {
    a.is_empty() || b.is_empty() || !a.is_disjoint(b)
}

/// 세션 레지스트리 + 파트너 매처
pub struct Registry {
    sessions: HashMap<SessionId, Session>,
    /// 삽입 순서 (first-fit 탐색 순서)
    order: Vec<SessionId>,
    limits: MatchmakingConfig,
}

impl Registry {
    pub fn new(limits: MatchmakingConfig) -> Self {
        Self {
            sessions: HashMap::new(),
            order: Vec::new(),
            limits,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Session> {
        self.sessions.get(id)
    }

    pub fn partner_of(&self, id: &str) -> Option<&str> {
        self.sessions.get(id)?.partner_id.as_deref()
    }

    /// 세션 등록. 이미 있으면 false
    pub fn register(&mut self, id: SessionId, sender: UnboundedSender<ServerMessage>) -> bool {
        if self.sessions.contains_key(&id) {
            return false;
        }
        self.order.push(id.clone());
        self.sessions.insert(id.clone(), Session::new(id, sender));
        true
    }

    /// 매칭 요청 처리
    pub fn join(&mut self, id: &str, chat_type: ChatType, interests: Vec<String>) -> JoinOutcome {
        if !self.sessions.contains_key(id) {
            return JoinOutcome::NotRegistered;
        }

        // 이미 짝이 있으면 먼저 해제하고 상대에게 알림
        self.unpair(id);

        if let Some(session) = self.sessions.get_mut(id) {
            session.chat_type = chat_type;
            session.interests = interests.into_iter().collect();
            session.waiting = false;
        }

        let outcome = match self.find_partner(id) {
            Some(partner_id) => self.pair(id, &partner_id),
            None => {
                if let Some(session) = self.sessions.get_mut(id) {
                    session.waiting = true;
                    session.send(ServerMessage::waiting());
                }
                tracing::info!(session_id = %id, chat_type = ?chat_type, "No partner yet, waiting");
                JoinOutcome::Waiting
            }
        };

        debug_assert!(self.pairing_is_consistent());
        outcome
    }

    /// 대기 중인 호환 세션을 삽입 순서대로 찾는다 (first-fit)
    pub fn find_partner(&self, id: &str) -> Option<SessionId> {
        let me = self.sessions.get(id)?;
        self.order
            .iter()
            .filter(|other| other.as_str() != id)
            .filter_map(|other| self.sessions.get(other))
            .find(|candidate| {
                candidate.waiting
                    && candidate.partner_id.is_none()
                    && candidate.chat_type == me.chat_type
                    && interests_compatible(&me.interests, &candidate.interests)
            })
            .map(|candidate| candidate.id.clone())
    }

    fn pair(&mut self, joiner_id: &str, partner_id: &str) -> JoinOutcome {
        for (id, other) in [(joiner_id, partner_id), (partner_id, joiner_id)] {
            if let Some(session) = self.sessions.get_mut(id) {
                session.partner_id = Some(other.to_string());
                session.waiting = false;
            }
        }

        let joiner_open = self.sessions.get(joiner_id).is_some_and(Session::is_open);
        let partner_open = self.sessions.get(partner_id).is_some_and(Session::is_open);

        if joiner_open && partner_open {
            for id in [joiner_id, partner_id] {
                if let Some(session) = self.sessions.get(id) {
                    session.send(ServerMessage::StrangerConnected {
                        chat_type: session.chat_type,
                    });
                }
            }
            tracing::info!(session_id = %joiner_id, partner_id = %partner_id, "Strangers paired");
            return JoinOutcome::Matched {
                partner_id: partner_id.to_string(),
            };
        }

        // 롤백: 열린 쪽만 다시 대기열로
        for (id, open) in [(joiner_id, joiner_open), (partner_id, partner_open)] {
            if let Some(session) = self.sessions.get_mut(id) {
                session.partner_id = None;
                session.waiting = open;
                if open {
                    session.send(ServerMessage::waiting());
                }
            }
        }
        tracing::warn!(
            session_id = %joiner_id,
            partner_id = %partner_id,
            joiner_open,
            partner_open,
            "Transport closed during pairing, rolled back"
        );
        JoinOutcome::RolledBack
    }

    /// 짝 해제. 상대가 남아 있으면 partner 를 비우고 stranger_disconnected 전송
    fn unpair(&mut self, id: &str) -> Option<SessionId> {
        let partner_id = self.sessions.get_mut(id)?.partner_id.take()?;
        if let Some(partner) = self.sessions.get_mut(&partner_id) {
            if partner.partner_id.as_deref() == Some(id) {
                partner.partner_id = None;
                partner.send(ServerMessage::StrangerDisconnected);
            }
        }
        tracing::info!(session_id = %id, partner_id = %partner_id, "Pairing dissolved");
        Some(partner_id)
    }

    /// 세션 제거. 제거된 세션 반환
    pub fn leave(&mut self, id: &str) -> Option<Session> {
        self.unpair(id);
        let removed = self.sessions.remove(id)?;
        self.order.retain(|other| other != id);
        debug_assert!(self.pairing_is_consistent());
        tracing::debug!(
            session_id = %id,
            connected_secs = removed.connected_at.elapsed().as_secs(),
            violations = removed.violations.len(),
            "Session removed"
        );
        Some(removed)
    }

    /// 채팅 메시지 릴레이 (검증 + 속도 제한)
    pub fn relay_message(&mut self, id: &str, text: &str, now: Instant) -> RelayOutcome {
        let Some(session) = self.sessions.get_mut(id) else {
            return RelayOutcome::NoPartner;
        };
        let Some(partner_id) = session.partner_id.clone() else {
            return RelayOutcome::NoPartner;
        };

        let length = text.chars().count();
        if length == 0 || length > self.limits.max_message_length {
            return RelayOutcome::Rejected;
        }

        if let Some(last) = session.last_message_at {
            if now.saturating_duration_since(last) < self.limits.message_cooldown {
                tracing::debug!(session_id = %id, "Message rate limited");
                return RelayOutcome::RateLimited;
            }
        }
        session.last_message_at = Some(now);

        self.send_to(
            &partner_id,
            ServerMessage::Message {
                message: text.to_string(),
            },
        )
    }

    /// 파트너에게 그대로 전달 (typing, webrtc_*)
    pub fn relay_to_partner(&self, id: &str, message: ServerMessage) -> RelayOutcome {
        let Some(partner_id) = self.partner_of(id) else {
            return RelayOutcome::NoPartner;
        };
        self.send_to(partner_id, message)
    }

    fn send_to(&self, id: &str, message: ServerMessage) -> RelayOutcome {
        match self.sessions.get(id) {
            Some(target) if target.send(message) => RelayOutcome::Forwarded,
            _ => RelayOutcome::PartnerUnavailable,
        }
    }

    /// 콘텐츠 정책 위반 처리. 한도에 도달하면 세션을 강제로 내보낸다
    pub fn record_violation(&mut self, id: &str, confidence: Option<f64>, now: Instant) -> ViolationOutcome {
        let Some(session) = self.sessions.get_mut(id) else {
            return ViolationOutcome::NotRegistered;
        };
        session.violations.push(Violation { at: now, confidence });
        let violations = session.violations.len() as u32;
        let partner_id = session.partner_id.clone();
        let since_first = session
            .violations
            .first()
            .map(|first| now.saturating_duration_since(first.at).as_secs())
            .unwrap_or(0);

        tracing::warn!(
            session_id = %id,
            violations,
            since_first_secs = since_first,
            confidence = ?confidence,
            "Content violation reported"
        );

        if let Some(partner_id) = partner_id {
            self.send_to(
                &partner_id,
                ServerMessage::PartnerVideoBlocked {
                    reason: VIDEO_BLOCKED_REASON.to_string(),
                },
            );
        }

        if let Some(session) = self.sessions.get(id) {
            session.send(ServerMessage::NsfwWarning {
                message: NSFW_WARNING_MESSAGE.to_string(),
                violations,
            });
        }

        if violations >= self.limits.max_violations {
            tracing::info!(session_id = %id, violations, "Session force-disconnected for repeated violations");
            self.leave(id);
            return ViolationOutcome::Disconnected { violations };
        }
        ViolationOutcome::Warned { violations }
    }

    /// 전송로가 닫혔는데 남아 있는 세션 정리
    pub fn sweep_closed(&mut self) -> Vec<SessionId> {
        let closed: Vec<SessionId> = self
            .order
            .iter()
            .filter(|id| self.sessions.get(id.as_str()).is_some_and(|s| !s.is_open()))
            .cloned()
            .collect();
        for id in &closed {
            self.leave(id);
        }
        closed
    }

    /// 짝 관계 불변식: 대칭, 자기 자신과의 짝 없음, 짝이 있으면 대기 아님
    pub fn pairing_is_consistent(&self) -> bool {
        self.sessions.values().all(|session| match session.partner_id.as_deref() {
            None => true,
            Some(partner_id) => {
                partner_id != session.id
                    && !session.waiting
                    && self
                        .sessions
                        .get(partner_id)
                        .map_or(true, |partner| partner.partner_id.as_deref() == Some(session.id.as_str()))
            }
        })
    }
}
