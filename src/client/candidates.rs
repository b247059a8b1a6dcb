//! 원격 ICE 후보 대기열

use super::config::CandidateQueueLimits;
use super::peer::{IceCandidate, PeerErrorKind};
use std::collections::VecDeque;

/// 후보 적용 실패 분류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateErrorClass {
    /// 다시 시도해도 실패한다. 버린다
    Permanent,
    /// 상태가 바뀌면 성공할 수 있다. 대기열로
    Recoverable,
    Unknown,
}

pub fn classify(kind: &PeerErrorKind) -> CandidateErrorClass {
    match kind {
        PeerErrorKind::Operation | PeerErrorKind::InvalidAccess | PeerErrorKind::NotSupported => {
            CandidateErrorClass::Permanent
        }
        PeerErrorKind::InvalidState | PeerErrorKind::Network => CandidateErrorClass::Recoverable,
        PeerErrorKind::Unknown(_) => CandidateErrorClass::Unknown,
    }
}

/// `None` 항목은 원격 후보 종료 신호
pub type QueuedCandidate = Option<IceCandidate>;

#[derive(Debug)]
pub struct CandidateQueue {
    items: VecDeque<QueuedCandidate>,
    limits: CandidateQueueLimits,
}

impl CandidateQueue {
    pub fn new(limits: CandidateQueueLimits) -> Self {
        Self {
            items: VecDeque::new(),
            limits,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueuedCandidate> {
        self.items.iter()
    }

    /// 추가. 가득 차면 가장 오래된 것부터 잘라낸 뒤 넣는다
    pub fn push(&mut self, candidate: QueuedCandidate) {
        if self.items.len() >= self.limits.max_len {
            let excess = self.items.len() - self.limits.trim_to;
            self.items.drain(..excess);
            tracing::warn!(dropped = excess, "ICE candidate queue overflow, trimmed oldest");
        }
        self.items.push_back(candidate);
    }

    /// 즉시 적용이 실패한 후보 처리. 대기열에 넣었으면 true
    pub fn push_failed(&mut self, candidate: QueuedCandidate, class: CandidateErrorClass) -> bool {
        match class {
            CandidateErrorClass::Permanent => false,
            CandidateErrorClass::Recoverable => {
                self.push(candidate);
                true
            }
            CandidateErrorClass::Unknown => {
                if self.items.len() < self.limits.max_unknown_intake {
                    self.push(candidate);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// 스냅샷 후 비움
    pub fn take_all(&mut self) -> Vec<QueuedCandidate> {
        self.items.drain(..).collect()
    }

    /// 비우고 버린 개수 반환
    pub fn clear(&mut self) -> usize {
        let cleared = self.items.len();
        self.items.clear();
        cleared
    }

    /// flush 에서 남은 후보를 다시 넣는다 (앞에서부터 최대 `max_requeue`)
    pub fn requeue(&mut self, retries: FlushRetries) {
        let total = retries.items.len();
        for candidate in retries.items.into_iter().take(self.limits.max_requeue) {
            self.push(candidate);
        }
        if total > self.limits.max_requeue {
            tracing::warn!(
                dropped = total - self.limits.max_requeue,
                "Requeue limit reached, dropped candidates"
            );
        }
    }

    pub fn retries(&self) -> FlushRetries {
        FlushRetries {
            items: Vec::new(),
            max_unknown: self.limits.max_unknown_flush,
        }
    }
}

/// flush 중 다시 넣을 후보 모음
#[derive(Debug)]
pub struct FlushRetries {
    items: Vec<QueuedCandidate>,
    max_unknown: usize,
}

impl FlushRetries {
    /// 적용 실패 기록. 재시도 대상이면 true
    pub fn record_failure(&mut self, candidate: QueuedCandidate, class: CandidateErrorClass) -> bool {
        let keep = match class {
            CandidateErrorClass::Permanent => false,
            CandidateErrorClass::Recoverable => true,
            CandidateErrorClass::Unknown => self.items.len() < self.max_unknown,
        };
        if keep {
            self.items.push(candidate);
        }
        keep
    }

    /// 시도하지 못한 후보들
    pub fn extend_unattempted(&mut self, rest: impl IntoIterator<Item = QueuedCandidate>) {
        self.items.extend(rest);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
