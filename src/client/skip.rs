//! 스킵/재연결 조정
//!
//! 스킵은 원격 쪽만 정리하고 `leave{skipId, expectAck}` 를 보낸 뒤, 서버 확인 또는
//! 제한 시간 만료 중 먼저 오는 쪽에서 다시 `join` 한다. 확인 대기 중에 이전 상대가
//! 보낸 `stranger_disconnected` 는 스킵의 부수 효과이므로 걸러낸다.

use super::config::ClientConfig;
use super::timer::{TimerFired, TimerId, TimerSlot};
use super::ClientEvent;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SkipRejection {
    #[error("skip requested too soon after the previous one")]
    Debounced,
    #[error("a skip is already in flight")]
    InFlight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipPhase {
    /// 서버 확인 대기
    AwaitingAck,
    /// 재참가 전송 후 게이트 해제 대기
    Settling,
}

#[derive(Debug, Clone)]
struct PendingSkip {
    skip_id: String,
    phase: SkipPhase,
}

/// `skip_<ms>_<9자 난수>`
pub fn new_skip_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect();
    format!("skip_{}_{}", crate::protocol::unix_millis(), suffix)
}

pub struct SkipCoordinator {
    config: Arc<ClientConfig>,
    last_skip_at: Option<Instant>,
    pending: Option<PendingSkip>,
    ack_timer: TimerSlot,
    settle_timer: TimerSlot,
}

impl SkipCoordinator {
    pub fn new(config: Arc<ClientConfig>) -> Self {
        Self {
            config,
            last_skip_at: None,
            pending: None,
            ack_timer: TimerSlot::new(TimerId::SkipAck),
            settle_timer: TimerSlot::new(TimerId::SkipSettle),
        }
    }

    pub fn pending_skip_id(&self) -> Option<&str> {
        self.pending.as_ref().map(|p| p.skip_id.as_str())
    }

    pub fn phase(&self) -> Option<SkipPhase> {
        self.pending.as_ref().map(|p| p.phase)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn armed_timers(&self) -> Vec<TimerId> {
        [&self.ack_timer, &self.settle_timer]
            .into_iter()
            .filter(|slot| slot.is_armed())
            .map(TimerSlot::id)
            .collect()
    }

    /// 스킵 요청. 허용되면 새 skipId
    pub fn request(&mut self, now: Instant) -> Result<String, SkipRejection> {
        if self.pending.is_some() {
            return Err(SkipRejection::InFlight);
        }
        if let Some(last) = self.last_skip_at {
            if now.saturating_duration_since(last) < self.config.skip_debounce {
                return Err(SkipRejection::Debounced);
            }
        }

        let skip_id = new_skip_id();
        self.last_skip_at = Some(now);
        self.pending = Some(PendingSkip {
            skip_id: skip_id.clone(),
            phase: SkipPhase::AwaitingAck,
        });
        Ok(skip_id)
    }

    pub fn arm_ack_timer(&mut self, events: &UnboundedSender<ClientEvent>) {
        self.ack_timer.arm(self.config.skip_ack_timeout, events);
    }

    /// 서버 확인. 대기 중인 스킵과 맞으면 true (진행해야 함)
    pub fn on_ack(&mut self, skip_id: &str) -> bool {
        match &self.pending {
            Some(p) if p.phase == SkipPhase::AwaitingAck && p.skip_id == skip_id => {
                self.ack_timer.cancel();
                true
            }
            _ => {
                tracing::debug!(skip_id, "Unexpected skip acknowledgment ignored");
                false
            }
        }
    }

    /// 확인 제한 시간 만료. 진행해야 하면 true
    pub fn on_ack_timeout(&mut self, fired: TimerFired) -> bool {
        if !self.ack_timer.accept(fired) {
            return false;
        }
        let awaiting = self.phase() == Some(SkipPhase::AwaitingAck);
        if awaiting {
            tracing::warn!(skip_id = ?self.pending_skip_id(), "Skip acknowledgment timed out, proceeding");
        }
        awaiting
    }

    /// 재참가 전송 후 호출
    pub fn proceeded(&mut self, events: &UnboundedSender<ClientEvent>) {
        if let Some(pending) = &mut self.pending {
            pending.phase = SkipPhase::Settling;
            self.settle_timer.arm(self.config.skip_settle_delay, events);
        }
    }

    /// 게이트 해제 타이머
    pub fn on_settle(&mut self, fired: TimerFired) -> bool {
        if !self.settle_timer.accept(fired) {
            return false;
        }
        if let Some(pending) = self.pending.take() {
            tracing::debug!(skip_id = %pending.skip_id, "Skip settled");
        }
        true
    }

    /// 새 상대와 연결되면 이후 disconnect 는 새 상대의 것이다
    pub fn on_new_partner(&mut self) {
        if self.phase() == Some(SkipPhase::Settling) {
            self.settle_timer.cancel();
            self.pending = None;
        }
    }

    /// 이전 상대의 disconnect 를 걸러야 하는지
    pub fn suppresses_disconnect(&self) -> bool {
        self.pending.is_some()
    }

    /// 종료 시 모두 취소
    pub fn cancel(&mut self) {
        self.ack_timer.cancel();
        self.settle_timer.cancel();
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn coordinator() -> SkipCoordinator {
        SkipCoordinator::new(Arc::new(ClientConfig::default()))
    }

    #[test]
    fn skip_id_has_expected_shape() {
        let id = new_skip_id();
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "skip");
        assert!(parts[1].parse::<u64>().is_ok());
        assert_eq!(parts[2].len(), 9);
    }

    #[tokio::test(start_paused = true)]
    async fn second_skip_inside_debounce_is_rejected() {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let mut skip = coordinator();
        let t0 = Instant::now();

        let id = skip.request(t0).unwrap();
        assert_eq!(skip.request(t0), Err(SkipRejection::InFlight));

        assert!(skip.on_ack(&id));
        skip.proceeded(&tx);
        skip.cancel();

        assert_eq!(
            skip.request(t0 + Duration::from_millis(999)),
            Err(SkipRejection::Debounced)
        );
        assert!(skip.request(t0 + Duration::from_millis(1000)).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_or_foreign_ack_is_ignored() {
        let mut skip = coordinator();
        let id = skip.request(Instant::now()).unwrap();
        assert!(!skip.on_ack("skip_0_other"));
        assert!(skip.suppresses_disconnect());
        assert!(skip.on_ack(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn gate_stays_closed_until_settled() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut skip = coordinator();
        let id = skip.request(Instant::now()).unwrap();
        skip.arm_ack_timer(&tx);
        assert_eq!(skip.armed_timers(), vec![TimerId::SkipAck]);

        assert!(skip.on_ack(&id));
        assert!(skip.armed_timers().is_empty());
        skip.proceeded(&tx);
        assert_eq!(skip.armed_timers(), vec![TimerId::SkipSettle]);
        assert!(skip.suppresses_disconnect());

        let Some(ClientEvent::Timer(fired)) = rx.recv().await else {
            panic!("expected settle timer");
        };
        assert!(skip.on_settle(fired));
        assert!(!skip.suppresses_disconnect());
    }
}
