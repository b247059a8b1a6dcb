//! 관심사별 단일 타이머 슬롯
//!
//! 슬롯 하나에는 항상 최대 하나의 타이머만 걸린다. 다시 걸면 이전 것은 취소되고,
//! 이미 채널에 들어간 이전 발화는 `seq` 가 맞지 않아 무시된다.

use super::ClientEvent;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

/// 타이머 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerId {
    ConnectionTimeout,
    Recovery,
    IceGrace,
    SkipAck,
    SkipSettle,
    Heartbeat,
}

/// 발화 이벤트
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    pub id: TimerId,
    pub seq: u64,
}

#[derive(Debug)]
pub struct TimerSlot {
    id: TimerId,
    seq: u64,
    handle: Option<JoinHandle<()>>,
}

impl TimerSlot {
    pub fn new(id: TimerId) -> Self {
        Self {
            id,
            seq: 0,
            handle: None,
        }
    }

    pub fn id(&self) -> TimerId {
        self.id
    }

    /// 타이머 설정 (기존 타이머는 취소)
    pub fn arm(&mut self, delay: Duration, events: &UnboundedSender<ClientEvent>) {
        self.cancel();
        self.seq += 1;
        let fired = TimerFired {
            id: self.id,
            seq: self.seq,
        };
        let events = events.clone();
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(ClientEvent::Timer(fired));
        }));
    }

    /// 취소. 걸려 있던 타이머가 있었으면 true
    pub fn cancel(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) => {
                handle.abort();
                // 대기열에 남은 발화 무효화
                self.seq += 1;
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.handle.is_some()
    }

    /// 발화 수신 처리. 현재 타이머의 발화면 슬롯을 비우고 true
    pub fn accept(&mut self, fired: TimerFired) -> bool {
        if fired.id != self.id || fired.seq != self.seq || self.handle.is_none() {
            return false;
        }
        self.handle = None;
        true
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
