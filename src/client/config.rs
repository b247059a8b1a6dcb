//! 클라이언트 협상/재연결 설정

use crate::protocol::{IceConfigData, IceServer, IceServersResponse};
use std::time::Duration;

/// 협상, 복구, 스킵 관련 상수
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub ice_servers: Vec<IceServer>,
    pub ice_candidate_pool_size: u8,
    /// 연결 수립 제한 시간
    pub connection_timeout: Duration,
    /// ICE 재시작 백오프 (시도 순서대로)
    pub retry_delays: Vec<Duration>,
    pub max_retries: u32,
    /// 이 시간을 넘긴 세션은 전체 재연결로 복구
    pub full_reconnect_after: Duration,
    /// `disconnected` 후 재시도 판단까지의 유예
    pub ice_disconnect_grace: Duration,
    pub skip_debounce: Duration,
    pub skip_ack_timeout: Duration,
    /// 재참가 후 pending-skip 게이트 해제까지의 지연
    pub skip_settle_delay: Duration,
    pub heartbeat_interval: Duration,
    pub candidate_queue: CandidateQueueLimits,
}

/// 원격 ICE 후보 대기열 한도
#[derive(Debug, Clone, Copy)]
pub struct CandidateQueueLimits {
    pub max_len: usize,
    /// 넘치면 가장 오래된 것부터 잘라 이 길이로 맞춘다
    pub trim_to: usize,
    pub max_requeue: usize,
    pub max_unknown_intake: usize,
    pub max_unknown_flush: usize,
}

impl Default for CandidateQueueLimits {
    fn default() -> Self {
        Self {
            max_len: 100,
            trim_to: 50,
            max_requeue: 30,
            max_unknown_intake: 50,
            max_unknown_flush: 20,
        }
    }
}

/// 기본 STUN/TURN 목록
pub fn default_ice_servers() -> Vec<IceServer> {
    let mut servers: Vec<IceServer> = [
        "stun:stun.l.google.com:19302",
        "stun:stun1.l.google.com:19302",
        "stun:stun2.l.google.com:19302",
        "stun:stun3.l.google.com:19302",
        "stun:stun4.l.google.com:19302",
    ]
    .iter()
    .map(|url| IceServer::stun(url))
    .collect();

    for url in [
        "turn:openrelay.metered.ca:80",
        "turn:openrelay.metered.ca:443",
        "turn:openrelay.metered.ca:443?transport=tcp",
    ] {
        servers.push(IceServer::turn(url, "openrelayproject", "openrelayproject"));
    }
    servers.push(IceServer::turn(
        "turn:relay1.expressturn.com:3478",
        "efPLPK4Q8MZTQZU3QW",
        "ux9JTBHb1dZt7d7A",
    ));
    servers
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ice_servers: default_ice_servers(),
            ice_candidate_pool_size: 10,
            connection_timeout: Duration::from_millis(7000),
            retry_delays: vec![
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
            ],
            max_retries: 3,
            full_reconnect_after: Duration::from_secs(300),
            ice_disconnect_grace: Duration::from_secs(3),
            skip_debounce: Duration::from_secs(1),
            skip_ack_timeout: Duration::from_secs(5),
            skip_settle_delay: Duration::from_millis(150),
            heartbeat_interval: Duration::from_secs(10),
            candidate_queue: CandidateQueueLimits::default(),
        }
    }
}

impl ClientConfig {
    /// n 번째 재시도(0 부터)의 백오프. 목록보다 길면 마지막 값
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        self.retry_delays
            .get(attempt as usize)
            .or_else(|| self.retry_delays.last())
            .copied()
            .unwrap_or(Duration::from_secs(2))
    }

    /// 서버가 발급한 ICE 목록으로 교체. 비어 있으면 기본 목록을 유지한다
    pub fn apply_ice_config(&mut self, data: IceConfigData) -> bool {
        if data.ice_servers.is_empty() {
            return false;
        }
        tracing::info!(
            servers = data.ice_servers.len(),
            ttl = data.ttl,
            "Using server-issued ICE servers"
        );
        self.ice_servers = data.ice_servers;
        true
    }

    /// `/api/ice-servers` 응답 본문 적용. 실패 응답이면 기본 목록으로 진행
    pub fn apply_ice_response(&mut self, body: &str) -> Result<bool, serde_json::Error> {
        let response: IceServersResponse = serde_json::from_str(body)?;
        match response.data {
            Some(data) if response.success => Ok(self.apply_ice_config(data)),
            _ => {
                tracing::warn!(
                    error = response.error.as_deref().unwrap_or("unknown"),
                    "ICE server config unavailable, using defaults"
                );
                Ok(false)
            }
        }
    }
}
