//! 피어 연결 추상화
//!
//! 실제 WebRTC 스택은 이 트레이트 뒤에 있다. 협상 코어는 상태 조회와
//! 설명(SDP)/후보 적용만 요구하고, 상태 변화는 `PeerEventSink` 로 돌려받는다.

use super::media::MediaTrack;
use super::ClientEvent;
use crate::protocol::IceServer;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    HaveLocalPranswer,
    HaveRemotePranswer,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceGatheringState {
    New,
    Gathering,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// 세션 설명. 와이어 형태는 `{"type": "offer", "sdp": "..."}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Answer,
            sdp: sdp.into(),
        }
    }

    /// `a=fingerprint:<alg> <value>` 의 값 부분. 토큰이 하나뿐이면 그 토큰
    pub fn fingerprint(&self) -> Option<&str> {
        self.sdp.lines().find_map(|line| {
            let rest = line.trim().strip_prefix("a=fingerprint:")?;
            let mut tokens = rest.split_whitespace();
            let first = tokens.next()?;
            Some(tokens.next().unwrap_or(first))
        })
    }
}

/// ICE 후보 (브라우저 `RTCIceCandidateInit` 형태)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: Some("0".to_string()),
            sdp_m_line_index: Some(0),
            username_fragment: None,
        }
    }

    pub fn is_relay(&self) -> bool {
        self.candidate.contains(" typ relay")
    }
}

/// 피어 연결 구성
#[derive(Debug, Clone)]
pub struct RtcConfiguration {
    pub ice_servers: Vec<IceServer>,
    pub ice_candidate_pool_size: u8,
    pub bundle_policy: &'static str,
    pub rtcp_mux_policy: &'static str,
    pub ice_transport_policy: &'static str,
}

impl RtcConfiguration {
    pub fn new(ice_servers: Vec<IceServer>, ice_candidate_pool_size: u8) -> Self {
        Self {
            ice_servers,
            ice_candidate_pool_size,
            bundle_policy: "max-bundle",
            rtcp_mux_policy: "require",
            ice_transport_policy: "all",
        }
    }
}

/// 피어 연결 오류 분류
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerErrorKind {
    InvalidState,
    InvalidAccess,
    Operation,
    NotSupported,
    Network,
    Unknown(String),
}

#[derive(Debug, Clone, Error)]
#[error("{kind:?}: {message}")]
pub struct PeerError {
    pub kind: PeerErrorKind,
    pub message: String,
}

impl PeerError {
    pub fn new(kind: PeerErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// 피어 연결이 보고하는 이벤트
#[derive(Debug, Clone)]
pub enum PeerEvent {
    ConnectionState(PeerConnectionState),
    IceConnectionState(IceConnectionState),
    IceGatheringState(IceGatheringState),
    SignalingState(SignalingState),
    Track(MediaTrack),
    /// `None` 은 후보 수집 종료
    LocalCandidate(Option<IceCandidate>),
}

/// 피어 이벤트를 세대 번호와 함께 클라이언트 이벤트 루프로 보낸다
#[derive(Debug, Clone)]
pub struct PeerEventSink {
    generation: u64,
    events: UnboundedSender<ClientEvent>,
}

impl PeerEventSink {
    pub fn new(generation: u64, events: UnboundedSender<ClientEvent>) -> Self {
        Self { generation, events }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn emit(&self, event: PeerEvent) {
        let _ = self.events.send(ClientEvent::Peer {
            generation: self.generation,
            event,
        });
    }
}

#[async_trait]
pub trait PeerConnection: Send + Sync {
    fn signaling_state(&self) -> SignalingState;
    fn connection_state(&self) -> PeerConnectionState;
    fn ice_connection_state(&self) -> IceConnectionState;
    fn ice_gathering_state(&self) -> IceGatheringState;
    fn local_description(&self) -> Option<SessionDescription>;
    fn remote_description(&self) -> Option<SessionDescription>;

    fn add_track(&self, track: &MediaTrack) -> Result<(), PeerError>;

    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription, PeerError>;
    async fn create_answer(&self) -> Result<SessionDescription, PeerError>;
    async fn set_local_description(&self, description: SessionDescription) -> Result<(), PeerError>;
    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), PeerError>;
    /// 로컬 offer 를 되돌려 `stable` 로 복귀
    async fn rollback(&self) -> Result<(), PeerError>;
    /// `None` 은 원격 후보 종료 신호
    async fn add_ice_candidate(&self, candidate: Option<IceCandidate>) -> Result<(), PeerError>;

    fn restart_ice(&self);
    /// 이후 이벤트를 더 이상 내보내지 않는다
    fn detach_handlers(&self);
    fn close(&self);
}

pub trait PeerConnectionFactory: Send + Sync {
    fn create(
        &self,
        config: &RtcConfiguration,
        events: PeerEventSink,
    ) -> Result<Arc<dyn PeerConnection>, PeerError>;
}
