//! 클라이언트-서버 메시지 프로토콜 정의
//!
//! 모든 프레임은 `{"type": <string>, ...}` 형태의 JSON 텍스트이며,
//! 전송 경계에서 한 번만 디코딩한 뒤 코어 로직은 enum 만 다룬다.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

/// 대기열에서 상대를 찾는 중일 때의 안내 문구
pub const WAITING_MESSAGE: &str = "Looking for people online";

/// 채팅 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    #[default]
    Text,
    Video,
}

impl ChatType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatType::Text => "text",
            ChatType::Video => "video",
        }
    }
}

/// "video" 가 아니면 모두 text 로 취급
fn lenient_chat_type<'de, D>(deserializer: D) -> Result<ChatType, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value.as_str() {
        Some("video") => ChatType::Video,
        _ => ChatType::Text,
    })
}

/// 배열이 아니면 빈 목록, 문자열이 아닌 원소는 무시
fn lenient_interests<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(tag) => Some(tag),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    })
}

/// 숫자(실수 포함)나 숫자 문자열이면 밀리초로, 그 밖의 값은 없는 것으로 본다
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0)
                .map(|f| f as u64)
        }),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    })
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// 클라이언트 → 서버 메시지
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    // Matchmaking
    Join {
        #[serde(default, deserialize_with = "lenient_chat_type")]
        chat_type: ChatType,
        #[serde(default, deserialize_with = "lenient_interests")]
        interests: Vec<String>,
        #[serde(default, skip_serializing_if = "is_false")]
        skip_reconnect: bool,
    },
    Leave {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        skip_id: Option<String>,
        #[serde(default, skip_serializing_if = "is_false")]
        expect_ack: bool,
    },

    // Chat
    Message {
        message: String,
    },
    Typing {
        is_typing: bool,
    },

    // WebRTC Signaling (opaque payloads)
    WebrtcOffer {
        #[serde(default)]
        offer: Value,
    },
    WebrtcAnswer {
        #[serde(default)]
        answer: Value,
    },
    WebrtcIceCandidate {
        #[serde(default)]
        candidate: Value,
    },

    // Connection
    Ping {
        #[serde(
            default,
            deserialize_with = "lenient_timestamp",
            skip_serializing_if = "Option::is_none"
        )]
        timestamp: Option<u64>,
    },

    // Moderation
    NsfwViolation {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        confidence: Option<f64>,
    },
}

impl ClientMessage {
    pub const TYPES: &'static [&'static str] = &[
        "join",
        "leave",
        "message",
        "typing",
        "webrtc_offer",
        "webrtc_answer",
        "webrtc_ice_candidate",
        "ping",
        "nsfw_violation",
    ];

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        decode_envelope(text, Self::TYPES)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Join { .. } => "join",
            ClientMessage::Leave { .. } => "leave",
            ClientMessage::Message { .. } => "message",
            ClientMessage::Typing { .. } => "typing",
            ClientMessage::WebrtcOffer { .. } => "webrtc_offer",
            ClientMessage::WebrtcAnswer { .. } => "webrtc_answer",
            ClientMessage::WebrtcIceCandidate { .. } => "webrtc_ice_candidate",
            ClientMessage::Ping { .. } => "ping",
            ClientMessage::NsfwViolation { .. } => "nsfw_violation",
        }
    }
}

/// 서버 → 클라이언트 메시지
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    // Matchmaking
    StrangerConnected {
        chat_type: ChatType,
    },
    Waiting {
        message: String,
    },
    StrangerDisconnected,
    SkipAcknowledged {
        skip_id: String,
    },

    // Chat relay
    Message {
        message: String,
    },
    Typing {
        is_typing: bool,
        timestamp: u64,
    },

    // WebRTC relay
    WebrtcOffer {
        #[serde(default)]
        offer: Value,
    },
    WebrtcAnswer {
        #[serde(default)]
        answer: Value,
    },
    WebrtcIceCandidate {
        #[serde(default)]
        candidate: Value,
    },

    // Presence / connection
    UserCount {
        count: usize,
    },
    Pong {
        timestamp: u64,
    },

    // Moderation
    NsfwWarning {
        message: String,
        violations: u32,
    },
    PartnerVideoBlocked {
        reason: String,
    },

    Error {
        message: String,
    },
}

impl ServerMessage {
    pub const TYPES: &'static [&'static str] = &[
        "stranger_connected",
        "waiting",
        "stranger_disconnected",
        "skip_acknowledged",
        "message",
        "typing",
        "webrtc_offer",
        "webrtc_answer",
        "webrtc_ice_candidate",
        "user_count",
        "pong",
        "nsfw_warning",
        "partner_video_blocked",
        "error",
    ];

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        decode_envelope(text, Self::TYPES)
    }

    pub fn waiting() -> Self {
        ServerMessage::Waiting {
            message: WAITING_MESSAGE.to_string(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::StrangerConnected { .. } => "stranger_connected",
            ServerMessage::Waiting { .. } => "waiting",
            ServerMessage::StrangerDisconnected => "stranger_disconnected",
            ServerMessage::SkipAcknowledged { .. } => "skip_acknowledged",
            ServerMessage::Message { .. } => "message",
            ServerMessage::Typing { .. } => "typing",
            ServerMessage::WebrtcOffer { .. } => "webrtc_offer",
            ServerMessage::WebrtcAnswer { .. } => "webrtc_answer",
            ServerMessage::WebrtcIceCandidate { .. } => "webrtc_ice_candidate",
            ServerMessage::UserCount { .. } => "user_count",
            ServerMessage::Pong { .. } => "pong",
            ServerMessage::NsfwWarning { .. } => "nsfw_warning",
            ServerMessage::PartnerVideoBlocked { .. } => "partner_video_blocked",
            ServerMessage::Error { .. } => "error",
        }
    }
}

/// 프로토콜 디코딩 오류. 서버는 로그만 남기고 프레임을 버린다.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid JSON frame: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("frame has no string `type` field")]
    MissingType,
    #[error("unknown message type `{0}`")]
    UnknownType(String),
    #[error("malformed `{kind}` message: {source}")]
    Malformed {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

fn decode_envelope<T: DeserializeOwned>(text: &str, known: &[&str]) -> Result<T, ProtocolError> {
    let value: Value = serde_json::from_str(text).map_err(ProtocolError::InvalidJson)?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingType)?
        .to_string();

    if !known.contains(&kind.as_str()) {
        return Err(ProtocolError::UnknownType(kind));
    }

    serde_json::from_value(value).map_err(|source| ProtocolError::Malformed { kind, source })
}

/// ICE 서버 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential_type: Option<String>,
}

impl IceServer {
    pub fn stun(url: &str) -> Self {
        Self {
            urls: vec![url.to_string()],
            username: None,
            credential: None,
            credential_type: None,
        }
    }

    pub fn turn(url: &str, username: &str, credential: &str) -> Self {
        Self {
            urls: vec![url.to_string()],
            username: Some(username.to_string()),
            credential: Some(credential.to_string()),
            credential_type: Some("password".to_string()),
        }
    }
}

/// `/api/ice-servers` 응답 데이터
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceConfigData {
    pub ice_servers: Vec<IceServer>,
    pub ttl: u64,
    pub timestamp: u64,
}

/// `/api/ice-servers` 응답
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceServersResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<IceConfigData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
