//! 환경 변수 기반 설정 관리

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// 서버 설정
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub host: String,
    pub cors_origins: Vec<String>,
    pub matchmaking: MatchmakingConfig,
    pub turn: TurnConfig,
    pub log_level: String,
}

/// 매칭/릴레이 제한
#[derive(Debug, Clone)]
pub struct MatchmakingConfig {
    pub max_message_length: usize,
    pub message_cooldown: Duration,
    pub max_violations: u32,
}

impl Default for MatchmakingConfig {
    fn default() -> Self {
        Self {
            max_message_length: 500,
            message_cooldown: Duration::from_millis(500),
            max_violations: 3,
        }
    }
}

/// TURN 서버 설정
#[derive(Debug, Clone, Default)]
pub struct TurnConfig {
    pub url: String,
    pub secret: String,
    pub enable_tls: bool,
    pub enable_udp: bool,
    pub enable_tcp: bool,
    pub ports: TurnPorts,
    pub credential_ttl: u64,
    pub fallback_servers: Vec<String>,
}

impl TurnConfig {
    pub fn is_configured(&self) -> bool {
        !self.url.is_empty() && !self.secret.is_empty()
    }
}

/// TURN 포트 설정
#[derive(Debug, Clone)]
pub struct TurnPorts {
    pub udp: u16,
    pub tcp: u16,
    pub tls: u16,
}

impl Default for TurnPorts {
    fn default() -> Self {
        Self {
            udp: 3478,
            tcp: 3478,
            tls: 443,
        }
    }
}

fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl Config {
    /// 환경 변수에서 설정 로드
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let defaults = MatchmakingConfig::default();

        Self {
            port: parse_or("PORT", 5000),
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            cors_origins: split_list(&env::var("CORS_ORIGINS").unwrap_or_else(|_| "*".to_string())),
            matchmaking: MatchmakingConfig {
                max_message_length: parse_or("MAX_MESSAGE_LENGTH", defaults.max_message_length),
                message_cooldown: Duration::from_millis(parse_or("MESSAGE_COOLDOWN_MS", 500)),
                max_violations: parse_or("MAX_VIOLATIONS", defaults.max_violations),
            },
            turn: TurnConfig {
                url: env::var("TURN_SERVER_URL").unwrap_or_default(),
                secret: env::var("TURN_SECRET").unwrap_or_default(),
                enable_tls: env::var("TURN_ENABLE_TLS")
                    .map(|v| v == "true")
                    .unwrap_or(false),
                enable_udp: env::var("TURN_ENABLE_UDP")
                    .map(|v| v != "false")
                    .unwrap_or(true),
                enable_tcp: env::var("TURN_ENABLE_TCP")
                    .map(|v| v != "false")
                    .unwrap_or(true),
                ports: TurnPorts {
                    udp: parse_or("TURN_PORT_UDP", 3478),
                    tcp: parse_or("TURN_PORT_TCP", 3478),
                    tls: parse_or("TURN_PORT_TLS", 443),
                },
                credential_ttl: parse_or("TURN_CREDENTIAL_TTL", 3600),
                fallback_servers: split_list(&env::var("TURN_FALLBACK_SERVERS").unwrap_or_default()),
            },
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        }
    }

    pub fn allows_any_origin(&self) -> bool {
        self.cors_origins.is_empty() || self.cors_origins.iter().any(|o| o == "*")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5000,
            host: "0.0.0.0".to_string(),
            cors_origins: vec!["*".to_string()],
            matchmaking: MatchmakingConfig::default(),
            turn: TurnConfig {
                enable_udp: true,
                enable_tcp: true,
                credential_ttl: 3600,
                ..TurnConfig::default()
            },
            log_level: "info".to_string(),
        }
    }
}
