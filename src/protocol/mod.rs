//! 프로토콜 모듈

pub mod messages;

pub use messages::*;

use std::time::{SystemTime, UNIX_EPOCH};

/// 와이어 타임스탬프 (Unix epoch ms)
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Unix epoch s
pub fn unix_secs() -> u64 {
    unix_millis() / 1000
}
