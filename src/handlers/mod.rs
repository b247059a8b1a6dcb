//! 핸들러 모듈

pub mod connection;
pub mod matchmaking;
pub mod signaling;
pub mod turn;

pub use connection::*;
pub use matchmaking::*;
pub use signaling::*;
pub use turn::*;

pub use crate::protocol::{unix_millis, unix_secs};
