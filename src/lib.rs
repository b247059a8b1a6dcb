//! PairChat 매칭/시그널링 서버와 클라이언트 협상 코어

pub mod client;
pub mod config;
pub mod handlers;
pub mod protocol;
pub mod server;
pub mod state;
