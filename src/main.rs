//! PairChat 시그널링 서버

use anyhow::Context;
use pairchat::config::Config;
use pairchat::server;
use pairchat::state::AppState;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();

    // 로깅 초기화
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.log_level))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let state = Arc::new(AppState::new(config.clone()));

    // 닫힌 세션 정리 스케줄러
    server::spawn_sweeper(state.clone());

    let app = server::router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!("🚀 PairChat Signaling Server started");
    tracing::info!("Address: {}", addr);
    tracing::info!("WebSocket: ws://{}/ws", addr);
    tracing::info!(turn = config.turn.is_configured(), "TURN provisioning");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
