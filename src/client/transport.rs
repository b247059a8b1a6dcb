//! 시그널링 전송로
//!
//! 보내기는 `SignalTransport`, 받기는 클라이언트 이벤트 채널(`ClientEvent::Server`)로 분리된다.

use super::ClientEvent;
use crate::protocol::{ClientMessage, ServerMessage};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::Notify;
use tokio_tungstenite::tungstenite::Message;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("signaling transport is closed")]
    Closed,
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

pub trait SignalTransport: Send + Sync {
    fn send(&self, message: ClientMessage) -> Result<(), TransportError>;
    fn is_open(&self) -> bool;
    fn close(&self);
}

/// mpsc 채널 기반 전송로
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: UnboundedSender<ClientMessage>,
    closed: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
}

impl ChannelTransport {
    pub fn new(tx: UnboundedSender<ClientMessage>) -> Self {
        Self {
            tx,
            closed: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(Notify::new()),
        }
    }
}

/// 보낸 메시지를 받아볼 수 있는 전송로 (인프로세스 연결, 테스트용)
pub fn channel_transport() -> (ChannelTransport, UnboundedReceiver<ClientMessage>) {
    let (tx, rx) = unbounded_channel();
    (ChannelTransport::new(tx), rx)
}

impl SignalTransport for ChannelTransport {
    fn send(&self, message: ClientMessage) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        self.tx.send(message).map_err(|_| TransportError::Closed)
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.shutdown.notify_one();
    }
}

/// WebSocket 으로 서버에 연결. 수신 프레임은 `events` 로 전달된다
pub async fn connect(
    url: &str,
    events: UnboundedSender<ClientEvent>,
) -> Result<ChannelTransport, TransportError> {
    let (ws_stream, _) = tokio_tungstenite::connect_async(url).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = unbounded_channel::<ClientMessage>();
    let transport = ChannelTransport::new(tx);

    // 송신 태스크
    let shutdown = transport.shutdown.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(msg) = msg else { break };
                    match serde_json::to_string(&msg) {
                        Ok(json) => {
                            if ws_sender.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => tracing::error!(kind = msg.kind(), "Failed to encode message: {}", e),
                    }
                }
                _ = shutdown.notified() => break,
            }
        }
        let _ = ws_sender.close().await;
    });

    // 수신 태스크
    let closed = transport.closed.clone();
    tokio::spawn(async move {
        while let Some(frame) = ws_receiver.next().await {
            match frame {
                Ok(Message::Text(text)) => match ServerMessage::decode(&text) {
                    Ok(msg) => {
                        if events.send(ClientEvent::Server(msg)).is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!("Dropped invalid server frame: {}", e),
                },
                Ok(Message::Close(_)) => break,
                Err(e) => {
                    tracing::debug!("WebSocket receive error: {}", e);
                    break;
                }
                _ => {}
            }
        }
        closed.store(true, Ordering::Release);
        let _ = events.send(ClientEvent::TransportClosed);
    });

    tracing::info!(url, "Signaling transport connected");
    Ok(transport)
}
