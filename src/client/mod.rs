//! 클라이언트 코어
//!
//! 이벤트 루프 하나가 서버 메시지, 피어 연결 이벤트, 타이머, 사용자 명령을 순서대로
//! 처리한다. 로컬 스트림은 `Client` 가 소유하며 전체 종료(`exit`)에서만 멈춘다.

pub mod candidates;
pub mod config;
pub mod media;
pub mod negotiation;
pub mod notify;
pub mod peer;
pub mod recovery;
pub mod skip;
pub mod timer;
pub mod transport;

pub use config::ClientConfig;
pub use negotiation::{NegotiationSession, Role};
pub use notify::{Level, Notice, Notifier, UiState};
pub use skip::SkipCoordinator;

use crate::protocol::{unix_millis, ChatType, ClientMessage, ServerMessage};
use media::{acquire_local_stream, LocalStream, MediaCapture, MediaError};
use negotiation::{Collaborators, NegotiationError};
use peer::{PeerConnectionFactory, PeerEvent};
use recovery::FailureKind;
use std::ops::ControlFlow;
use std::sync::Arc;
use timer::{TimerFired, TimerId, TimerSlot};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use transport::SignalTransport;

/// 클라이언트 이벤트 루프 입력
#[derive(Debug)]
pub enum ClientEvent {
    Server(ServerMessage),
    Peer { generation: u64, event: PeerEvent },
    Timer(TimerFired),
    Command(UserCommand),
    TransportClosed,
}

/// 사용자 조작
#[derive(Debug, Clone, PartialEq)]
pub enum UserCommand {
    Start {
        chat_type: ChatType,
        interests: Vec<String>,
    },
    Skip,
    SendMessage(String),
    Typing(bool),
    ReportViolation { confidence: Option<f64> },
    Exit,
}

pub struct Client {
    config: Arc<ClientConfig>,
    transport: Arc<dyn SignalTransport>,
    media: Arc<dyn MediaCapture>,
    notifier: Arc<dyn Notifier>,
    events_tx: UnboundedSender<ClientEvent>,
    events_rx: UnboundedReceiver<ClientEvent>,
    chat_type: ChatType,
    interests: Vec<String>,
    local_stream: Option<LocalStream>,
    negotiation: NegotiationSession,
    skip: SkipCoordinator,
    heartbeat: TimerSlot,
    awaiting_pong: Option<u64>,
    paired: bool,
    /// 현재 상대와 영상 협상 중
    video_pairing: bool,
    exited: bool,
}

impl Client {
    /// 이벤트 채널을 만들어 클라이언트 생성. 송신 쪽은 `event_sender` 로 얻는다
    pub fn new(
        config: ClientConfig,
        factory: Arc<dyn PeerConnectionFactory>,
        transport: Arc<dyn SignalTransport>,
        media: Arc<dyn MediaCapture>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let (events_tx, events_rx) = unbounded_channel();
        Self::with_channel(config, factory, transport, media, notifier, events_tx, events_rx)
    }

    /// 이미 만든 이벤트 채널 사용 (`transport::connect` 와 같은 채널을 공유할 때)
    pub fn with_channel(
        config: ClientConfig,
        factory: Arc<dyn PeerConnectionFactory>,
        transport: Arc<dyn SignalTransport>,
        media: Arc<dyn MediaCapture>,
        notifier: Arc<dyn Notifier>,
        events_tx: UnboundedSender<ClientEvent>,
        events_rx: UnboundedReceiver<ClientEvent>,
    ) -> Self {
        let config = Arc::new(config);
        let negotiation = NegotiationSession::new(
            config.clone(),
            Collaborators {
                factory,
                transport: transport.clone(),
                notifier: notifier.clone(),
                events: events_tx.clone(),
            },
        );
        Self {
            skip: SkipCoordinator::new(config.clone()),
            config,
            transport,
            media,
            notifier,
            events_tx,
            events_rx,
            chat_type: ChatType::Text,
            interests: Vec::new(),
            local_stream: None,
            negotiation,
            heartbeat: TimerSlot::new(TimerId::Heartbeat),
            awaiting_pong: None,
            paired: false,
            video_pairing: false,
            exited: false,
        }
    }

    pub fn event_sender(&self) -> UnboundedSender<ClientEvent> {
        self.events_tx.clone()
    }

    pub fn local_stream(&self) -> Option<&LocalStream> {
        self.local_stream.as_ref()
    }

    pub fn negotiation(&self) -> &NegotiationSession {
        &self.negotiation
    }

    /// 동점 처리 규칙 교체 등 협상 세션 설정용
    pub fn negotiation_mut(&mut self) -> &mut NegotiationSession {
        &mut self.negotiation
    }

    pub fn skip_state(&self) -> &SkipCoordinator {
        &self.skip
    }

    pub fn is_paired(&self) -> bool {
        self.paired
    }

    pub fn has_exited(&self) -> bool {
        self.exited
    }

    pub fn heartbeat_armed(&self) -> bool {
        self.heartbeat.is_armed()
    }

    fn notify(&self, notice: Notice) {
        self.notifier.notify(notice);
    }

    /// 영상 페어링 중이 아니면 시그널링 페이로드를 버린다
    fn accepts_signaling(&self, kind: &'static str) -> bool {
        let active = self.paired && self.video_pairing && !self.exited;
        if !active {
            tracing::debug!(kind, "Signaling outside a video pairing dropped");
        }
        active
    }

    fn send(&self, message: ClientMessage) {
        let kind = message.kind();
        if let Err(e) = self.transport.send(message) {
            tracing::warn!(kind, "Failed to send to server: {}", e);
        }
    }

    /// 협상 오류는 일시 알림으로만 표시한다
    fn report(&self, context: &'static str, result: Result<(), NegotiationError>) {
        if let Err(e) = result {
            tracing::warn!(context, "Negotiation error: {}", e);
            self.notify(Notice::status(
                Level::Warning,
                "Video connection problem, trying to recover...",
            ));
        }
    }

    /// 로컬 미디어 준비. 이미 활성 스트림이 있으면 그대로 쓴다
    pub async fn ensure_local_media(&mut self) -> Result<(), MediaError> {
        if self.local_stream.as_ref().is_some_and(LocalStream::is_active) {
            return Ok(());
        }
        match acquire_local_stream(self.media.as_ref()).await {
            Ok(acquired) => {
                if acquired.video_only {
                    self.notify(Notice::status(
                        Level::Info,
                        "No microphone detected, continuing with video only",
                    ));
                }
                self.negotiation
                    .set_local_stream(Some(acquired.stream.clone()));
                self.local_stream = Some(acquired.stream);
                Ok(())
            }
            Err(e) => {
                self.notify(Notice::MediaBlocked {
                    message: e.user_message().to_string(),
                    retry: true,
                });
                Err(e)
            }
        }
    }

    /// 매칭 시작
    pub async fn start(&mut self, chat_type: ChatType, interests: Vec<String>) -> Result<(), MediaError> {
        self.chat_type = chat_type;
        self.interests = interests;
        self.exited = false;

        if chat_type == ChatType::Video {
            self.ensure_local_media().await?;
        }

        self.send(ClientMessage::Join {
            chat_type,
            interests: self.interests.clone(),
            skip_reconnect: false,
        });
        if !self.heartbeat.is_armed() {
            self.heartbeat
                .arm(self.config.heartbeat_interval, &self.events_tx);
        }
        self.notify(Notice::Ui(UiState::Searching));
        tracing::info!(chat_type = chat_type.as_str(), "Matchmaking started");
        Ok(())
    }

    /// 이벤트 하나 처리
    pub async fn handle_event(&mut self, event: ClientEvent) -> ControlFlow<()> {
        match event {
            ClientEvent::Server(message) => self.handle_server_message(message).await,
            ClientEvent::Peer { generation, event } => {
                let result = self.negotiation.on_peer_event(generation, event).await;
                self.report("peer_event", result);
            }
            ClientEvent::Timer(fired) => self.handle_timer(fired).await,
            ClientEvent::Command(command) => return self.handle_command(command).await,
            ClientEvent::TransportClosed => self.on_transport_closed(),
        }
        ControlFlow::Continue(())
    }

    /// 다음 이벤트를 기다려 처리. 채널이 닫히면 `Break`
    pub async fn step(&mut self) -> ControlFlow<()> {
        match self.events_rx.recv().await {
            Some(event) => self.handle_event(event).await,
            None => ControlFlow::Break(()),
        }
    }

    /// 종료 명령까지 이벤트 루프 실행
    pub async fn run(mut self) {
        while self.step().await.is_continue() {}
        tracing::info!("Client event loop stopped");
    }

    async fn handle_command(&mut self, command: UserCommand) -> ControlFlow<()> {
        match command {
            UserCommand::Start { chat_type, interests } => {
                if let Err(e) = self.start(chat_type, interests).await {
                    tracing::warn!("Start failed: {}", e);
                }
            }
            UserCommand::Skip => {
                self.skip().await;
            }
            UserCommand::SendMessage(message) => {
                if self.paired {
                    self.send(ClientMessage::Message { message });
                }
            }
            UserCommand::Typing(is_typing) => {
                if self.paired {
                    self.send(ClientMessage::Typing { is_typing });
                }
            }
            UserCommand::ReportViolation { confidence } => {
                self.send(ClientMessage::NsfwViolation { confidence });
            }
            UserCommand::Exit => {
                self.exit();
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    async fn handle_server_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::StrangerConnected { chat_type } => {
                self.on_stranger_connected(chat_type).await;
            }
            ServerMessage::Waiting { message } => {
                self.notify(Notice::status(Level::Info, message));
                self.notify(Notice::Ui(UiState::Searching));
            }
            ServerMessage::StrangerDisconnected => self.on_stranger_disconnected(),
            ServerMessage::SkipAcknowledged { skip_id } => {
                if self.skip.on_ack(&skip_id) {
                    self.proceed_after_skip().await;
                }
            }
            ServerMessage::Message { message } => {
                self.notify(Notice::Chat { text: message });
            }
            ServerMessage::Typing { is_typing, .. } => {
                self.notify(Notice::Typing { is_typing });
            }
            ServerMessage::WebrtcOffer { offer } => {
                if !self.accepts_signaling("webrtc_offer") {
                    return;
                }
                let result = self.negotiation.handle_offer(offer).await;
                self.report("offer", result);
            }
            ServerMessage::WebrtcAnswer { answer } => {
                if !self.accepts_signaling("webrtc_answer") {
                    return;
                }
                let result = self.negotiation.handle_answer(answer).await;
                self.report("answer", result);
            }
            ServerMessage::WebrtcIceCandidate { candidate } => {
                if !self.accepts_signaling("webrtc_ice_candidate") {
                    return;
                }
                self.negotiation.handle_remote_candidate(candidate).await;
            }
            ServerMessage::UserCount { count } => {
                self.notify(Notice::UserCount { count });
            }
            ServerMessage::Pong { timestamp } => {
                self.awaiting_pong = None;
                let rtt = unix_millis().saturating_sub(timestamp);
                tracing::debug!(rtt_ms = rtt, "Heartbeat pong");
            }
            ServerMessage::NsfwWarning { message, violations } => {
                tracing::warn!(violations, "Content warning from server");
                self.notify(Notice::status(Level::Warning, message));
            }
            ServerMessage::PartnerVideoBlocked { reason } => {
                self.notify(Notice::status(
                    Level::Warning,
                    format!("Partner video blocked: {reason}"),
                ));
            }
            ServerMessage::Error { message } => {
                self.notify(Notice::status(Level::Error, message));
            }
        }
    }

    async fn on_stranger_connected(&mut self, chat_type: ChatType) {
        self.paired = true;
        self.video_pairing = chat_type == ChatType::Video;
        self.skip.on_new_partner();
        tracing::info!(chat_type = chat_type.as_str(), "Stranger connected");

        if chat_type != ChatType::Video {
            self.notify(Notice::status(Level::Success, "Stranger connected! Start chatting now."));
            self.notify(Notice::Ui(UiState::Connected));
            return;
        }

        self.notify(Notice::status(
            Level::Info,
            "Stranger connected! Initializing video connection...",
        ));
        self.notify(Notice::Ui(UiState::Connecting));

        self.negotiation.begin_pairing();
        let result = match self.negotiation.initialize(Role::Initiator) {
            Ok(()) => self.negotiation.create_offer(false).await.map(|_| ()),
            Err(e) => Err(e),
        };
        self.report("stranger_connected", result);
    }

    fn on_stranger_disconnected(&mut self) {
        if self.skip.suppresses_disconnect() {
            tracing::debug!(skip_id = ?self.skip.pending_skip_id(), "Disconnect from skipped partner suppressed");
            return;
        }
        self.paired = false;
        self.video_pairing = false;
        self.negotiation.teardown_remote();
        self.notify(Notice::status(Level::Info, "Stranger has disconnected."));
        self.notify(Notice::Ui(UiState::Idle));
    }

    /// 상대 건너뛰기. 요청이 받아들여졌으면 true
    pub async fn skip(&mut self) -> bool {
        if self.exited {
            return false;
        }
        let skip_id = match self.skip.request(tokio::time::Instant::now()) {
            Ok(skip_id) => skip_id,
            Err(rejection) => {
                tracing::debug!("Skip rejected: {}", rejection);
                self.notify(Notice::status(
                    Level::Warning,
                    "Please wait a moment before skipping again.",
                ));
                return false;
            }
        };

        tracing::info!(skip_id = %skip_id, "Skipping partner");
        // 원격 쪽만 정리. 로컬 트랙은 그대로
        self.negotiation.teardown_remote();
        self.paired = false;
        self.video_pairing = false;
        self.notify(Notice::Ui(UiState::Searching));

        self.send(ClientMessage::Leave {
            skip_id: Some(skip_id),
            expect_ack: true,
        });
        self.skip.arm_ack_timer(&self.events_tx);
        true
    }

    async fn proceed_after_skip(&mut self) {
        if self.chat_type == ChatType::Video {
            let active = self.local_stream.as_ref().is_some_and(LocalStream::is_active);
            if !active {
                tracing::warn!("Local stream inactive after skip, reacquiring");
                if self.ensure_local_media().await.is_err() {
                    self.skip.cancel();
                    return;
                }
            }
        }

        self.send(ClientMessage::Join {
            chat_type: self.chat_type,
            interests: self.interests.clone(),
            skip_reconnect: true,
        });
        self.skip.proceeded(&self.events_tx);
    }

    async fn handle_timer(&mut self, fired: TimerFired) {
        match fired.id {
            TimerId::ConnectionTimeout | TimerId::Recovery | TimerId::IceGrace => {
                let result = self.negotiation.on_timer(fired).await.map(|_| ());
                self.report("timer", result);
            }
            TimerId::SkipAck => {
                if self.skip.on_ack_timeout(fired) {
                    self.proceed_after_skip().await;
                }
            }
            TimerId::SkipSettle => {
                self.skip.on_settle(fired);
            }
            TimerId::Heartbeat => {
                if self.heartbeat.accept(fired) {
                    self.heartbeat_tick();
                }
            }
        }
    }

    fn heartbeat_tick(&mut self) {
        if !self.transport.is_open() {
            return;
        }
        if self.awaiting_pong.take().is_some() {
            tracing::warn!("Heartbeat pong missing, connection timed out");
            self.notify(Notice::status(
                Level::Error,
                "Connection timed out. Please check your internet connection.",
            ));
            return;
        }
        let timestamp = unix_millis();
        self.send(ClientMessage::Ping {
            timestamp: Some(timestamp),
        });
        self.awaiting_pong = Some(timestamp);
        self.heartbeat
            .arm(self.config.heartbeat_interval, &self.events_tx);
    }

    fn on_transport_closed(&mut self) {
        tracing::warn!("Signaling transport closed");
        self.heartbeat.cancel();
        self.skip.cancel();
        let connected = self
            .negotiation
            .peer()
            .is_some_and(|peer| peer.connection_state() == peer::PeerConnectionState::Connected);
        if !connected {
            self.negotiation.handle_failure(FailureKind::SignalingClosed);
        }
        self.notify(Notice::status(Level::Error, "Disconnected from server."));
    }

    /// 전체 종료. 로컬/원격 트랙을 모두 멈추고 피어 연결을 닫는다
    pub fn exit(&mut self) {
        if self.exited {
            return;
        }
        self.skip.cancel();
        self.heartbeat.cancel();
        self.awaiting_pong = None;
        self.negotiation.close();
        self.negotiation.set_local_stream(None);
        if let Some(stream) = self.local_stream.take() {
            stream.stop_all();
        }
        if self.transport.is_open() {
            self.send(ClientMessage::Leave {
                skip_id: None,
                expect_ack: false,
            });
        }
        self.transport.close();
        self.paired = false;
        self.video_pairing = false;
        self.exited = true;
        self.notify(Notice::Ui(UiState::Idle));
        tracing::info!("Client exited");
    }
}
