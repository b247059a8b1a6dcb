//! 피어 연결 협상 상태 머신
//!
//! 한 번의 페어링 동안 살아 있는 협상 세션이다. offer/answer 교환, 원격 ICE 후보
//! 대기열, offer 충돌(glare) 해소, 연결 상태 감시와 복구를 맡는다.
//!
//! 피어 연결은 세대 번호로 구분된다. 연결을 내릴 때마다 세대가 올라가므로 이전
//! 연결에서 늦게 도착한 이벤트는 무시된다.

use super::candidates::{classify, CandidateQueue, QueuedCandidate};
use super::config::ClientConfig;
use super::media::{LocalStream, RemoteStream};
use super::notify::{Level, Notice, Notifier, UiState};
use super::peer::{
    IceCandidate, IceConnectionState, IceGatheringState, PeerConnection, PeerConnectionFactory,
    PeerConnectionState, PeerError, PeerEvent, PeerEventSink, RtcConfiguration,
    SessionDescription, SignalingState,
};
use super::recovery::{
    analyze_failure, ConnectionSnapshot, FailureKind, Observations, RecoveryMethod,
    RecoveryStrategy, RetryState,
};
use super::timer::{TimerFired, TimerId, TimerSlot};
use super::transport::{SignalTransport, TransportError};
use super::ClientEvent;
use crate::protocol::ClientMessage;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

/// 협상 단계
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationPhase {
    Idle,
    Creating,
    HaveLocalOffer,
    HaveRemoteOffer,
    /// 설명 교환 완료 (연결은 피어 상태로 따로 추적)
    Stable,
    Closed,
}

impl NegotiationPhase {
    /// 전이표
    pub fn can_transition(self, to: NegotiationPhase) -> bool {
        use NegotiationPhase::*;
        if self == to || to == Closed {
            return true;
        }
        matches!(
            (self, to),
            (Idle, Creating)
                | (Idle, HaveRemoteOffer)
                | (Creating, HaveLocalOffer)
                | (Creating, Idle)
                | (Creating, Stable)
                | (HaveLocalOffer, Stable)
                | (HaveLocalOffer, HaveRemoteOffer)
                | (HaveLocalOffer, Idle)
                | (HaveRemoteOffer, Stable)
                | (HaveRemoteOffer, Idle)
                | (Stable, Creating)
                | (Stable, HaveRemoteOffer)
        )
    }
}

/// offer 충돌 시 이쪽의 결정
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionDecision {
    /// 로컬 offer 를 되돌리고 상대 offer 수락
    Rollback,
    /// 상대 offer 무시, 내 answer 대기
    Keep,
}

/// 지문이 작은 쪽이 양보한다. 같거나 없으면 `coin` 으로 정한다
pub fn resolve_collision(
    local: Option<&str>,
    remote: Option<&str>,
    coin: impl FnOnce() -> bool,
) -> CollisionDecision {
    match (local, remote) {
        (Some(local), Some(remote)) if local != remote => {
            if local < remote {
                CollisionDecision::Rollback
            } else {
                CollisionDecision::Keep
            }
        }
        _ => {
            if coin() {
                CollisionDecision::Rollback
            } else {
                CollisionDecision::Keep
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("no active peer connection")]
    NoPeer,
    #[error("operation not valid in signaling state {0:?}")]
    BadState(SignalingState),
    #[error("invalid phase transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: NegotiationPhase,
        to: NegotiationPhase,
    },
    #[error("missing or malformed session description: {0}")]
    InvalidDescription(#[source] serde_json::Error),
    #[error(transparent)]
    Peer(#[from] PeerError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// 외부 협력자 묶음
#[derive(Clone)]
pub struct Collaborators {
    pub factory: Arc<dyn PeerConnectionFactory>,
    pub transport: Arc<dyn SignalTransport>,
    pub notifier: Arc<dyn Notifier>,
    pub events: UnboundedSender<ClientEvent>,
}

type Coin = Box<dyn Fn() -> bool + Send + Sync>;

pub struct NegotiationSession {
    config: Arc<ClientConfig>,
    io: Collaborators,
    role: Role,
    phase: NegotiationPhase,
    peer: Option<Arc<dyn PeerConnection>>,
    generation: u64,
    queue: CandidateQueue,
    remote_description_set: bool,
    local_stream: Option<LocalStream>,
    remote_stream: RemoteStream,
    retry: RetryState,
    observed: Observations,
    /// 최종 실패 이후 이 페어링에서는 더 복구하지 않는다
    terminal: bool,
    /// 페어링 중일 때만 연결 없이 도착한 후보를 받아 둔다
    pairing: bool,
    pending_recovery: Option<RecoveryStrategy>,
    connection_timeout: TimerSlot,
    recovery: TimerSlot,
    ice_grace: TimerSlot,
    coin: Coin,
}

impl NegotiationSession {
    pub fn new(config: Arc<ClientConfig>, io: Collaborators) -> Self {
        let queue = CandidateQueue::new(config.candidate_queue);
        let retry = RetryState::new(config.max_retries);
        Self {
            config,
            io,
            role: Role::Initiator,
            phase: NegotiationPhase::Idle,
            peer: None,
            generation: 0,
            queue,
            remote_description_set: false,
            local_stream: None,
            remote_stream: RemoteStream::default(),
            retry,
            observed: Observations::default(),
            terminal: false,
            pairing: false,
            pending_recovery: None,
            connection_timeout: TimerSlot::new(TimerId::ConnectionTimeout),
            recovery: TimerSlot::new(TimerId::Recovery),
            ice_grace: TimerSlot::new(TimerId::IceGrace),
            coin: Box::new(rand::random::<bool>),
        }
    }

    /// 지문이 같을 때 쓰는 동전 교체
    pub fn with_tie_breaker(mut self, coin: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.coin = Box::new(coin);
        self
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn phase(&self) -> NegotiationPhase {
        self.phase
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn has_peer(&self) -> bool {
        self.peer.is_some()
    }

    pub fn peer(&self) -> Option<&Arc<dyn PeerConnection>> {
        self.peer.as_ref()
    }

    pub fn signaling_state(&self) -> Option<SignalingState> {
        self.peer.as_ref().map(|peer| peer.signaling_state())
    }

    pub fn queued_candidates(&self) -> usize {
        self.queue.len()
    }

    pub fn remote_description_set(&self) -> bool {
        self.remote_description_set
    }

    pub fn remote_stream(&self) -> &RemoteStream {
        &self.remote_stream
    }

    pub fn retry(&self) -> &RetryState {
        &self.retry
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    pub fn is_pairing(&self) -> bool {
        self.pairing
    }

    pub fn observations(&self) -> Observations {
        self.observed
    }

    /// 현재 걸려 있는 타이머
    pub fn armed_timers(&self) -> Vec<TimerId> {
        [&self.connection_timeout, &self.recovery, &self.ice_grace]
            .into_iter()
            .filter(|slot| slot.is_armed())
            .map(TimerSlot::id)
            .collect()
    }

    pub fn set_local_stream(&mut self, stream: Option<LocalStream>) {
        self.local_stream = stream;
    }

    fn advance(&mut self, to: NegotiationPhase) -> Result<(), NegotiationError> {
        let from = self.phase;
        if !from.can_transition(to) {
            return Err(NegotiationError::InvalidTransition { from, to });
        }
        if from != to {
            tracing::debug!(from = ?from, to = ?to, "Negotiation phase changed");
        }
        self.phase = to;
        Ok(())
    }

    fn notify(&self, notice: Notice) {
        self.io.notifier.notify(notice);
    }

    fn signal(&self, message: ClientMessage) -> Result<(), NegotiationError> {
        self.io.transport.send(message)?;
        Ok(())
    }

    fn active_peer(&self) -> Result<Arc<dyn PeerConnection>, NegotiationError> {
        self.peer.clone().ok_or(NegotiationError::NoPeer)
    }

    /// 새 페어링 시작. 재시도 상태와 최종 실패 표시를 초기화
    pub fn begin_pairing(&mut self) {
        self.retry.restart();
        self.terminal = false;
        self.pairing = true;
    }

    /// 피어 연결 생성. 이전 연결은 먼저 정리하고 로컬 트랙을 바로 붙인다
    pub fn initialize(&mut self, role: Role) -> Result<(), NegotiationError> {
        self.teardown_peer();
        self.role = role;
        self.phase = NegotiationPhase::Idle;
        self.observed = Observations {
            remote_peer_active: true,
            ..Observations::default()
        };

        let rtc_config = RtcConfiguration::new(
            self.config.ice_servers.clone(),
            self.config.ice_candidate_pool_size,
        );
        let sink = PeerEventSink::new(self.generation, self.io.events.clone());
        let peer = self.io.factory.create(&rtc_config, sink)?;

        if let Some(stream) = &self.local_stream {
            for track in stream.tracks() {
                peer.add_track(track)?;
            }
        }
        self.peer = Some(peer);
        self.connection_timeout
            .arm(self.config.connection_timeout, &self.io.events);

        tracing::info!(
            role = ?role,
            generation = self.generation,
            ice_servers = rtc_config.ice_servers.len(),
            "Peer connection created"
        );
        Ok(())
    }

    /// offer 생성/전송. 보낼 수 없는 상태면 `Ok(false)`
    pub async fn create_offer(&mut self, ice_restart: bool) -> Result<bool, NegotiationError> {
        let peer = self.active_peer()?;
        let state = peer.signaling_state();
        if state == SignalingState::Closed {
            return Err(NegotiationError::BadState(state));
        }
        if state != SignalingState::Stable {
            tracing::debug!(state = ?state, "Not stable, skipping offer");
            return Ok(false);
        }

        let previous = self.phase;
        self.advance(NegotiationPhase::Creating)?;

        let offer = match peer.create_offer(ice_restart).await {
            Ok(offer) => offer,
            Err(e) => {
                self.phase = previous;
                return Err(e.into());
            }
        };

        // 생성 도중 상태가 바뀌었으면 보내지 않는다
        if peer.signaling_state() != SignalingState::Stable {
            tracing::warn!(
                state = ?peer.signaling_state(),
                "Signaling state changed while creating offer, aborted"
            );
            self.phase = previous;
            return Ok(false);
        }

        if let Err(e) = peer.set_local_description(offer.clone()).await {
            self.phase = previous;
            return Err(e.into());
        }
        self.advance(NegotiationPhase::HaveLocalOffer)?;

        let offer = serde_json::to_value(&offer).map_err(TransportError::from)?;
        self.signal(ClientMessage::WebrtcOffer { offer })?;
        tracing::info!(ice_restart, "Offer sent");
        Ok(true)
    }

    /// 원격 offer 처리 (signaling state 별 분기)
    pub async fn handle_offer(&mut self, payload: Value) -> Result<(), NegotiationError> {
        let offer: SessionDescription =
            serde_json::from_value(payload).map_err(NegotiationError::InvalidDescription)?;

        if self.peer.is_none() {
            // 상대가 협상을 다시 시작했다
            self.terminal = false;
            self.retry.clear();
            self.initialize(Role::Responder)?;
        }
        let peer = self.active_peer()?;

        match peer.signaling_state() {
            SignalingState::Stable => self.accept_offer(&peer, offer).await,
            SignalingState::HaveLocalOffer => {
                let local = peer.local_description();
                let local_fp = local.as_ref().and_then(SessionDescription::fingerprint);
                let decision = resolve_collision(local_fp, offer.fingerprint(), &self.coin);
                tracing::info!(
                    decision = ?decision,
                    local = ?local_fp,
                    remote = ?offer.fingerprint(),
                    "Offer collision"
                );
                match decision {
                    CollisionDecision::Rollback => {
                        peer.rollback().await?;
                        self.role = Role::Responder;
                        self.accept_offer(&peer, offer).await
                    }
                    CollisionDecision::Keep => Ok(()),
                }
            }
            SignalingState::HaveRemoteOffer => {
                if !self.remote_description_set {
                    self.remote_description_set = true;
                    self.flush_candidates().await;
                } else {
                    tracing::debug!("Duplicate offer ignored");
                }
                Ok(())
            }
            state => {
                self.notify(Notice::status(
                    Level::Error,
                    "Video connection error. Please try again.",
                ));
                Err(NegotiationError::BadState(state))
            }
        }
    }

    async fn accept_offer(
        &mut self,
        peer: &Arc<dyn PeerConnection>,
        offer: SessionDescription,
    ) -> Result<(), NegotiationError> {
        peer.set_remote_description(offer).await?;
        self.remote_description_set = true;
        self.advance(NegotiationPhase::HaveRemoteOffer)?;
        self.flush_candidates().await;

        let answer = peer.create_answer().await?;
        peer.set_local_description(answer.clone()).await?;
        self.advance(NegotiationPhase::Stable)?;

        let answer = serde_json::to_value(&answer).map_err(TransportError::from)?;
        self.signal(ClientMessage::WebrtcAnswer { answer })?;
        tracing::info!("Answer sent");
        Ok(())
    }

    /// 원격 answer 처리
    pub async fn handle_answer(&mut self, payload: Value) -> Result<(), NegotiationError> {
        let answer: SessionDescription =
            serde_json::from_value(payload).map_err(NegotiationError::InvalidDescription)?;
        let peer = self.active_peer()?;

        match peer.signaling_state() {
            SignalingState::HaveLocalOffer => {
                peer.set_remote_description(answer).await?;
                self.remote_description_set = true;
                self.flush_candidates().await;
                self.advance(NegotiationPhase::Stable)?;
                tracing::info!("Answer applied");
            }
            SignalingState::Stable => {
                tracing::debug!("Late answer in stable state ignored");
                self.flush_candidates().await;
            }
            state => {
                tracing::debug!(state = ?state, "Answer ignored");
            }
        }
        Ok(())
    }

    /// 원격 ICE 후보 수신
    pub async fn handle_remote_candidate(&mut self, payload: Value) {
        let candidate: QueuedCandidate = match payload {
            Value::Null => None,
            other => match serde_json::from_value::<IceCandidate>(other) {
                Ok(candidate) => Some(candidate),
                Err(e) => {
                    tracing::warn!("Dropped malformed ICE candidate: {}", e);
                    return;
                }
            },
        };

        let Some(peer) = self.peer.clone() else {
            if self.pairing {
                self.queue.push(candidate);
            } else {
                tracing::debug!("ICE candidate outside a pairing dropped");
            }
            return;
        };

        let state = peer.signaling_state();
        let can_apply = self.remote_description_set
            && state != SignalingState::Closed
            && state != SignalingState::HaveLocalOffer;
        if !can_apply {
            tracing::debug!(state = ?state, queued = self.queue.len() + 1, "ICE candidate queued");
            self.queue.push(candidate);
            return;
        }

        if let Err(e) = peer.add_ice_candidate(candidate.clone()).await {
            let class = classify(&e.kind);
            let queued = self.queue.push_failed(candidate, class);
            tracing::warn!(class = ?class, queued, "Failed to add ICE candidate: {}", e);
        }
    }

    /// 대기열 후보를 순서대로 적용. 연결이 닫히거나 원격 설명이 사라지면 멈추고
    /// 시도하지 못한 후보를 다시 넣는다
    pub async fn flush_candidates(&mut self) {
        let Some(peer) = self.peer.clone() else {
            return;
        };
        if !self.remote_description_set || self.queue.is_empty() {
            return;
        }

        let pending = self.queue.take_all();
        let total = pending.len();
        let mut retries = self.queue.retries();
        let mut applied = 0usize;
        let mut rest = pending.into_iter();

        while let Some(candidate) = rest.next() {
            if peer.signaling_state() == SignalingState::Closed
                || peer.remote_description().is_none()
            {
                tracing::warn!("Flush interrupted, requeueing remaining candidates");
                retries.extend_unattempted(std::iter::once(candidate).chain(rest.by_ref()));
                break;
            }
            match peer.add_ice_candidate(candidate.clone()).await {
                Ok(()) => applied += 1,
                Err(e) => {
                    retries.record_failure(candidate, classify(&e.kind));
                }
            }
        }

        tracing::debug!(total, applied, retry = retries.len(), "Flushed ICE candidates");
        if !retries.is_empty() {
            self.queue.requeue(retries);
        }
    }

    /// 피어 연결 이벤트. 현재 세대가 아니면 무시
    pub async fn on_peer_event(
        &mut self,
        generation: u64,
        event: PeerEvent,
    ) -> Result<(), NegotiationError> {
        if generation != self.generation || self.peer.is_none() {
            tracing::debug!(generation, current = self.generation, "Stale peer event ignored");
            return Ok(());
        }

        match event {
            PeerEvent::ConnectionState(state) => {
                tracing::info!(state = ?state, "Connection state");
                match state {
                    PeerConnectionState::Connected => {
                        self.observed.remote_peer_active = true;
                        self.on_connected();
                    }
                    PeerConnectionState::Disconnected => {
                        self.observed.remote_peer_active = false;
                        self.arm_ice_grace();
                    }
                    PeerConnectionState::Failed => {
                        self.handle_failure(FailureKind::ConnectionFailed)
                    }
                    PeerConnectionState::Closed => {
                        self.observed.remote_peer_active = false;
                        self.cancel_timers();
                        self.advance(NegotiationPhase::Closed)?;
                    }
                    PeerConnectionState::Connecting => self.observed.remote_peer_active = true,
                    PeerConnectionState::New => {}
                }
            }
            PeerEvent::IceConnectionState(state) => {
                tracing::info!(state = ?state, "ICE connection state");
                match state {
                    IceConnectionState::Disconnected => {
                        self.observed.remote_peer_active = false;
                        self.arm_ice_grace();
                    }
                    IceConnectionState::Failed => self.handle_failure(FailureKind::IceFailed),
                    IceConnectionState::Connected | IceConnectionState::Completed => {
                        self.observed.remote_peer_active = true;
                        self.ice_grace.cancel();
                    }
                    IceConnectionState::Checking => self.observed.remote_peer_active = true,
                    IceConnectionState::Closed => self.observed.remote_peer_active = false,
                    IceConnectionState::New => {}
                }
            }
            PeerEvent::IceGatheringState(state) => {
                tracing::debug!(state = ?state, "ICE gathering state");
                if state == IceGatheringState::Complete {
                    self.observed.candidates_exhausted = true;
                }
            }
            PeerEvent::SignalingState(state) => {
                tracing::debug!(state = ?state, "Signaling state");
            }
            PeerEvent::Track(track) => {
                tracing::info!(track_id = track.id(), kind = ?track.kind(), "Remote track received");
                self.remote_stream.add_track(track);
            }
            PeerEvent::LocalCandidate(candidate) => {
                if candidate.as_ref().is_some_and(IceCandidate::is_relay) {
                    self.observed.relay_seen = true;
                }
                let candidate = match candidate {
                    Some(c) => serde_json::to_value(&c).map_err(TransportError::from)?,
                    None => Value::Null,
                };
                self.signal(ClientMessage::WebrtcIceCandidate { candidate })?;
            }
        }
        Ok(())
    }

    fn on_connected(&mut self) {
        self.connection_timeout.cancel();
        self.recovery.cancel();
        self.ice_grace.cancel();
        self.pending_recovery = None;
        self.retry.clear();
        self.notify(Notice::Ui(UiState::Connected));
        self.notify(Notice::status(Level::Success, "Video connected!"));
    }

    fn arm_ice_grace(&mut self) {
        if self.recovery.is_armed() || self.ice_grace.is_armed() {
            return;
        }
        self.ice_grace
            .arm(self.config.ice_disconnect_grace, &self.io.events);
    }

    fn snapshot(&self, peer: &Arc<dyn PeerConnection>) -> ConnectionSnapshot {
        ConnectionSnapshot {
            connection: peer.connection_state(),
            ice: peer.ice_connection_state(),
            signaling: peer.signaling_state(),
        }
    }

    /// 실패 분석 후 재시도 예약 또는 최종 실패 처리
    pub fn handle_failure(&mut self, kind: FailureKind) {
        let Some(peer) = self.peer.clone() else {
            return;
        };
        if self.terminal {
            return;
        }
        if self.recovery.is_armed() {
            tracing::debug!(kind = ?kind, "Recovery already scheduled");
            return;
        }

        let analysis = analyze_failure(kind, self.snapshot(&peer), self.observed);
        self.connection_timeout.cancel();
        self.ice_grace.cancel();

        if self.retry.should_retry(&analysis) {
            let strategy = self.retry.strategy_for(&analysis, &self.config);
            self.retry.record_attempt(analysis.reason);
            tracing::warn!(
                reason = analysis.reason.as_str(),
                method = ?strategy.method,
                delay_ms = strategy.delay.as_millis() as u64,
                attempt = self.retry.attempt_count,
                "Connection failure, scheduling recovery"
            );
            self.pending_recovery = Some(strategy);
            self.recovery.arm(strategy.delay, &self.io.events);
            self.notify(Notice::status(
                Level::Warning,
                format!(
                    "Connection issue, retrying ({}/{})...",
                    self.retry.attempt_count, self.retry.max_attempts
                ),
            ));
            return;
        }

        tracing::error!(
            reason = analysis.reason.as_str(),
            attempts = self.retry.attempt_count,
            "Connection failed permanently"
        );
        self.terminal = true;
        self.retry.last_failure_reason = Some(analysis.reason);
        // 상대는 그대로 페어링되어 있으므로 새 offer 는 받을 수 있다
        self.release_remote();
        self.notify(Notice::TerminalFailure {
            reason: analysis.reason,
            message: analysis.reason.user_message().to_string(),
        });
        self.notify(Notice::Ui(UiState::Failed));
    }

    /// 예약된 복구 실행
    pub async fn attempt_recovery(&mut self) -> Result<(), NegotiationError> {
        let Some(strategy) = self.pending_recovery.take() else {
            return Ok(());
        };
        let peer = self.active_peer()?;

        tracing::info!(method = ?strategy.method, attempt = self.retry.attempt_count, "Attempting recovery");
        match strategy.method {
            RecoveryMethod::IceRestart => {
                peer.restart_ice();
                self.connection_timeout
                    .arm(self.config.connection_timeout, &self.io.events);
                if self.role == Role::Initiator {
                    self.create_offer(true).await?;
                }
            }
            RecoveryMethod::FullReconnection => {
                let role = self.role;
                self.initialize(role)?;
                if role == Role::Initiator {
                    self.create_offer(false).await?;
                }
            }
        }
        Ok(())
    }

    /// 이 세션 소유 타이머의 발화 처리. 처리했으면 true
    pub async fn on_timer(&mut self, fired: TimerFired) -> Result<bool, NegotiationError> {
        match fired.id {
            TimerId::ConnectionTimeout if self.connection_timeout.accept(fired) => {
                self.on_connection_timeout();
            }
            TimerId::Recovery if self.recovery.accept(fired) => {
                self.attempt_recovery().await?;
            }
            TimerId::IceGrace if self.ice_grace.accept(fired) => {
                self.on_ice_grace_expired();
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn on_connection_timeout(&mut self) {
        let Some(peer) = &self.peer else {
            return;
        };
        if peer.connection_state() != PeerConnectionState::Connected {
            tracing::warn!("Peer connection timeout");
            self.handle_failure(FailureKind::Timeout);
        }
    }

    fn on_ice_grace_expired(&mut self) {
        let Some(peer) = &self.peer else {
            return;
        };
        let still_down = peer.connection_state() == PeerConnectionState::Disconnected
            || peer.ice_connection_state() == IceConnectionState::Disconnected;
        if still_down {
            self.handle_failure(FailureKind::Disconnected);
        }
    }

    fn cancel_timers(&mut self) {
        self.connection_timeout.cancel();
        self.recovery.cancel();
        self.ice_grace.cancel();
        self.pending_recovery = None;
    }

    /// 기존 연결을 닫는다. 연결이 없을 때 먼저 도착한 후보는 남겨 둔다
    fn teardown_peer(&mut self) {
        self.generation += 1;
        if let Some(peer) = self.peer.take() {
            peer.detach_handlers();
            peer.close();
            self.clear_candidates();
        }
    }

    fn clear_candidates(&mut self) {
        let cleared = self.queue.clear();
        if cleared > 0 {
            tracing::debug!(cleared, "Cleared queued ICE candidates");
        }
        self.remote_description_set = false;
    }

    /// 페어링 종료 (건너뛰기, 상대 퇴장). 로컬 스트림과 트랙은 건드리지 않는다
    pub fn teardown_remote(&mut self) {
        self.pairing = false;
        self.release_remote();
    }

    fn release_remote(&mut self) {
        self.cancel_timers();
        self.remote_stream.clear();
        self.teardown_peer();
        self.clear_candidates();
        self.phase = NegotiationPhase::Idle;
    }

    /// 전체 종료
    pub fn close(&mut self) {
        self.teardown_remote();
        self.phase = NegotiationPhase::Closed;
    }
}
