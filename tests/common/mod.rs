//! 클라이언트 시나리오 테스트용 가짜 협력자

#![allow(dead_code)]

use async_trait::async_trait;
use pairchat::client::candidates::QueuedCandidate;
use pairchat::client::media::{LocalStream, MediaCapture, MediaConstraints, MediaError, MediaTrack, TrackKind};
use pairchat::client::peer::{
    IceCandidate, IceConnectionState, IceGatheringState, PeerConnection, PeerConnectionFactory,
    PeerConnectionState, PeerError, PeerErrorKind, PeerEvent, PeerEventSink, RtcConfiguration,
    SdpType, SessionDescription, SignalingState,
};
use pairchat::client::transport::channel_transport;
use pairchat::client::{Client, ClientConfig, ClientEvent, Notice, Notifier};
use pairchat::protocol::{ClientMessage, ServerMessage};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedReceiver;

#[derive(Debug)]
struct PeerState {
    signaling: SignalingState,
    connection: PeerConnectionState,
    ice: IceConnectionState,
    gathering: IceGatheringState,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    /// 다음 create_offer 도중 바뀔 signaling state
    race: Option<SignalingState>,
}

pub struct FakePeer {
    pub fingerprint: String,
    state: Mutex<PeerState>,
    pub sink: PeerEventSink,
    pub tracks: Mutex<Vec<MediaTrack>>,
    pub applied: Mutex<Vec<QueuedCandidate>>,
    pub candidate_errors: Mutex<VecDeque<PeerErrorKind>>,
    pub offers: Mutex<Vec<bool>>,
    pub restarts: AtomicUsize,
    pub detached: AtomicBool,
    pub closed: AtomicBool,
}

impl FakePeer {
    fn sdp(&self) -> String {
        format!("v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\na=fingerprint:sha-256 {}\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\n", self.fingerprint)
    }

    pub fn set_connection(&self, state: PeerConnectionState) {
        self.state.lock().unwrap().connection = state;
    }

    pub fn set_ice(&self, state: IceConnectionState) {
        self.state.lock().unwrap().ice = state;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }

    pub fn script_candidate_errors(&self, kinds: Vec<PeerErrorKind>) {
        self.candidate_errors.lock().unwrap().extend(kinds);
    }

    pub fn applied_count(&self) -> usize {
        self.applied.lock().unwrap().len()
    }
}

#[async_trait]
impl PeerConnection for FakePeer {
    fn signaling_state(&self) -> SignalingState {
        self.state.lock().unwrap().signaling
    }

    fn connection_state(&self) -> PeerConnectionState {
        self.state.lock().unwrap().connection
    }

    fn ice_connection_state(&self) -> IceConnectionState {
        self.state.lock().unwrap().ice
    }

    fn ice_gathering_state(&self) -> IceGatheringState {
        self.state.lock().unwrap().gathering
    }

    fn local_description(&self) -> Option<SessionDescription> {
        self.state.lock().unwrap().local.clone()
    }

    fn remote_description(&self) -> Option<SessionDescription> {
        self.state.lock().unwrap().remote.clone()
    }

    fn add_track(&self, track: &MediaTrack) -> Result<(), PeerError> {
        self.tracks.lock().unwrap().push(track.clone());
        Ok(())
    }

    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription, PeerError> {
        self.offers.lock().unwrap().push(ice_restart);
        let mut state = self.state.lock().unwrap();
        if let Some(raced) = state.race.take() {
            state.signaling = raced;
        }
        Ok(SessionDescription::offer(self.sdp()))
    }

    async fn create_answer(&self) -> Result<SessionDescription, PeerError> {
        Ok(SessionDescription::answer(self.sdp()))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<(), PeerError> {
        let mut state = self.state.lock().unwrap();
        state.signaling = match description.kind {
            SdpType::Offer => SignalingState::HaveLocalOffer,
            _ => SignalingState::Stable,
        };
        state.local = Some(description);
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), PeerError> {
        let mut state = self.state.lock().unwrap();
        if state.signaling == SignalingState::Closed {
            return Err(PeerError::new(PeerErrorKind::InvalidState, "closed"));
        }
        state.signaling = match description.kind {
            SdpType::Offer => SignalingState::HaveRemoteOffer,
            _ => SignalingState::Stable,
        };
        state.remote = Some(description);
        Ok(())
    }

    async fn rollback(&self) -> Result<(), PeerError> {
        let mut state = self.state.lock().unwrap();
        state.signaling = SignalingState::Stable;
        state.local = None;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: Option<IceCandidate>) -> Result<(), PeerError> {
        if let Some(kind) = self.candidate_errors.lock().unwrap().pop_front() {
            return Err(PeerError::new(kind, "scripted failure"));
        }
        self.applied.lock().unwrap().push(candidate);
        Ok(())
    }

    fn restart_ice(&self) {
        self.restarts.fetch_add(1, Ordering::SeqCst);
    }

    fn detach_handlers(&self) {
        self.detached.store(true, Ordering::SeqCst);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        state.signaling = SignalingState::Closed;
        state.connection = PeerConnectionState::Closed;
        state.ice = IceConnectionState::Closed;
    }
}

pub struct FakeFactory {
    pub fingerprint: String,
    pub peers: Mutex<Vec<Arc<FakePeer>>>,
    pub race_next_offer: Mutex<Option<SignalingState>>,
}

impl FakeFactory {
    pub fn new(fingerprint: &str) -> Self {
        Self {
            fingerprint: fingerprint.to_string(),
            peers: Mutex::new(Vec::new()),
            race_next_offer: Mutex::new(None),
        }
    }

    pub fn created(&self) -> usize {
        self.peers.lock().unwrap().len()
    }

    pub fn latest(&self) -> Arc<FakePeer> {
        self.peers.lock().unwrap().last().cloned().expect("no peer created")
    }

    pub fn peer(&self, index: usize) -> Arc<FakePeer> {
        self.peers.lock().unwrap()[index].clone()
    }
}

impl PeerConnectionFactory for FakeFactory {
    fn create(
        &self,
        _config: &RtcConfiguration,
        events: PeerEventSink,
    ) -> Result<Arc<dyn PeerConnection>, PeerError> {
        let peer = Arc::new(FakePeer {
            fingerprint: self.fingerprint.clone(),
            state: Mutex::new(PeerState {
                signaling: SignalingState::Stable,
                connection: PeerConnectionState::New,
                ice: IceConnectionState::New,
                gathering: IceGatheringState::New,
                local: None,
                remote: None,
                race: self.race_next_offer.lock().unwrap().take(),
            }),
            sink: events,
            tracks: Mutex::new(Vec::new()),
            applied: Mutex::new(Vec::new()),
            candidate_errors: Mutex::new(VecDeque::new()),
            offers: Mutex::new(Vec::new()),
            restarts: AtomicUsize::new(0),
            detached: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });
        self.peers.lock().unwrap().push(peer.clone());
        Ok(peer)
    }
}

pub struct FakeCapture {
    pub stream: LocalStream,
    /// 앞에서부터 소비되는 실패 목록
    pub failures: Mutex<VecDeque<MediaError>>,
    pub requests: Mutex<Vec<MediaConstraints>>,
}

impl FakeCapture {
    pub fn new() -> Self {
        Self {
            stream: LocalStream::new(
                "local",
                vec![
                    MediaTrack::new("mic", TrackKind::Audio),
                    MediaTrack::new("cam", TrackKind::Video),
                ],
            ),
            failures: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(failures: Vec<MediaError>) -> Self {
        let capture = Self::new();
        capture.failures.lock().unwrap().extend(failures);
        capture
    }
}

#[async_trait]
impl MediaCapture for FakeCapture {
    async fn acquire(&self, constraints: MediaConstraints) -> Result<LocalStream, MediaError> {
        self.requests.lock().unwrap().push(constraints);
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        if constraints.audio {
            Ok(self.stream.clone())
        } else {
            let video: Vec<MediaTrack> = self
                .stream
                .tracks()
                .iter()
                .filter(|t| t.kind() == TrackKind::Video)
                .cloned()
                .collect();
            Ok(LocalStream::new("local-video", video))
        }
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn take(&self) -> Vec<Notice> {
        std::mem::take(&mut *self.notices.lock().unwrap())
    }

    pub fn contains(&self, predicate: impl Fn(&Notice) -> bool) -> bool {
        self.notices.lock().unwrap().iter().any(predicate)
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: Notice) {
        self.notices.lock().unwrap().push(notice);
    }
}

pub struct Harness {
    pub client: Client,
    pub outbox: UnboundedReceiver<ClientMessage>,
    pub factory: Arc<FakeFactory>,
    pub capture: Arc<FakeCapture>,
    pub notifier: Arc<RecordingNotifier>,
}

pub fn harness(fingerprint: &str) -> Harness {
    harness_with_capture(fingerprint, FakeCapture::new())
}

pub fn harness_with_capture(fingerprint: &str, capture: FakeCapture) -> Harness {
    let (transport, outbox) = channel_transport();
    let factory = Arc::new(FakeFactory::new(fingerprint));
    let capture = Arc::new(capture);
    let notifier = Arc::new(RecordingNotifier::default());
    let client = Client::new(
        ClientConfig::default(),
        factory.clone(),
        Arc::new(transport),
        capture.clone(),
        notifier.clone(),
    );
    Harness {
        client,
        outbox,
        factory,
        capture,
        notifier,
    }
}

impl Harness {
    /// 보낸 메시지 모두 꺼내기
    pub fn sent(&mut self) -> Vec<ClientMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = self.outbox.try_recv() {
            out.push(msg);
        }
        out
    }

    pub async fn server(&mut self, message: ServerMessage) {
        let flow = self.client.handle_event(ClientEvent::Server(message)).await;
        assert!(flow.is_continue());
    }

    /// 현재 세대로 피어 이벤트 주입
    pub async fn peer_event(&mut self, event: PeerEvent) {
        let generation = self.client.negotiation().generation();
        self.client
            .handle_event(ClientEvent::Peer { generation, event })
            .await;
    }

    pub fn offers_sent(messages: &[ClientMessage]) -> Vec<serde_json::Value> {
        messages
            .iter()
            .filter_map(|m| match m {
                ClientMessage::WebrtcOffer { offer } => Some(offer.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn answers_sent(messages: &[ClientMessage]) -> Vec<serde_json::Value> {
        messages
            .iter()
            .filter_map(|m| match m {
                ClientMessage::WebrtcAnswer { answer } => Some(answer.clone()),
                _ => None,
            })
            .collect()
    }
}

pub fn host_candidate(n: usize) -> serde_json::Value {
    serde_json::json!({
        "candidate": format!("candidate:{n} 1 udp 2122260223 192.168.1.{} {} typ host", n % 250, 50000 + n),
        "sdpMid": "0",
        "sdpMLineIndex": 0
    })
}
