//! 로컬/원격 미디어 트랙
//!
//! 트랙은 `Arc` 로 공유된다. 미리보기와 피어 연결 송신기가 같은 트랙을 가리키므로
//! `stop()` 은 전체 종료 경로에서만 로컬 트랙에 호출되어야 한다.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    Live,
    Ended,
}

#[derive(Debug)]
struct TrackInner {
    id: String,
    kind: TrackKind,
    ended: AtomicBool,
}

/// 미디어 트랙 핸들 (복제해도 같은 트랙)
#[derive(Debug, Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

impl MediaTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            inner: Arc::new(TrackInner {
                id: id.into(),
                kind,
                ended: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> TrackKind {
        self.inner.kind
    }

    pub fn ready_state(&self) -> TrackState {
        if self.inner.ended.load(Ordering::Acquire) {
            TrackState::Ended
        } else {
            TrackState::Live
        }
    }

    pub fn is_live(&self) -> bool {
        self.ready_state() == TrackState::Live
    }

    pub fn stop(&self) {
        self.inner.ended.store(true, Ordering::Release);
    }

    pub fn same_track(&self, other: &MediaTrack) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[derive(Debug)]
struct StreamInner {
    id: String,
    tracks: Vec<MediaTrack>,
}

/// 로컬 캡처 스트림. 여러 협상 세션에 걸쳐 살아남는다
#[derive(Debug, Clone)]
pub struct LocalStream {
    inner: Arc<StreamInner>,
}

impl LocalStream {
    pub fn new(id: impl Into<String>, tracks: Vec<MediaTrack>) -> Self {
        Self {
            inner: Arc::new(StreamInner {
                id: id.into(),
                tracks,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.inner.tracks
    }

    pub fn has_audio(&self) -> bool {
        self.tracks().iter().any(|t| t.kind() == TrackKind::Audio)
    }

    /// 살아 있는 트랙이 하나라도 있으면 활성
    pub fn is_active(&self) -> bool {
        self.tracks().iter().any(MediaTrack::is_live)
    }

    pub fn stop_all(&self) {
        for track in self.tracks() {
            track.stop();
        }
    }

    pub fn ptr_eq(&self, other: &LocalStream) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// 원격 트랙 모음 (원격 비디오 싱크)
#[derive(Debug, Default)]
pub struct RemoteStream {
    tracks: Vec<MediaTrack>,
}

impl RemoteStream {
    pub fn add_track(&mut self, track: MediaTrack) {
        if !self.tracks.iter().any(|t| t.id() == track.id()) {
            self.tracks.push(track);
        }
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// 트랙을 모두 멈추고 싱크를 비운다
    pub fn clear(&mut self) {
        for track in self.tracks.drain(..) {
            track.stop();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl MediaConstraints {
    pub const AUDIO_VIDEO: Self = Self {
        audio: true,
        video: true,
    };
    pub const VIDEO_ONLY: Self = Self {
        audio: false,
        video: true,
    };
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaError {
    #[error("media permission denied")]
    PermissionDenied,
    #[error("media device is busy")]
    DeviceBusy,
    #[error("no media device found")]
    NotFound,
    #[error("capture produced no tracks")]
    NoTracks,
    #[error("media capture failed: {0}")]
    Other(String),
}

impl MediaError {
    /// 사용자 안내 문구
    pub fn user_message(&self) -> &'static str {
        match self {
            MediaError::PermissionDenied => {
                "Camera access was denied. Allow camera and microphone access, then try again."
            }
            MediaError::DeviceBusy => {
                "Your camera is being used by another application. Close it and try again."
            }
            MediaError::NotFound => "No camera was found. Connect a camera and try again.",
            MediaError::NoTracks => {
                "No media tracks available. Your camera or microphone may be blocked."
            }
            MediaError::Other(_) => "Could not start your camera. Please try again.",
        }
    }
}

#[async_trait]
pub trait MediaCapture: Send + Sync {
    async fn acquire(&self, constraints: MediaConstraints) -> Result<LocalStream, MediaError>;
}

/// 획득 결과
#[derive(Debug, Clone)]
pub struct AcquiredMedia {
    pub stream: LocalStream,
    /// 오디오+비디오가 실패해 비디오만 얻은 경우
    pub video_only: bool,
}

/// 오디오+비디오, 실패하면 비디오만 한 번 더 시도. 자동 재시도는 없다
pub async fn acquire_local_stream(capture: &dyn MediaCapture) -> Result<AcquiredMedia, MediaError> {
    let (stream, video_only) = match capture.acquire(MediaConstraints::AUDIO_VIDEO).await {
        Ok(stream) => (stream, false),
        Err(e) => {
            tracing::warn!("Audio+video capture failed, trying video only: {}", e);
            (capture.acquire(MediaConstraints::VIDEO_ONLY).await?, true)
        }
    };

    if stream.tracks().is_empty() {
        return Err(MediaError::NoTracks);
    }

    tracing::info!(
        stream_id = stream.id(),
        tracks = stream.tracks().len(),
        video_only,
        "Local media acquired"
    );
    Ok(AcquiredMedia { stream, video_only })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct ScriptedCapture {
        results: Mutex<Vec<Result<LocalStream, MediaError>>>,
        requests: Mutex<Vec<MediaConstraints>>,
    }

    #[async_trait]
    impl MediaCapture for ScriptedCapture {
        async fn acquire(&self, constraints: MediaConstraints) -> Result<LocalStream, MediaError> {
            self.requests.lock().unwrap().push(constraints);
            self.results.lock().unwrap().remove(0)
        }
    }

    fn capture(results: Vec<Result<LocalStream, MediaError>>) -> ScriptedCapture {
        ScriptedCapture {
            results: Mutex::new(results),
            requests: Mutex::new(Vec::new()),
        }
    }

    #[tokio::test]
    async fn falls_back_to_video_only_once() {
        let video = LocalStream::new("s", vec![MediaTrack::new("v", TrackKind::Video)]);
        let capture = capture(vec![Err(MediaError::NotFound), Ok(video)]);

        let acquired = acquire_local_stream(&capture).await.unwrap();
        assert!(acquired.video_only);
        assert!(!acquired.stream.has_audio());
        assert_eq!(
            *capture.requests.lock().unwrap(),
            vec![MediaConstraints::AUDIO_VIDEO, MediaConstraints::VIDEO_ONLY]
        );
    }

    #[tokio::test]
    async fn second_failure_is_surfaced() {
        let capture = capture(vec![Err(MediaError::DeviceBusy), Err(MediaError::PermissionDenied)]);
        assert_eq!(
            acquire_local_stream(&capture).await.unwrap_err(),
            MediaError::PermissionDenied
        );
        assert_eq!(capture.requests.lock().unwrap().len(), 2);
    }

    #[test]
    fn clones_share_track_state() {
        let track = MediaTrack::new("a", TrackKind::Audio);
        let stream = LocalStream::new("s", vec![track.clone()]);
        assert!(stream.is_active());
        track.stop();
        assert_eq!(stream.tracks()[0].ready_state(), TrackState::Ended);
        assert!(!stream.is_active());
    }
}
