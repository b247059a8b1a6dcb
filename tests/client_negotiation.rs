//! 협상 세션 시나리오 (가짜 피어 연결 사용)

mod common;

use common::{harness, host_candidate, Harness};
use pairchat::client::negotiation::NegotiationPhase;
use pairchat::client::peer::{
    IceConnectionState, PeerConnection, PeerConnectionState, PeerErrorKind, PeerEvent,
    SignalingState,
};
use pairchat::client::recovery::FailureReason;
use pairchat::client::timer::TimerId;
use pairchat::client::{ClientEvent, Notice, Role, UiState};
use pairchat::protocol::{ChatType, ServerMessage};
use serde_json::json;
use std::sync::atomic::Ordering;

async fn paired(fingerprint: &str) -> Harness {
    let mut h = harness(fingerprint);
    h.server(ServerMessage::StrangerConnected {
        chat_type: ChatType::Video,
    })
    .await;
    h
}

fn remote_offer(fingerprint: &str) -> serde_json::Value {
    json!({"type": "offer", "sdp": format!("v=0\r\na=fingerprint:sha-256 {fingerprint}\r\n")})
}

fn remote_answer() -> serde_json::Value {
    json!({"type": "answer", "sdp": "v=0\r\na=fingerprint:sha-256 remote\r\n"})
}

fn candidate_text(value: &Option<pairchat::client::peer::IceCandidate>) -> String {
    value
        .as_ref()
        .map(|c| c.candidate.clone())
        .unwrap_or_default()
}

#[tokio::test]
async fn stranger_connected_sends_offer_as_initiator() {
    let mut h = paired("aaa").await;

    let sent = h.sent();
    let offers = Harness::offers_sent(&sent);
    assert_eq!(offers.len(), 1);
    assert_eq!(offers[0]["type"], "offer");

    let session = h.client.negotiation();
    assert_eq!(session.role(), Role::Initiator);
    assert_eq!(session.phase(), NegotiationPhase::HaveLocalOffer);
    assert_eq!(session.armed_timers(), vec![TimerId::ConnectionTimeout]);
    assert!(h.notifier.contains(|n| *n == Notice::Ui(UiState::Connecting)));
}

#[tokio::test]
async fn glare_is_resolved_by_fingerprint_in_either_order() {
    for a_first in [true, false] {
        let mut a = paired("aaa").await;
        let mut b = paired("zzz").await;
        let offer_a = Harness::offers_sent(&a.sent()).remove(0);
        let offer_b = Harness::offers_sent(&b.sent()).remove(0);

        if a_first {
            a.server(ServerMessage::WebrtcOffer { offer: offer_b }).await;
            b.server(ServerMessage::WebrtcOffer { offer: offer_a }).await;
        } else {
            b.server(ServerMessage::WebrtcOffer { offer: offer_a }).await;
            a.server(ServerMessage::WebrtcOffer { offer: offer_b }).await;
        }

        // 작은 지문 쪽이 되돌리고 응답한다
        let a_sent = a.sent();
        let answers = Harness::answers_sent(&a_sent);
        assert_eq!(answers.len(), 1, "a_first={a_first}");
        assert_eq!(a.client.negotiation().role(), Role::Responder);
        assert_eq!(a.client.negotiation().phase(), NegotiationPhase::Stable);
        assert_eq!(a.factory.latest().signaling_state(), SignalingState::Stable);

        // 큰 지문 쪽은 자기 offer 를 유지
        assert!(b.sent().is_empty(), "a_first={a_first}");
        assert_eq!(b.client.negotiation().role(), Role::Initiator);
        assert_eq!(
            b.factory.latest().signaling_state(),
            SignalingState::HaveLocalOffer
        );

        b.server(ServerMessage::WebrtcAnswer {
            answer: answers[0].clone(),
        })
        .await;
        assert_eq!(b.factory.latest().signaling_state(), SignalingState::Stable);
        assert_eq!(b.client.negotiation().phase(), NegotiationPhase::Stable);
        assert!(b.client.negotiation().remote_description_set());
    }
}

/// ICE 가 끊긴 뒤 실패하면 상대가 떠난 것으로 보고 연결을 내린다
async fn lose_partner_connection(h: &mut Harness) {
    h.peer_event(PeerEvent::IceConnectionState(IceConnectionState::Disconnected))
        .await;
    h.peer_event(PeerEvent::IceConnectionState(IceConnectionState::Failed))
        .await;
}

#[tokio::test]
async fn ice_failure_after_disconnect_is_not_retried() {
    let mut h = paired("aaa").await;
    let peer = h.factory.latest();
    h.sent();

    h.peer_event(PeerEvent::IceConnectionState(IceConnectionState::Disconnected))
        .await;
    assert!(!h.client.negotiation().observations().remote_peer_active);
    h.peer_event(PeerEvent::IceConnectionState(IceConnectionState::Failed))
        .await;

    let session = h.client.negotiation();
    assert!(session.is_terminal());
    assert_eq!(session.retry().attempt_count, 0);
    assert!(session.armed_timers().is_empty());
    assert!(!session.has_peer());
    assert!(peer.is_closed());
    assert_eq!(peer.restarts.load(Ordering::SeqCst), 0);
    assert!(h.sent().is_empty());
    assert!(h.notifier.contains(|n| matches!(
        n,
        Notice::TerminalFailure {
            reason: FailureReason::RemotePeerDisconnected,
            ..
        }
    )));
}

#[tokio::test]
async fn offer_after_partner_loss_answers_as_responder() {
    let mut h = paired("aaa").await;
    lose_partner_connection(&mut h).await;
    assert!(h.client.negotiation().is_terminal());
    h.sent();

    h.server(ServerMessage::WebrtcOffer {
        offer: remote_offer("zzz"),
    })
    .await;
    assert_eq!(Harness::answers_sent(&h.sent()).len(), 1);

    let session = h.client.negotiation();
    assert_eq!(session.role(), Role::Responder);
    assert_eq!(session.phase(), NegotiationPhase::Stable);
    assert!(session.remote_description_set());
    assert!(!session.is_terminal());
    assert_eq!(session.armed_timers(), vec![TimerId::ConnectionTimeout]);
    assert_eq!(h.factory.created(), 2);
    assert_eq!(h.factory.latest().signaling_state(), SignalingState::Stable);
}

#[tokio::test]
async fn offer_without_description_is_rejected() {
    let mut h = paired("aaa").await;
    h.sent();
    h.server(ServerMessage::WebrtcOffer {
        offer: json!({"sdp": "v=0"}),
    })
    .await;
    assert!(h.sent().is_empty());
    assert_eq!(h.client.negotiation().phase(), NegotiationPhase::HaveLocalOffer);
}

#[tokio::test]
async fn early_candidates_are_bounded_and_survive_peer_creation() {
    let mut h = paired("aaa").await;
    lose_partner_connection(&mut h).await;
    assert!(!h.client.negotiation().has_peer());
    for n in 0..150 {
        h.server(ServerMessage::WebrtcIceCandidate {
            candidate: host_candidate(n),
        })
        .await;
    }
    assert_eq!(h.client.negotiation().queued_candidates(), 100);

    h.server(ServerMessage::WebrtcOffer {
        offer: remote_offer("zzz"),
    })
    .await;

    let peer = h.factory.latest();
    let applied = peer.applied.lock().unwrap().clone();
    assert_eq!(applied.len(), 100);
    assert!(candidate_text(&applied[0]).starts_with("candidate:50 "));
    assert!(candidate_text(&applied[99]).starts_with("candidate:149 "));
    assert_eq!(h.client.negotiation().queued_candidates(), 0);
    assert_eq!(Harness::answers_sent(&h.sent()).len(), 1);
}

#[tokio::test]
async fn signaling_before_any_pairing_is_ignored() {
    let mut h = harness("aaa");
    h.server(ServerMessage::WebrtcIceCandidate {
        candidate: host_candidate(1),
    })
    .await;
    h.server(ServerMessage::WebrtcOffer {
        offer: remote_offer("zzz"),
    })
    .await;
    assert_eq!(h.factory.created(), 0);
    assert_eq!(h.client.negotiation().queued_candidates(), 0);
    assert!(h.sent().is_empty());

    // 텍스트 상대도 영상 협상을 시작하지 않는다
    h.server(ServerMessage::StrangerConnected {
        chat_type: ChatType::Text,
    })
    .await;
    h.server(ServerMessage::WebrtcOffer {
        offer: remote_offer("zzz"),
    })
    .await;
    assert_eq!(h.factory.created(), 0);
}

#[tokio::test]
async fn candidates_wait_for_the_answer_then_apply_directly() {
    let mut h = paired("aaa").await;

    h.server(ServerMessage::WebrtcIceCandidate {
        candidate: host_candidate(1),
    })
    .await;
    assert_eq!(h.client.negotiation().queued_candidates(), 1);
    assert_eq!(h.factory.latest().applied_count(), 0);

    h.server(ServerMessage::WebrtcAnswer {
        answer: remote_answer(),
    })
    .await;
    assert_eq!(h.client.negotiation().queued_candidates(), 0);
    assert_eq!(h.factory.latest().applied_count(), 1);

    h.server(ServerMessage::WebrtcIceCandidate {
        candidate: host_candidate(2),
    })
    .await;
    // 원격 후보 종료 신호도 그대로 전달
    h.server(ServerMessage::WebrtcIceCandidate {
        candidate: serde_json::Value::Null,
    })
    .await;
    let applied = h.factory.latest().applied.lock().unwrap().clone();
    assert_eq!(applied.len(), 3);
    assert!(applied[2].is_none());
}

#[tokio::test]
async fn failed_candidates_are_dropped_or_requeued_by_class() {
    let mut h = paired("aaa").await;
    h.server(ServerMessage::WebrtcAnswer {
        answer: remote_answer(),
    })
    .await;

    let peer = h.factory.latest();
    peer.script_candidate_errors(vec![PeerErrorKind::Operation, PeerErrorKind::InvalidState]);

    h.server(ServerMessage::WebrtcIceCandidate {
        candidate: host_candidate(1),
    })
    .await;
    assert_eq!(h.client.negotiation().queued_candidates(), 0);

    h.server(ServerMessage::WebrtcIceCandidate {
        candidate: host_candidate(2),
    })
    .await;
    assert_eq!(h.client.negotiation().queued_candidates(), 1);
    assert_eq!(peer.applied_count(), 0);
}

#[tokio::test]
async fn malformed_candidate_is_dropped() {
    let mut h = paired("aaa").await;
    h.server(ServerMessage::WebrtcIceCandidate {
        candidate: json!({"sdpMid": 3}),
    })
    .await;
    assert_eq!(h.client.negotiation().queued_candidates(), 0);
}

#[tokio::test]
async fn offer_is_aborted_when_state_changes_during_creation() {
    let mut h = harness("aaa");
    *h.factory.race_next_offer.lock().unwrap() = Some(SignalingState::HaveRemoteOffer);

    h.server(ServerMessage::StrangerConnected {
        chat_type: ChatType::Video,
    })
    .await;

    let peer = h.factory.latest();
    assert_eq!(peer.offers.lock().unwrap().len(), 1);
    assert!(peer.local_description().is_none());
    assert!(Harness::offers_sent(&h.sent()).is_empty());
    assert_eq!(h.client.negotiation().phase(), NegotiationPhase::Idle);
}

#[tokio::test]
async fn local_candidates_are_forwarded_to_the_partner() {
    let mut h = paired("aaa").await;
    h.sent();

    let candidate = serde_json::from_value(host_candidate(7)).unwrap();
    h.peer_event(PeerEvent::LocalCandidate(Some(candidate))).await;
    h.peer_event(PeerEvent::LocalCandidate(None)).await;

    let sent = h.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].kind(), "webrtc_ice_candidate");
    assert_eq!(
        sent[1],
        pairchat::protocol::ClientMessage::WebrtcIceCandidate {
            candidate: serde_json::Value::Null
        }
    );
}

#[tokio::test(start_paused = true)]
async fn timeouts_retry_with_ice_restart_until_exhausted() {
    let mut h = paired("aaa").await;
    h.server(ServerMessage::WebrtcAnswer {
        answer: remote_answer(),
    })
    .await;
    let peer = h.factory.latest();

    for attempt in 1..=3u32 {
        assert!(h.client.step().await.is_continue());
        assert_eq!(h.client.negotiation().armed_timers(), vec![TimerId::Recovery]);
        assert_eq!(h.client.negotiation().retry().attempt_count, attempt);

        assert!(h.client.step().await.is_continue());
        assert_eq!(
            h.client.negotiation().armed_timers(),
            vec![TimerId::ConnectionTimeout]
        );
        assert_eq!(peer.restarts.load(Ordering::SeqCst), attempt as usize);
    }
    // 첫 ICE 재시작만 stable 에서 offer 를 만든다
    assert_eq!(*peer.offers.lock().unwrap(), vec![false, true]);

    assert!(h.client.step().await.is_continue());
    let session = h.client.negotiation();
    assert!(session.is_terminal());
    assert!(session.armed_timers().is_empty());
    assert!(!session.has_peer());
    assert!(peer.is_closed());
    assert!(h.notifier.contains(|n| matches!(
        n,
        Notice::TerminalFailure {
            reason: FailureReason::ConnectionTimeout,
            ..
        }
    )));
    assert!(h.notifier.contains(|n| *n == Notice::Ui(UiState::Failed)));
}

#[tokio::test(start_paused = true)]
async fn duplicate_failure_signals_schedule_one_recovery() {
    let mut h = paired("aaa").await;
    let first = h.factory.latest();
    first.set_connection(PeerConnectionState::Failed);

    h.peer_event(PeerEvent::ConnectionState(PeerConnectionState::Failed)).await;
    h.peer_event(PeerEvent::IceConnectionState(IceConnectionState::Failed)).await;
    h.peer_event(PeerEvent::ConnectionState(PeerConnectionState::Failed)).await;

    assert_eq!(h.client.negotiation().armed_timers(), vec![TimerId::Recovery]);
    assert_eq!(h.client.negotiation().retry().attempt_count, 1);

    // 하드 실패는 전체 재연결
    let stale_generation = h.client.negotiation().generation();
    h.sent();
    assert!(h.client.step().await.is_continue());
    assert_eq!(h.factory.created(), 2);
    assert!(first.is_closed());
    assert!(first.is_detached());
    assert_eq!(Harness::offers_sent(&h.sent()).len(), 1);
    assert!(h.client.negotiation().generation() > stale_generation);

    // 이전 연결의 늦은 이벤트는 무시
    h.client
        .handle_event(ClientEvent::Peer {
            generation: stale_generation,
            event: PeerEvent::ConnectionState(PeerConnectionState::Failed),
        })
        .await;
    assert_eq!(
        h.client.negotiation().armed_timers(),
        vec![TimerId::ConnectionTimeout]
    );
    assert_eq!(h.client.negotiation().retry().attempt_count, 1);
}

#[tokio::test(start_paused = true)]
async fn connected_clears_timers_and_retry_state() {
    let mut h = paired("aaa").await;
    h.peer_event(PeerEvent::IceConnectionState(IceConnectionState::Failed)).await;
    assert_eq!(h.client.negotiation().retry().attempt_count, 1);

    h.factory.latest().set_connection(PeerConnectionState::Connected);
    h.peer_event(PeerEvent::ConnectionState(PeerConnectionState::Connected)).await;

    let session = h.client.negotiation();
    assert!(session.armed_timers().is_empty());
    assert_eq!(session.retry().attempt_count, 0);
    assert!(h.notifier.contains(|n| *n == Notice::Ui(UiState::Connected)));
}

#[tokio::test(start_paused = true)]
async fn ice_disconnect_waits_for_grace_period() {
    let mut h = paired("aaa").await;
    let peer = h.factory.latest();
    peer.set_connection(PeerConnectionState::Connected);
    h.peer_event(PeerEvent::ConnectionState(PeerConnectionState::Connected)).await;

    // 유예 안에 복구되면 아무 일도 없다
    h.peer_event(PeerEvent::IceConnectionState(IceConnectionState::Disconnected)).await;
    assert_eq!(h.client.negotiation().armed_timers(), vec![TimerId::IceGrace]);
    h.peer_event(PeerEvent::IceConnectionState(IceConnectionState::Connected)).await;
    assert!(h.client.negotiation().armed_timers().is_empty());

    peer.set_ice(IceConnectionState::Disconnected);
    h.peer_event(PeerEvent::IceConnectionState(IceConnectionState::Disconnected)).await;
    h.peer_event(PeerEvent::IceConnectionState(IceConnectionState::Disconnected)).await;
    assert_eq!(h.client.negotiation().armed_timers(), vec![TimerId::IceGrace]);

    assert!(h.client.step().await.is_continue());
    assert_eq!(h.client.negotiation().armed_timers(), vec![TimerId::Recovery]);
    assert_eq!(h.client.negotiation().retry().attempt_count, 1);
}

#[tokio::test]
async fn remote_tracks_are_collected_and_cleared_on_teardown() {
    let mut h = paired("aaa").await;
    let track = pairchat::client::media::MediaTrack::new(
        "remote-video",
        pairchat::client::media::TrackKind::Video,
    );
    h.peer_event(PeerEvent::Track(track.clone())).await;
    h.peer_event(PeerEvent::Track(track.clone())).await;
    assert_eq!(h.client.negotiation().remote_stream().tracks().len(), 1);

    h.server(ServerMessage::StrangerDisconnected).await;
    assert!(h.client.negotiation().remote_stream().is_empty());
    assert!(!track.is_live());
    assert!(!h.client.negotiation().has_peer());
    assert!(h.factory.latest().is_closed());
}
