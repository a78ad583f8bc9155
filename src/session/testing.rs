//! In-process peers and a recording handler for session tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_H264, MIME_TYPE_OPUS};
use webrtc::api::APIBuilder;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocal;

use crate::server::{RelayHandler, RelayService, ServerConfig};

/// Handler that counts lifecycle events
#[derive(Default)]
pub(crate) struct RecordingHandler {
    pub connected: AtomicUsize,
    pub disconnected: AtomicUsize,
}

impl RelayHandler for RecordingHandler {
    async fn on_stream_connected(&self, _stream_key: &str) {
        self.connected.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_stream_disconnected(&self, _stream_key: &str) {
        self.disconnected.fetch_add(1, Ordering::SeqCst);
    }
}

impl RecordingHandler {
    pub fn connected(&self) -> usize {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn disconnected(&self) -> usize {
        self.disconnected.load(Ordering::SeqCst)
    }
}

/// Service accepting `abc123` and `def456`, on ephemeral UDP ports
pub(crate) async fn service<H: RelayHandler>(handler: H) -> Arc<RelayService<H>> {
    let config = ServerConfig::default()
        .disable_udp_mux()
        .stream_keys(vec!["abc123".to_string(), "def456".to_string()])
        .gathering_timeout(Duration::from_secs(5));
    RelayService::new(config, handler).await.unwrap()
}

async fn peer() -> Arc<RTCPeerConnection> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs().unwrap();
    let registry = register_default_interceptors(Registry::new(), &mut media_engine).unwrap();

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();

    Arc::new(
        api.new_peer_connection(RTCConfiguration::default())
            .await
            .unwrap(),
    )
}

async fn offer(pc: &RTCPeerConnection) -> String {
    let offer = pc.create_offer(None).await.unwrap();
    let mut gather_complete = pc.gathering_complete_promise().await;
    pc.set_local_description(offer).await.unwrap();
    let _ = gather_complete.recv().await;
    pc.local_description().await.unwrap().sdp
}

/// Broadcaster sending one audio and one video track
pub(crate) async fn broadcaster_offer() -> (Arc<RTCPeerConnection>, String) {
    let pc = peer().await;

    for (mime_type, id) in [(MIME_TYPE_OPUS, "audio"), (MIME_TYPE_H264, "video")] {
        let track = Arc::new(TrackLocalStaticRTP::new(
            RTCRtpCodecCapability {
                mime_type: mime_type.to_owned(),
                ..Default::default()
            },
            id.to_owned(),
            "broadcaster".to_owned(),
        ));
        pc.add_track(track as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .unwrap();
    }

    let sdp = offer(&pc).await;
    (pc, sdp)
}

/// Receive-only viewer
pub(crate) async fn viewer_offer() -> (Arc<RTCPeerConnection>, String) {
    let pc = peer().await;

    for kind in [RTPCodecType::Audio, RTPCodecType::Video] {
        pc.add_transceiver_from_kind(
            kind,
            Some(RTCRtpTransceiverInit {
                direction: RTCRtpTransceiverDirection::Recvonly,
                send_encodings: vec![],
            }),
        )
        .await
        .unwrap();
    }

    let sdp = offer(&pc).await;
    (pc, sdp)
}
