//! Stream entry
//!
//! This module defines the per-stream state stored in the registry: the
//! shared audio track, the simulcast layers seen so far, the keyframe
//! request queue, the attached egress sessions and the inbound connection.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Mutex, RwLock};
use webrtc::api::media_engine::MIME_TYPE_OPUS;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;

use crate::session::{BroadcasterInfo, EgressSession, IngestPhase};
use crate::stats::{LayerStats, StreamStats};

use super::config::RegistryConfig;

/// Layer tag used when the broadcaster sends a single unlabeled video track
pub const DEFAULT_LAYER: &str = "default";

/// Inbound (broadcaster) side of a stream
struct Inbound {
    phase: IngestPhase,
    connection: Option<Arc<RTCPeerConnection>>,
    claimed_at: Instant,
}

/// Result of tearing down the inbound side of a stream
pub struct Released {
    /// Peer connection to close, if negotiation got far enough to attach one
    pub connection: Option<Arc<RTCPeerConnection>>,
    /// Time since the stream was claimed by the broadcaster
    pub duration: Duration,
    /// Whether negotiation had completed
    pub was_connected: bool,
}

/// A single live broadcast
pub struct Stream {
    key: String,

    /// Shared outbound audio track; every viewer gets the same encoding
    audio_track: Arc<TrackLocalStaticRTP>,

    /// Known simulcast layers, in discovery order
    layers: parking_lot::RwLock<Vec<String>>,

    /// Keyframe requests waiting to be sent upstream
    keyframe_tx: mpsc::Sender<()>,
    keyframe_rx: Mutex<mpsc::Receiver<()>>,

    /// Attached egress sessions keyed by session ID
    sessions: RwLock<HashMap<String, Arc<EgressSession>>>,

    inbound: parking_lot::Mutex<Inbound>,

    broadcaster: parking_lot::RwLock<Option<BroadcasterInfo>>,

    /// Codec of the first inbound video track
    video_codec: parking_lot::RwLock<Option<RTCRtpCodecCapability>>,

    layer_stats: parking_lot::Mutex<HashMap<String, LayerStats>>,

    created_at: Instant,
}

impl Stream {
    /// Create a new stream with a fresh audio track and empty tables
    pub fn new(key: impl Into<String>, config: &RegistryConfig) -> Self {
        let (keyframe_tx, keyframe_rx) = mpsc::channel(config.keyframe_queue_capacity);

        let audio_track = Arc::new(TrackLocalStaticRTP::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                ..Default::default()
            },
            "audio".to_owned(),
            "pion".to_owned(),
        ));

        Self {
            key: key.into(),
            audio_track,
            layers: parking_lot::RwLock::new(Vec::new()),
            keyframe_tx,
            keyframe_rx: Mutex::new(keyframe_rx),
            sessions: RwLock::new(HashMap::new()),
            inbound: parking_lot::Mutex::new(Inbound {
                phase: IngestPhase::Disconnected,
                connection: None,
                claimed_at: Instant::now(),
            }),
            broadcaster: parking_lot::RwLock::new(None),
            video_codec: parking_lot::RwLock::new(None),
            layer_stats: parking_lot::Mutex::new(HashMap::new()),
            created_at: Instant::now(),
        }
    }

    /// Stream key this stream is registered under
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Shared outbound audio track
    pub fn audio_track(&self) -> Arc<TrackLocalStaticRTP> {
        Arc::clone(&self.audio_track)
    }

    // --- Simulcast layers ---

    /// Register a layer tag
    ///
    /// Returns true if the layer was not known before.
    pub fn add_layer(&self, layer: &str) -> bool {
        let mut layers = self.layers.write();
        if layers.iter().any(|l| l == layer) {
            return false;
        }
        layers.push(layer.to_string());
        true
    }

    /// Snapshot of the known layers in discovery order
    pub fn layers(&self) -> Vec<String> {
        self.layers.read().clone()
    }

    /// Check whether a layer has been seen
    pub fn has_layer(&self, layer: &str) -> bool {
        self.layers.read().iter().any(|l| l == layer)
    }

    // --- Keyframe requests ---

    /// Queue a keyframe request for the broadcaster
    ///
    /// Never blocks. Returns false if the request was dropped because the
    /// queue is full or no layer loop is draining it anymore.
    pub fn request_keyframe(&self) -> bool {
        self.keyframe_tx.try_send(()).is_ok()
    }

    pub(crate) fn keyframe_requests(&self) -> &Mutex<mpsc::Receiver<()>> {
        &self.keyframe_rx
    }

    // --- Egress sessions ---

    #[cfg(test)]
    pub(crate) async fn add_session(&self, session: Arc<EgressSession>) {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.id().to_string(), session);
    }

    /// Attach an egress session only while the broadcaster is connected
    ///
    /// The liveness check happens under the session table lock, so a
    /// session is either refused here or drained by the stream's teardown.
    pub async fn attach_session(&self, session: Arc<EgressSession>) -> bool {
        let mut sessions = self.sessions.write().await;
        if !self.is_live() {
            return false;
        }
        sessions.insert(session.id().to_string(), session);
        true
    }

    /// Detach an egress session
    pub async fn remove_session(&self, session_id: &str) -> Option<Arc<EgressSession>> {
        self.sessions.write().await.remove(session_id)
    }

    /// Look up an attached egress session
    pub async fn get_session(&self, session_id: &str) -> Option<Arc<EgressSession>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Number of attached egress sessions
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Detach every egress session
    pub async fn drain_sessions(&self) -> Vec<Arc<EgressSession>> {
        self.sessions
            .write()
            .await
            .drain()
            .map(|(_, session)| session)
            .collect()
    }

    pub(crate) fn sessions(&self) -> &RwLock<HashMap<String, Arc<EgressSession>>> {
        &self.sessions
    }

    // --- Inbound connection ---

    /// Current inbound phase
    pub fn phase(&self) -> IngestPhase {
        self.inbound.lock().phase
    }

    /// Check if a broadcaster holds this stream (negotiating or connected)
    pub fn has_publisher(&self) -> bool {
        self.inbound.lock().phase.holds_stream()
    }

    /// Check if the inbound connection is fully established
    pub fn is_live(&self) -> bool {
        self.inbound.lock().phase == IngestPhase::Connected
    }

    /// Mark the stream as taken by a negotiating broadcaster
    ///
    /// Returns false if another broadcaster already holds it.
    pub(super) fn try_claim(&self) -> bool {
        let mut inbound = self.inbound.lock();
        if inbound.phase.holds_stream() {
            return false;
        }
        inbound.phase = IngestPhase::Negotiating;
        inbound.connection = None;
        inbound.claimed_at = Instant::now();
        true
    }

    /// Attach the negotiating peer connection so teardown can close it
    pub fn attach_connection(&self, connection: Arc<RTCPeerConnection>) {
        self.inbound.lock().connection = Some(connection);
    }

    #[cfg(test)]
    pub(crate) fn inbound_connection(&self) -> Option<Arc<RTCPeerConnection>> {
        self.inbound.lock().connection.clone()
    }

    /// Mark the inbound connection as established
    ///
    /// Returns false if the stream was torn down while negotiating.
    pub fn mark_connected(&self, remote_addr: Option<SocketAddr>) -> bool {
        {
            let mut inbound = self.inbound.lock();
            if inbound.phase != IngestPhase::Negotiating {
                return false;
            }
            inbound.phase = IngestPhase::Connected;
        }

        let mut broadcaster = self.broadcaster.write();
        let info = broadcaster.get_or_insert_with(BroadcasterInfo::new);
        if info.remote_addr.is_none() {
            info.remote_addr = remote_addr;
        }
        true
    }

    /// Flip the inbound side to disconnected
    ///
    /// Only the first call after a claim returns `Some`; later calls are
    /// no-ops, which makes every teardown path safe to run more than once.
    pub(super) fn release(&self) -> Option<Released> {
        let mut inbound = self.inbound.lock();
        if !inbound.phase.holds_stream() {
            return None;
        }
        let was_connected = inbound.phase == IngestPhase::Connected;
        inbound.phase = IngestPhase::Disconnected;
        Some(Released {
            connection: inbound.connection.take(),
            duration: inbound.claimed_at.elapsed(),
            was_connected,
        })
    }

    // --- Broadcaster metadata ---

    /// Current broadcaster metadata, if any track has been observed
    pub fn broadcaster(&self) -> Option<BroadcasterInfo> {
        self.broadcaster.read().clone()
    }

    /// Fold an inbound track's codec into the broadcaster metadata
    ///
    /// Returns a snapshot when something changed.
    pub fn observe_track(
        &self,
        kind: RTPCodecType,
        codec: &RTCRtpCodecCapability,
    ) -> Option<BroadcasterInfo> {
        if kind == RTPCodecType::Video {
            let mut video_codec = self.video_codec.write();
            if video_codec.is_none() {
                *video_codec = Some(codec.clone());
            }
        }

        let mut broadcaster = self.broadcaster.write();
        let info = broadcaster.get_or_insert_with(BroadcasterInfo::new);
        if info.observe_codec(kind, &codec.mime_type) {
            Some(info.clone())
        } else {
            None
        }
    }

    /// Codec of the inbound video, once a video track has been seen
    pub fn video_codec(&self) -> Option<RTCRtpCodecCapability> {
        self.video_codec.read().clone()
    }

    // --- Statistics ---

    /// Count a forwarded packet on a layer
    pub fn record_packet(&self, layer: &str, size: usize) {
        let mut stats = self.layer_stats.lock();
        stats
            .entry(layer.to_string())
            .or_insert_with(|| LayerStats::new(layer))
            .record(size);
    }

    /// Snapshot of the stream's statistics
    pub async fn stats(&self) -> StreamStats {
        let mut layers: Vec<LayerStats> = self.layer_stats.lock().values().cloned().collect();
        let order = self.layers();
        layers.sort_by_key(|l| {
            order
                .iter()
                .position(|known| known == &l.layer)
                .unwrap_or(usize::MAX)
        });

        StreamStats {
            stream_key: self.key.clone(),
            phase: self.phase(),
            uptime: self.created_at.elapsed(),
            viewer_count: self.session_count().await,
            layers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream() -> Stream {
        Stream::new("abc123", &RegistryConfig::default())
    }

    #[test]
    fn test_layers_are_deduplicated_in_order() {
        let stream = stream();

        assert!(stream.add_layer("q"));
        assert!(stream.add_layer("h"));
        assert!(!stream.add_layer("q"));
        assert!(stream.add_layer("f"));

        assert_eq!(stream.layers(), vec!["q", "h", "f"]);
        assert!(stream.has_layer("h"));
        assert!(!stream.has_layer("x"));
    }

    #[test]
    fn test_claim_release_cycle() {
        let stream = stream();
        assert_eq!(stream.phase(), IngestPhase::Disconnected);
        assert!(!stream.has_publisher());

        assert!(stream.try_claim());
        assert!(stream.has_publisher());
        assert!(!stream.is_live());

        // Second claim is rejected while the first holds the stream
        assert!(!stream.try_claim());

        assert!(stream.mark_connected(None));
        assert!(stream.is_live());
        assert!(!stream.try_claim());

        let released = stream.release().unwrap();
        assert!(released.was_connected);
        assert!(released.connection.is_none());
        assert!(!stream.has_publisher());

        // Release is idempotent
        assert!(stream.release().is_none());

        // And the stream can be claimed again
        assert!(stream.try_claim());
    }

    #[test]
    fn test_mark_connected_after_release_fails() {
        let stream = stream();
        assert!(stream.try_claim());
        assert!(!stream.release().unwrap().was_connected);

        assert!(!stream.mark_connected(None));
        assert_eq!(stream.phase(), IngestPhase::Disconnected);
    }

    #[tokio::test]
    async fn test_attach_session_requires_live_stream() {
        use crate::relay::testing::RecordingSink;

        let stream = stream();
        let viewer = || Arc::new(EgressSession::new("abc123", Arc::new(RecordingSink::default())));

        // Not claimed yet
        assert!(!stream.attach_session(viewer()).await);

        // Negotiating is not enough
        assert!(stream.try_claim());
        assert!(!stream.attach_session(viewer()).await);

        assert!(stream.mark_connected(None));
        assert!(stream.attach_session(viewer()).await);
        assert_eq!(stream.session_count().await, 1);

        // Sessions attached before teardown are drained by it
        stream.release().unwrap();
        assert_eq!(stream.drain_sessions().await.len(), 1);

        // After teardown nothing can attach
        assert!(!stream.attach_session(viewer()).await);
        assert_eq!(stream.session_count().await, 0);
    }

    #[test]
    fn test_keyframe_queue_drops_when_full() {
        let config = RegistryConfig::default().keyframe_queue_capacity(2);
        let stream = Stream::new("abc123", &config);

        assert!(stream.request_keyframe());
        assert!(stream.request_keyframe());
        assert!(!stream.request_keyframe());
    }

    #[tokio::test]
    async fn test_keyframe_requests_drain() {
        let stream = stream();
        assert!(stream.request_keyframe());

        let mut rx = stream.keyframe_requests().lock().await;
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_observe_track_sets_codecs_once() {
        let stream = stream();

        let vp8 = RTCRtpCodecCapability {
            mime_type: "video/VP8".to_string(),
            clock_rate: 90000,
            ..Default::default()
        };
        let info = stream.observe_track(RTPCodecType::Video, &vp8).unwrap();
        assert_eq!(info.video_codec, "VP8");
        assert_eq!(stream.video_codec().unwrap().mime_type, "video/VP8");

        // A second video layer with the same codec changes nothing
        assert!(stream.observe_track(RTPCodecType::Video, &vp8).is_none());

        let opus = RTCRtpCodecCapability {
            mime_type: "audio/opus".to_string(),
            ..Default::default()
        };
        let info = stream.observe_track(RTPCodecType::Audio, &opus).unwrap();
        assert_eq!(info.audio_codec, "opus");
        assert_eq!(info.video_codec, "VP8");
    }

    #[tokio::test]
    async fn test_stats_follow_layer_order() {
        let stream = stream();
        stream.add_layer("q");
        stream.add_layer("f");
        stream.record_packet("f", 1000);
        stream.record_packet("q", 200);
        stream.record_packet("q", 300);

        let stats = stream.stats().await;
        assert_eq!(stats.stream_key, "abc123");
        assert_eq!(stats.viewer_count, 0);
        assert_eq!(stats.layers.len(), 2);
        assert_eq!(stats.layers[0].layer, "q");
        assert_eq!(stats.layers[0].packets, 2);
        assert_eq!(stats.layers[0].bytes, 500);
        assert_eq!(stats.layers[1].layer, "f");
    }
}
