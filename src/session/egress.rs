//! Egress (WHEP) sessions
//!
//! One [`EgressSession`] per viewer. The session owns its outbound RTP
//! timeline: sequence numbers and timestamps are rewritten so the viewer
//! sees a continuous stream no matter which simulcast layer feeds it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use webrtc::api::media_engine::MIME_TYPE_H264;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::rtp::packet::Packet;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocal;

use crate::error::{Error, Result};
use crate::registry::{RegistryError, Stream};
use crate::relay::{is_closed_pipe, PacketSink};
use crate::server::{RelayHandler, RelayService};
use crate::stats::SessionStats;

use super::state::EgressPhase;

/// Timestamp the outbound timeline starts from
pub const INITIAL_TIMESTAMP: u32 = 50000;

/// Outbound RTP timeline
#[derive(Debug)]
struct Timeline {
    sequence_number: u16,
    timestamp: u32,
}

/// A viewer attached to a stream
pub struct EgressSession {
    id: String,
    stream_key: String,

    /// Output video track
    sink: Arc<dyn PacketSink>,

    /// Selected simulcast layer
    current_layer: RwLock<Option<String>>,

    timeline: Mutex<Timeline>,

    phase: Mutex<EgressPhase>,

    connection: Mutex<Option<Arc<RTCPeerConnection>>>,

    packets_sent: AtomicU64,
    packets_filtered: AtomicU64,
    write_errors: AtomicU64,
    layer_switches: AtomicU64,

    created_at: Instant,
}

impl EgressSession {
    /// Create a session with a fresh UUID
    pub fn new(stream_key: impl Into<String>, sink: Arc<dyn PacketSink>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            stream_key: stream_key.into(),
            sink,
            current_layer: RwLock::new(None),
            timeline: Mutex::new(Timeline {
                sequence_number: 0,
                timestamp: INITIAL_TIMESTAMP,
            }),
            phase: Mutex::new(EgressPhase::Negotiating),
            connection: Mutex::new(None),
            packets_sent: AtomicU64::new(0),
            packets_filtered: AtomicU64::new(0),
            write_errors: AtomicU64::new(0),
            layer_switches: AtomicU64::new(0),
            created_at: Instant::now(),
        }
    }

    /// Session ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Key of the stream this session watches
    pub fn stream_key(&self) -> &str {
        &self.stream_key
    }

    /// Currently selected layer
    pub fn current_layer(&self) -> Option<String> {
        self.current_layer.read().clone()
    }

    /// Select a layer; takes effect on the next forwarded packet
    pub fn select_layer(&self, layer: &str) {
        *self.current_layer.write() = Some(layer.to_string());
        self.layer_switches.fetch_add(1, Ordering::Relaxed);
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> EgressPhase {
        *self.phase.lock()
    }

    pub(crate) fn activate(&self) {
        let mut phase = self.phase.lock();
        *phase = phase.activate();
    }

    /// Mark the session closed and hand back its peer connection
    pub(crate) fn close(&self) -> Option<Arc<RTCPeerConnection>> {
        let mut phase = self.phase.lock();
        *phase = phase.close();
        self.connection.lock().take()
    }

    pub(crate) fn attach_connection(&self, connection: Arc<RTCPeerConnection>) {
        *self.connection.lock() = Some(connection);
    }

    /// Forward one video packet from `layer`
    ///
    /// Packets from other layers are dropped. A session with no selected
    /// layer adopts the first one it sees. Returns whether the packet was
    /// written.
    pub async fn send_video_packet(
        &self,
        packet: &Packet,
        layer: &str,
        timestamp_delta: u32,
        is_av1: bool,
    ) -> std::result::Result<bool, webrtc::Error> {
        if !self.accepts(layer) {
            self.packets_filtered.fetch_add(1, Ordering::Relaxed);
            return Ok(false);
        }

        let mut outbound = packet.clone();
        {
            let mut timeline = self.timeline.lock();
            timeline.sequence_number = timeline.sequence_number.wrapping_add(1);
            timeline.timestamp = timeline.timestamp.wrapping_add(timestamp_delta);
            outbound.header.sequence_number = timeline.sequence_number;
            outbound.header.timestamp = timeline.timestamp;
        }

        // Dependency descriptors refer to the source layer structure
        if is_av1 {
            outbound.header.extension = false;
            outbound.header.extension_profile = 0;
            outbound.header.extensions.clear();
        }

        match self.sink.write_packet(&outbound).await {
            Ok(()) => {
                self.packets_sent.fetch_add(1, Ordering::Relaxed);
                Ok(true)
            }
            Err(e) if is_closed_pipe(&e) => Ok(false),
            Err(e) => {
                self.write_errors.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    fn accepts(&self, layer: &str) -> bool {
        if let Some(current) = self.current_layer.read().as_deref() {
            return current == layer;
        }

        let mut current = self.current_layer.write();
        match current.as_deref() {
            Some(selected) => selected == layer,
            None => {
                *current = Some(layer.to_string());
                true
            }
        }
    }

    /// Snapshot of the session's counters
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            packets_filtered: self.packets_filtered.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
            layer_switches: self.layer_switches.load(Ordering::Relaxed),
            duration: self.created_at.elapsed(),
        }
    }

    /// Time since the session was created
    pub fn duration(&self) -> Duration {
        self.created_at.elapsed()
    }
}

impl<H: RelayHandler> RelayService<H> {
    /// Attach a viewer to a live stream
    ///
    /// Returns the SDP answer and the new session ID.
    pub async fn create_session(
        &self,
        offer: &str,
        stream_key: &str,
    ) -> Result<(String, String)> {
        let stream = self.registry().get_live(stream_key).await?;

        let connection = Arc::new(
            self.whep_api()
                .new_peer_connection(RTCConfiguration {
                    ice_servers: self.ice_servers(),
                    ..Default::default()
                })
                .await?,
        );

        let video_track = Arc::new(TrackLocalStaticRTP::new(
            egress_video_codec(&stream),
            "video".to_owned(),
            "pion".to_owned(),
        ));

        let session = Arc::new(EgressSession::new(stream_key, video_track.clone()));
        session.attach_connection(Arc::clone(&connection));
        let session_id = session.id().to_string();

        match self
            .negotiate_session(&stream, &session, &connection, video_track, offer)
            .await
        {
            Ok(answer) => {
                session.activate();
                let viewers = stream.session_count().await;
                tracing::info!(
                    stream = %stream_key,
                    session_id = %session_id,
                    viewers = viewers,
                    "Egress session created"
                );
                Ok((answer, session_id))
            }
            Err(e) => {
                stream.remove_session(&session_id).await;
                session.close();
                if let Err(close_err) = connection.close().await {
                    tracing::debug!(error = %close_err, "Failed to close egress connection");
                }
                Err(e)
            }
        }
    }

    async fn negotiate_session(
        &self,
        stream: &Arc<Stream>,
        session: &Arc<EgressSession>,
        connection: &Arc<RTCPeerConnection>,
        video_track: Arc<TrackLocalStaticRTP>,
        offer: &str,
    ) -> Result<String> {
        let audio_sender = connection
            .add_track(stream.audio_track() as Arc<dyn TrackLocal + Send + Sync>)
            .await?;
        spawn_rtcp_reader(audio_sender, None);

        let video_sender = connection
            .add_track(video_track as Arc<dyn TrackLocal + Send + Sync>)
            .await?;
        spawn_rtcp_reader(video_sender, Some(Arc::clone(stream)));

        if !stream.attach_session(Arc::clone(session)).await {
            return Err(RegistryError::StreamNotActive(stream.key().to_string()).into());
        }

        let weak_stream = Arc::downgrade(stream);
        let weak_session = Arc::downgrade(session);
        connection.on_peer_connection_state_change(Box::new(move |state| {
            let weak_stream = weak_stream.clone();
            let weak_session = weak_session.clone();
            Box::pin(async move {
                if !matches!(
                    state,
                    RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed
                ) {
                    return;
                }
                let (Some(stream), Some(session)) = (weak_stream.upgrade(), weak_session.upgrade())
                else {
                    return;
                };
                close_session(&stream, &session).await;
            })
        }));

        self.negotiate(connection, offer).await
    }

    /// Layers a viewer can switch between
    pub async fn list_layers(&self, session_id: &str) -> Result<Vec<String>> {
        let (stream, _) = self
            .registry()
            .find_session(session_id)
            .await
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;
        Ok(stream.layers())
    }

    /// Switch a viewer to another layer
    ///
    /// Unknown layer tags are accepted; the viewer receives nothing until
    /// the broadcaster sends that layer.
    pub async fn set_layer(&self, session_id: &str, layer: &str) -> Result<()> {
        let (stream, session) = self
            .registry()
            .find_session(session_id)
            .await
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;

        session.select_layer(layer);

        if !stream.has_layer(layer) {
            tracing::debug!(
                stream = %stream.key(),
                session_id = %session_id,
                layer = %layer,
                "Selected layer not seen yet"
            );
        }

        if !stream.request_keyframe() {
            tracing::debug!(stream = %stream.key(), "Keyframe request dropped");
        }

        tracing::info!(
            stream = %stream.key(),
            session_id = %session_id,
            layer = %layer,
            "Layer switched"
        );

        Ok(())
    }
}

/// Video codec for a viewer's output track
fn egress_video_codec(stream: &Stream) -> RTCRtpCodecCapability {
    stream.video_codec().unwrap_or_else(|| RTCRtpCodecCapability {
        mime_type: MIME_TYPE_H264.to_owned(),
        ..Default::default()
    })
}

/// Drain RTCP from a viewer, turning picture loss reports into keyframe
/// requests when `stream` is set
///
/// Interceptors such as NACK only run while RTCP is being read.
fn spawn_rtcp_reader(sender: Arc<RTCRtpSender>, stream: Option<Arc<Stream>>) {
    tokio::spawn(async move {
        while let Ok((packets, _)) = sender.read_rtcp().await {
            let Some(ref stream) = stream else {
                continue;
            };
            let wants_keyframe = packets.iter().any(|p| {
                p.as_any()
                    .downcast_ref::<PictureLossIndication>()
                    .is_some()
            });
            if wants_keyframe {
                stream.request_keyframe();
            }
        }
    });
}

/// Remove a viewer from its stream and close its connection
pub(crate) async fn close_session(stream: &Stream, session: &EgressSession) {
    if stream.remove_session(session.id()).await.is_none() {
        return;
    }
    shutdown_session(stream.key(), session);
}

/// Close a viewer that is no longer in any session table
pub(crate) fn shutdown_session(stream_key: &str, session: &EgressSession) {
    if let Some(connection) = session.close() {
        // May run inside this connection's own state callback
        tokio::spawn(async move {
            if let Err(e) = connection.close().await {
                tracing::debug!(error = %e, "Failed to close egress connection");
            }
        });
    }

    let stats = session.stats();
    tracing::info!(
        stream = %stream_key,
        session_id = %session.id(),
        packets_sent = stats.packets_sent,
        delivery_ratio = stats.delivery_ratio(),
        "Egress session closed"
    );
}
