//! Ingest (WHIP) sessions
//!
//! A broadcaster posts an SDP offer with its stream key. On success the
//! stream is claimed, the inbound peer connection is negotiated and every
//! inbound track is handed to the relay engine. Transport failure and an
//! explicit disconnect share one idempotent teardown.

use std::net::SocketAddr;
use std::sync::Arc;

use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_remote::TrackRemote;

use crate::error::{Error, Result};
use crate::registry::{RegistryError, Stream};
use crate::relay::{run_audio_relay, run_video_relay};
use crate::server::{RelayHandler, RelayService};

use super::egress::shutdown_session;

impl<H: RelayHandler> RelayService<H> {
    /// Accept a broadcaster's offer for `stream_key`
    ///
    /// Returns the SDP answer. Nothing stays registered if any step fails.
    pub async fn ingest(
        self: &Arc<Self>,
        offer: &str,
        stream_key: &str,
        remote_addr: Option<SocketAddr>,
    ) -> Result<String> {
        if !self.validator().validate(stream_key) {
            tracing::warn!(
                remote = ?remote_addr,
                "Rejected broadcaster with invalid stream key"
            );
            return Err(Error::Unauthorized);
        }

        let stream = match self.registry().claim_publisher(stream_key).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(
                    stream = %stream_key,
                    remote = ?remote_addr,
                    "Stream already running; can not take over an existing stream"
                );
                return Err(e.into());
            }
        };

        let answer = match self.negotiate_ingest(&stream, offer).await {
            Ok(answer) => answer,
            Err(e) => {
                tracing::warn!(stream = %stream_key, error = %e, "Ingest negotiation failed");
                self.teardown(&stream).await;
                return Err(e);
            }
        };

        if !stream.mark_connected(remote_addr) {
            return Err(RegistryError::StreamNotActive(stream_key.to_string()).into());
        }

        tracing::info!(
            stream = %stream_key,
            remote = ?remote_addr,
            "Inbound stream connected"
        );
        self.handler().on_stream_connected(stream_key).await;

        Ok(answer)
    }

    async fn negotiate_ingest(self: &Arc<Self>, stream: &Arc<Stream>, offer: &str) -> Result<String> {
        let connection = Arc::new(
            self.whip_api()
                .new_peer_connection(RTCConfiguration {
                    ice_servers: self.ice_servers(),
                    ..Default::default()
                })
                .await?,
        );
        stream.attach_connection(Arc::clone(&connection));

        let service = Arc::downgrade(self);
        let weak_stream = Arc::downgrade(stream);
        let weak_connection = Arc::downgrade(&connection);
        connection.on_track(Box::new(move |track, _receiver, _transceiver| {
            let service = service.clone();
            let weak_stream = weak_stream.clone();
            let weak_connection = weak_connection.clone();
            Box::pin(async move {
                let (Some(service), Some(stream), Some(connection)) = (
                    service.upgrade(),
                    weak_stream.upgrade(),
                    weak_connection.upgrade(),
                ) else {
                    return;
                };
                service.handle_track(stream, connection, track).await;
            })
        }));

        let service = Arc::downgrade(self);
        let weak_stream = Arc::downgrade(stream);
        connection.on_ice_connection_state_change(Box::new(move |state| {
            if state == RTCIceConnectionState::Failed {
                spawn_teardown(service.upgrade(), weak_stream.upgrade(), "ICE connection failed");
            }
            Box::pin(async {})
        }));

        let service = Arc::downgrade(self);
        let weak_stream = Arc::downgrade(stream);
        connection.on_peer_connection_state_change(Box::new(move |state| {
            if matches!(
                state,
                RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed
            ) {
                spawn_teardown(service.upgrade(), weak_stream.upgrade(), "Peer connection ended");
            }
            Box::pin(async {})
        }));

        self.negotiate(&connection, offer).await
    }

    /// Wire a newly observed inbound track into the relay engine
    async fn handle_track(
        &self,
        stream: Arc<Stream>,
        connection: Arc<RTCPeerConnection>,
        track: Arc<TrackRemote>,
    ) {
        let kind = track.kind();
        let codec = track.codec().capability;

        tracing::info!(
            stream = %stream.key(),
            kind = ?kind,
            mime_type = %codec.mime_type,
            rid = %track.rid(),
            ssrc = track.ssrc(),
            "Inbound track started"
        );

        if let Some(info) = stream.observe_track(kind, &codec) {
            self.handler().on_broadcaster_updated(stream.key(), &info).await;
        }

        match kind {
            RTPCodecType::Audio => {
                tokio::spawn(async move {
                    let audio_track = stream.audio_track();
                    run_audio_relay(stream.key(), track.as_ref(), audio_track.as_ref()).await;
                });
            }
            RTPCodecType::Video => {
                tokio::spawn(run_video_relay(stream, track, connection));
            }
            _ => {
                tracing::warn!(stream = %stream.key(), "Ignoring track of unknown kind");
            }
        }
    }

    /// Force-disconnect the broadcaster of `stream_key`
    ///
    /// A no-op when no inbound connection exists.
    pub async fn disconnect(&self, stream_key: &str) {
        match self.registry().get(stream_key).await {
            Some(stream) => {
                tracing::debug!(stream = %stream_key, "Inbound stream disconnect requested");
                self.teardown(&stream).await;
            }
            None => {
                tracing::debug!(stream = %stream_key, "Disconnect requested for unknown stream");
            }
        }
    }

    /// Tear down a stream's inbound side
    ///
    /// Only the first call per claim does anything: the stream leaves the
    /// registry, the inbound connection is closed, viewers are closed and
    /// the handler hears about it.
    pub(crate) async fn teardown(&self, stream: &Arc<Stream>) {
        let Some(released) = self.registry().release_publisher(stream).await else {
            return;
        };

        if let Some(connection) = released.connection {
            if let Err(e) = connection.close().await {
                tracing::debug!(stream = %stream.key(), error = %e, "Failed to close inbound connection");
            }
        }

        self.validator().clear_last_matched(stream.key());

        for session in stream.drain_sessions().await {
            shutdown_session(stream.key(), &session);
        }

        tracing::info!(
            stream = %stream.key(),
            duration_secs = released.duration.as_secs(),
            "Inbound stream disconnected"
        );

        if released.was_connected {
            self.handler().on_stream_disconnected(stream.key()).await;
        }
    }
}

/// Run teardown outside the peer connection's callback
fn spawn_teardown<H: RelayHandler>(
    service: Option<Arc<RelayService<H>>>,
    stream: Option<Arc<Stream>>,
    reason: &'static str,
) {
    let (Some(service), Some(stream)) = (service, stream) else {
        return;
    };

    tracing::info!(stream = %stream.key(), reason = reason, "Inbound transport lost");
    tokio::spawn(async move {
        service.teardown(&stream).await;
    });
}
