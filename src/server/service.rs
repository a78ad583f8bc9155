//! Relay service
//!
//! Owns everything the WHIP/WHEP operations share: the stream key
//! validator, the stream registry, the two WebRTC APIs and the event
//! handler. The HTTP layer and tests drive it through `Arc<RelayService>`.

use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::time::timeout;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice::udp_mux::{UDPMuxDefault, UDPMuxParams};
use webrtc::ice::udp_network::UDPNetwork;
use webrtc::ice_transport::ice_candidate_type::RTCIceCandidateType;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpHeaderExtensionCapability, RTPCodecType};

use crate::auth::StreamKeyValidator;
use crate::error::{Error, Result};
use crate::registry::StreamRegistry;
use crate::stats::StreamStats;

use super::config::ServerConfig;
use super::handler::RelayHandler;

/// WHIP/WHEP relay
pub struct RelayService<H: RelayHandler> {
    config: ServerConfig,
    validator: StreamKeyValidator,
    registry: Arc<StreamRegistry>,

    /// API for broadcaster connections (simulcast header extensions)
    whip_api: API,

    /// API for viewer connections
    whep_api: API,

    handler: Arc<H>,
}

impl<H: RelayHandler> RelayService<H> {
    /// Build the service, binding the shared UDP port if one is configured
    pub async fn new(config: ServerConfig, handler: H) -> Result<Arc<Self>> {
        let udp_mux = match config.udp_mux_port {
            Some(port) => {
                let socket = UdpSocket::bind(("0.0.0.0", port)).await?;
                tracing::info!(port = port, "ICE UDP mux bound");
                Some(UDPMuxDefault::new(UDPMuxParams::new(socket)))
            }
            None => None,
        };

        let whip_api = build_api(setting_engine(&config, udp_mux.clone()), true)?;
        let whep_api = build_api(setting_engine(&config, udp_mux), false)?;

        let validator = StreamKeyValidator::with_override(
            config.stream_keys.clone(),
            config.temporary_stream_key.clone(),
        );
        let registry = Arc::new(StreamRegistry::with_config(config.registry.clone()));

        Ok(Arc::new(Self {
            config,
            validator,
            registry,
            whip_api,
            whep_api,
            handler: Arc::new(handler),
        }))
    }

    /// Get the configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get the stream key validator
    pub fn validator(&self) -> &StreamKeyValidator {
        &self.validator
    }

    /// Get a reference to the stream registry
    pub fn registry(&self) -> &Arc<StreamRegistry> {
        &self.registry
    }

    /// Get the event handler
    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }

    pub(crate) fn whip_api(&self) -> &API {
        &self.whip_api
    }

    pub(crate) fn whep_api(&self) -> &API {
        &self.whep_api
    }

    pub(crate) fn ice_servers(&self) -> Vec<RTCIceServer> {
        if self.config.ice_servers.is_empty() {
            return Vec::new();
        }
        vec![RTCIceServer {
            urls: self.config.ice_servers.clone(),
            ..Default::default()
        }]
    }

    /// Keys of streams with a connected broadcaster
    pub async fn active_keys(&self) -> Vec<String> {
        self.registry.list_active_keys().await
    }

    /// Statistics for one stream
    pub async fn stream_stats(&self, stream_key: &str) -> Option<StreamStats> {
        let stream = self.registry.get(stream_key).await?;
        Some(stream.stats().await)
    }

    /// Disconnect every broadcaster
    pub async fn shutdown(&self) {
        let streams = self.registry.streams().await;
        tracing::info!(streams = streams.len(), "Shutting down relay");
        for stream in streams {
            self.teardown(&stream).await;
        }
    }

    /// Apply a remote offer and produce the local answer
    ///
    /// ICE gathering completes before the answer is returned, bounded by
    /// `gathering_timeout`.
    pub(crate) async fn negotiate(&self, connection: &RTCPeerConnection, offer: &str) -> Result<String> {
        let offer = RTCSessionDescription::offer(offer.to_owned())?;
        connection.set_remote_description(offer).await?;

        let answer = connection.create_answer(None).await?;
        let mut gather_complete = connection.gathering_complete_promise().await;
        connection.set_local_description(answer).await?;

        if timeout(self.config.gathering_timeout, gather_complete.recv())
            .await
            .is_err()
        {
            return Err(Error::NegotiationTimeout);
        }

        let local = connection
            .local_description()
            .await
            .ok_or_else(|| webrtc::Error::new("local description not set".to_owned()))?;

        Ok(local.sdp)
    }
}

/// RTP header extensions that carry simulcast layer identity
const SIMULCAST_EXTENSIONS: [&str; 3] = [
    "urn:ietf:params:rtp-hdrext:sdes:mid",
    "urn:ietf:params:rtp-hdrext:sdes:rtp-stream-id",
    "urn:ietf:params:rtp-hdrext:sdes:repaired-rtp-stream-id",
];

fn setting_engine(config: &ServerConfig, udp_mux: Option<Arc<UDPMuxDefault>>) -> SettingEngine {
    let mut setting_engine = SettingEngine::default();

    if !config.nat_1to1_ips.is_empty() {
        setting_engine.set_nat_1to1_ips(config.nat_1to1_ips.clone(), RTCIceCandidateType::Host);
    }

    if let Some(udp_mux) = udp_mux {
        setting_engine.set_udp_network(UDPNetwork::Muxed(udp_mux));
    }

    setting_engine
}

fn build_api(setting_engine: SettingEngine, simulcast: bool) -> Result<API> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs()?;

    if simulcast {
        for uri in SIMULCAST_EXTENSIONS {
            media_engine.register_header_extension(
                RTCRtpHeaderExtensionCapability {
                    uri: uri.to_owned(),
                },
                RTPCodecType::Video,
                None,
            )?;
        }
    }

    let interceptors = register_default_interceptors(Registry::new(), &mut media_engine)?;

    Ok(APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(interceptors)
        .with_setting_engine(setting_engine)
        .build())
}
