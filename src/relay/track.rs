//! Track abstractions used by the relay loops
//!
//! The loops only need to read packets from an inbound track, write packets
//! to an outbound track and ask the broadcaster for a keyframe. These traits
//! cover exactly that, implemented for the webrtc-rs types.

use async_trait::async_trait;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::rtp::packet::Packet;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocalWriter;
use webrtc::track::track_remote::TrackRemote;

/// An inbound RTP track
#[async_trait]
pub trait PacketSource: Send + Sync {
    /// RTP stream id ("rid"); empty for an unlabeled track
    fn rid(&self) -> String;

    /// Synchronization source of the track
    fn ssrc(&self) -> u32;

    /// Negotiated codec MIME type
    fn mime_type(&self) -> String;

    /// Media kind
    fn kind(&self) -> RTPCodecType;

    /// Read the next RTP packet
    async fn read_packet(&self) -> Result<Packet, webrtc::Error>;
}

/// An outbound RTP track
#[async_trait]
pub trait PacketSink: Send + Sync {
    /// Write one RTP packet
    async fn write_packet(&self, packet: &Packet) -> Result<(), webrtc::Error>;
}

/// Something that can deliver a picture loss indication upstream
#[async_trait]
pub trait KeyframeRequester: Send + Sync {
    /// Ask the sender of `media_ssrc` for a new keyframe
    async fn request_keyframe(&self, media_ssrc: u32) -> Result<(), webrtc::Error>;
}

#[async_trait]
impl PacketSource for TrackRemote {
    fn rid(&self) -> String {
        TrackRemote::rid(self).to_string()
    }

    fn ssrc(&self) -> u32 {
        TrackRemote::ssrc(self)
    }

    fn mime_type(&self) -> String {
        self.codec().capability.mime_type
    }

    fn kind(&self) -> RTPCodecType {
        TrackRemote::kind(self)
    }

    async fn read_packet(&self) -> Result<Packet, webrtc::Error> {
        let (packet, _) = self.read_rtp().await?;
        Ok(packet)
    }
}

#[async_trait]
impl PacketSink for TrackLocalStaticRTP {
    async fn write_packet(&self, packet: &Packet) -> Result<(), webrtc::Error> {
        self.write_rtp(packet).await.map(|_| ())
    }
}

#[async_trait]
impl KeyframeRequester for RTCPeerConnection {
    async fn request_keyframe(&self, media_ssrc: u32) -> Result<(), webrtc::Error> {
        self.write_rtcp(&[Box::new(PictureLossIndication {
            sender_ssrc: 0,
            media_ssrc,
        })])
        .await
        .map(|_| ())
    }
}

/// Whether an error just means the other end went away
pub fn is_end_of_stream(err: &webrtc::Error) -> bool {
    matches!(
        err,
        webrtc::Error::ErrClosedPipe
            | webrtc::Error::ErrConnectionClosed
            | webrtc::Error::Util(webrtc::util::Error::ErrBufferClosed)
    )
}

/// Whether a write error only concerns a closed viewer binding
pub fn is_closed_pipe(err: &webrtc::Error) -> bool {
    matches!(err, webrtc::Error::ErrClosedPipe)
}

/// Whether a MIME type names the AV1 codec
pub fn is_av1(mime_type: &str) -> bool {
    mime_type.eq_ignore_ascii_case(webrtc::api::media_engine::MIME_TYPE_AV1)
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted tracks for relay tests

    use std::collections::VecDeque;

    use parking_lot::Mutex;

    use super::*;

    /// Source that replays a fixed list of packets, then reports end of stream
    pub struct ScriptedSource {
        pub rid: String,
        pub ssrc: u32,
        pub mime_type: String,
        pub kind: RTPCodecType,
        packets: Mutex<VecDeque<Packet>>,
    }

    impl ScriptedSource {
        pub fn video(rid: &str, packets: Vec<Packet>) -> Self {
            Self {
                rid: rid.to_string(),
                ssrc: 1111,
                mime_type: "video/VP8".to_string(),
                kind: RTPCodecType::Video,
                packets: Mutex::new(packets.into()),
            }
        }

        pub fn audio(packets: Vec<Packet>) -> Self {
            Self {
                rid: String::new(),
                ssrc: 2222,
                mime_type: "audio/opus".to_string(),
                kind: RTPCodecType::Audio,
                packets: Mutex::new(packets.into()),
            }
        }
    }

    #[async_trait]
    impl PacketSource for ScriptedSource {
        fn rid(&self) -> String {
            self.rid.clone()
        }

        fn ssrc(&self) -> u32 {
            self.ssrc
        }

        fn mime_type(&self) -> String {
            self.mime_type.clone()
        }

        fn kind(&self) -> RTPCodecType {
            self.kind
        }

        async fn read_packet(&self) -> Result<Packet, webrtc::Error> {
            // Yield so spawned companions get a chance to run
            tokio::task::yield_now().await;
            self.packets
                .lock()
                .pop_front()
                .ok_or(webrtc::Error::ErrClosedPipe)
        }
    }

    /// Sink that records everything written to it
    #[derive(Default)]
    pub struct RecordingSink {
        pub packets: Mutex<Vec<Packet>>,
        pub fail_with_closed_pipe: bool,
        pub fail_hard: bool,
    }

    impl RecordingSink {
        pub fn closed() -> Self {
            Self {
                fail_with_closed_pipe: true,
                ..Default::default()
            }
        }

        pub fn broken() -> Self {
            Self {
                fail_hard: true,
                ..Default::default()
            }
        }

        pub fn written(&self) -> Vec<Packet> {
            self.packets.lock().clone()
        }
    }

    #[async_trait]
    impl PacketSink for RecordingSink {
        async fn write_packet(&self, packet: &Packet) -> Result<(), webrtc::Error> {
            if self.fail_with_closed_pipe {
                return Err(webrtc::Error::ErrClosedPipe);
            }
            if self.fail_hard {
                return Err(webrtc::Error::new("write failed".to_owned()));
            }
            self.packets.lock().push(packet.clone());
            Ok(())
        }
    }

    /// Requester that counts keyframe requests per SSRC
    #[derive(Default)]
    pub struct CountingRequester {
        pub requests: Mutex<Vec<u32>>,
    }

    #[async_trait]
    impl KeyframeRequester for CountingRequester {
        async fn request_keyframe(&self, media_ssrc: u32) -> Result<(), webrtc::Error> {
            self.requests.lock().push(media_ssrc);
            Ok(())
        }
    }

    pub fn packet(sequence_number: u16, timestamp: u32) -> Packet {
        let mut packet = Packet::default();
        packet.header.version = 2;
        packet.header.sequence_number = sequence_number;
        packet.header.timestamp = timestamp;
        packet.payload = bytes::Bytes::from_static(&[0x90, 0x90, 0x00, 0x01]);
        packet
    }
}
