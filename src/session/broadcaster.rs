//! Broadcaster metadata
//!
//! Best-effort description of the current broadcaster, built from the
//! inbound tracks as they appear. Resolution, bitrate and frame rate are
//! not negotiated in SDP, so those stay unknown unless an outer layer fills
//! them in.

use std::net::SocketAddr;
use std::time::SystemTime;

use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;

/// Codec name used when it cannot be derived from the track
pub const UNKNOWN_CODEC: &str = "Unknown";

/// Current broadcaster details
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcasterInfo {
    /// HTTP peer address of the WHIP request
    pub remote_addr: Option<SocketAddr>,

    /// When the first track was observed
    pub connected_at: SystemTime,

    /// Audio codec name (e.g. "opus")
    pub audio_codec: String,

    /// Video codec name (e.g. "H264", "VP8")
    pub video_codec: String,

    /// Video width
    pub width: Option<u32>,

    /// Video height
    pub height: Option<u32>,

    /// Video bitrate (kbps)
    pub video_bitrate: Option<u32>,

    /// Video framerate
    pub framerate: Option<f64>,
}

impl BroadcasterInfo {
    pub fn new() -> Self {
        Self {
            remote_addr: None,
            connected_at: SystemTime::now(),
            audio_codec: UNKNOWN_CODEC.to_string(),
            video_codec: UNKNOWN_CODEC.to_string(),
            width: None,
            height: None,
            video_bitrate: None,
            framerate: None,
        }
    }

    /// Record the codec of an inbound track
    ///
    /// A codec field that is already known is left alone. Returns true if a
    /// field changed.
    pub fn observe_codec(&mut self, kind: RTPCodecType, mime_type: &str) -> bool {
        let slot = match kind {
            RTPCodecType::Audio => &mut self.audio_codec,
            RTPCodecType::Video => &mut self.video_codec,
            _ => return false,
        };

        if slot != UNKNOWN_CODEC {
            return false;
        }

        let name = codec_name(mime_type);
        if name == UNKNOWN_CODEC {
            return false;
        }

        *slot = name.to_string();
        true
    }

    /// Whether a video codec has been observed
    pub fn has_video(&self) -> bool {
        self.video_codec != UNKNOWN_CODEC
    }
}

impl Default for BroadcasterInfo {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract the codec name from a MIME type ("video/VP8" -> "VP8")
pub fn codec_name(mime_type: &str) -> &str {
    match mime_type.split_once('/') {
        Some((_, name)) if !name.is_empty() => name,
        _ => UNKNOWN_CODEC,
    }
}
