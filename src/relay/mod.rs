//! Relay engine
//!
//! Moves media from the broadcaster's inbound tracks to the viewers:
//!
//! ```text
//!   inbound audio ──► run_audio_relay ──► shared TrackLocalStaticRTP ──► every viewer
//!
//!   inbound video "q" ──► run_video_relay ─┐
//!   inbound video "h" ──► run_video_relay ─┼─► EgressSession::send_video_packet
//!   inbound video "f" ──► run_video_relay ─┘      (filter by selected layer,
//!                              │                   rewrite seq/timestamp)
//!                              ▼
//!                      run_keyframe_loop ──► RTCP PLI upstream
//! ```

pub mod audio;
pub mod feedback;
pub mod track;
pub mod video;

pub use audio::run_audio_relay;
pub use feedback::run_keyframe_loop;
pub use track::{is_av1, is_closed_pipe, is_end_of_stream, KeyframeRequester, PacketSink, PacketSource};
pub use video::{layer_tag, run_video_relay};

#[cfg(test)]
pub(crate) use track::testing;
