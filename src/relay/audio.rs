//! Audio passthrough
//!
//! All viewers share the stream's single outbound audio track, so audio is
//! copied as-is without per-viewer rewriting.

use super::track::{is_closed_pipe, is_end_of_stream, PacketSink, PacketSource};

/// Copy packets from the broadcaster's audio track to the shared track
///
/// Runs until the source ends or a write fails for a reason other than a
/// closed viewer binding. Returns the number of packets relayed.
pub async fn run_audio_relay<S, W>(stream_key: &str, source: &S, sink: &W) -> u64
where
    S: PacketSource + ?Sized,
    W: PacketSink + ?Sized,
{
    let mut relayed = 0u64;

    loop {
        let packet = match source.read_packet().await {
            Ok(packet) => packet,
            Err(e) if is_end_of_stream(&e) => {
                tracing::debug!(stream = %stream_key, "Audio track ended");
                break;
            }
            Err(e) => {
                tracing::warn!(stream = %stream_key, error = %e, "Audio read failed");
                break;
            }
        };

        match sink.write_packet(&packet).await {
            Ok(()) => relayed += 1,
            Err(e) if is_closed_pipe(&e) => {}
            Err(e) => {
                tracing::warn!(stream = %stream_key, error = %e, "Audio write failed");
                break;
            }
        }
    }

    tracing::debug!(stream = %stream_key, packets = relayed, "Audio relay stopped");
    relayed
}
