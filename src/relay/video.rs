//! Simulcast video demultiplexing
//!
//! Each inbound video track is one simulcast layer. Its loop forwards every
//! packet to every attached egress session together with the timestamp
//! delta since the previous packet on the same layer; sessions drop the
//! packets that are not from their selected layer.

use std::sync::Arc;

use crate::registry::{Stream, DEFAULT_LAYER};

use super::feedback::run_keyframe_loop;
use super::track::{is_av1, is_end_of_stream, KeyframeRequester, PacketSource};

/// Layer tag for an inbound track
pub fn layer_tag(rid: &str) -> String {
    if rid.is_empty() {
        DEFAULT_LAYER.to_string()
    } else {
        rid.to_string()
    }
}

/// Forward packets from one inbound video layer to the stream's viewers
///
/// Spawns the layer's keyframe companion and stops it on exit. The layer
/// stays registered after the loop ends.
pub async fn run_video_relay<S, R>(stream: Arc<Stream>, source: Arc<S>, requester: Arc<R>)
where
    S: PacketSource + ?Sized,
    R: KeyframeRequester + ?Sized + 'static,
{
    let layer = layer_tag(&source.rid());
    let av1 = is_av1(&source.mime_type());
    let ssrc = source.ssrc();

    let companion = tokio::spawn(run_keyframe_loop(Arc::clone(&stream), requester, ssrc));

    let mut registered = false;
    let mut last_timestamp: Option<u32> = None;

    loop {
        let packet = match source.read_packet().await {
            Ok(packet) => packet,
            Err(e) if is_end_of_stream(&e) => {
                tracing::debug!(stream = %stream.key(), layer = %layer, "Video track ended");
                break;
            }
            Err(e) => {
                tracing::warn!(
                    stream = %stream.key(),
                    layer = %layer,
                    error = %e,
                    "Video read failed"
                );
                break;
            }
        };

        if !registered {
            if stream.add_layer(&layer) {
                tracing::info!(
                    stream = %stream.key(),
                    layer = %layer,
                    ssrc = ssrc,
                    av1 = av1,
                    "Simulcast layer registered"
                );
            }
            registered = true;
        }

        let timestamp = packet.header.timestamp;
        let delta = last_timestamp
            .map(|previous| timestamp.wrapping_sub(previous))
            .unwrap_or(0);
        last_timestamp = Some(timestamp);

        stream.record_packet(&layer, packet.payload.len());

        let sessions = stream.sessions().read().await;
        for session in sessions.values() {
            if let Err(e) = session.send_video_packet(&packet, &layer, delta, av1).await {
                tracing::debug!(
                    stream = %stream.key(),
                    session_id = %session.id(),
                    error = %e,
                    "Video write failed"
                );
            }
        }
    }

    companion.abort();
}
