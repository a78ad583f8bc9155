//! Upstream keyframe requests
//!
//! Viewers joining or switching layers need a keyframe. Requests are queued
//! on the stream and each video layer runs a companion loop that turns them
//! into RTCP picture loss indications for its own SSRC.

use std::sync::Arc;

use crate::registry::Stream;

use super::track::KeyframeRequester;

/// Drain the stream's keyframe queue, sending a PLI for `media_ssrc` per
/// request
///
/// Ends when the queue closes or a PLI cannot be sent.
pub async fn run_keyframe_loop<R>(stream: Arc<Stream>, requester: Arc<R>, media_ssrc: u32)
where
    R: KeyframeRequester + ?Sized,
{
    loop {
        let request = {
            let mut requests = stream.keyframe_requests().lock().await;
            requests.recv().await
        };

        if request.is_none() {
            break;
        }

        if let Err(e) = requester.request_keyframe(media_ssrc).await {
            tracing::debug!(
                stream = %stream.key(),
                ssrc = media_ssrc,
                error = %e,
                "Keyframe request failed"
            );
            break;
        }

        tracing::trace!(stream = %stream.key(), ssrc = media_ssrc, "Keyframe requested");
    }
}
