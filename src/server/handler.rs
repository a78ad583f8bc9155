//! Relay event handler
//!
//! Applications implement [`RelayHandler`] to hear about broadcasters coming
//! and going. Every callback has a no-op default.

use std::future::Future;

use crate::session::BroadcasterInfo;

/// Callbacks fired by the relay
///
/// Callbacks run on the task that observed the event; keep them short.
pub trait RelayHandler: Send + Sync + 'static {
    /// A broadcaster finished negotiation and media is about to flow
    fn on_stream_connected(&self, stream_key: &str) -> impl Future<Output = ()> + Send {
        let _ = stream_key;
        async {}
    }

    /// Broadcaster metadata changed (a new inbound track was observed)
    fn on_broadcaster_updated(
        &self,
        stream_key: &str,
        info: &BroadcasterInfo,
    ) -> impl Future<Output = ()> + Send {
        let _ = (stream_key, info);
        async {}
    }

    /// The broadcaster's inbound connection was torn down
    fn on_stream_disconnected(&self, stream_key: &str) -> impl Future<Output = ()> + Send {
        let _ = stream_key;
        async {}
    }
}

/// Handler that ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl RelayHandler for NoopHandler {}
