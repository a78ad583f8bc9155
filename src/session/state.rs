//! Session state machines
//!
//! Tracks the lifecycle of the broadcaster's inbound connection and of each
//! viewer's egress session.

/// Inbound (WHIP) connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IngestPhase {
    /// Offer received, stream key being checked
    Authenticating,
    /// Key accepted and stream claimed, SDP exchange in progress
    Negotiating,
    /// Answer returned, media flowing
    Connected,
    /// No inbound connection
    #[default]
    Disconnected,
}

impl IngestPhase {
    /// Whether a broadcaster currently holds the stream
    pub fn holds_stream(&self) -> bool {
        matches!(self, IngestPhase::Negotiating | IngestPhase::Connected)
    }
}

/// Viewer (WHEP) session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EgressPhase {
    /// SDP exchange in progress
    #[default]
    Negotiating,
    /// Answer returned, receiving forwarded packets
    Active,
    /// Peer connection closed or failed
    Closed,
}

impl EgressPhase {
    /// Transition on successful negotiation
    pub fn activate(self) -> Self {
        match self {
            EgressPhase::Negotiating => EgressPhase::Active,
            other => other,
        }
    }

    /// Transition on teardown; terminal
    pub fn close(self) -> Self {
        EgressPhase::Closed
    }
}
