//! Broadcaster and viewer sessions
//!
//! Ingest covers the single inbound (WHIP) connection per stream; egress
//! covers the per-viewer (WHEP) sessions and layer switching.

pub mod broadcaster;
pub mod egress;
pub mod ingest;
pub mod state;

pub use broadcaster::{BroadcasterInfo, UNKNOWN_CODEC};
pub use egress::EgressSession;
pub use state::{EgressPhase, IngestPhase};

#[cfg(test)]
pub(crate) mod testing;
