//! Stream registry
//!
//! The registry maps a stream key to at most one live [`Stream`]. Each
//! stream owns the shared audio track, the known simulcast layers, the
//! keyframe request queue and the table of attached egress sessions.
//!
//! # Architecture
//!
//! ```text
//!                          Arc<StreamRegistry>
//!                     ┌─────────────────────────┐
//!                     │ streams: HashMap<Key,   │
//!                     │   Stream {              │
//!                     │     audio_track,        │
//!                     │     layers,             │
//!                     │     keyframe_tx,        │
//!                     │     sessions,           │
//!                     │   }                     │
//!                     │ >                       │
//!                     └───────────┬─────────────┘
//!                                 │
//!         ┌───────────────────────┼───────────────────────┐
//!         │                       │                       │
//!         ▼                       ▼                       ▼
//!   [WHIP ingest]           [EgressSession]         [EgressSession]
//!   run_video_relay()       layer "q"               layer "f"
//!         │                       │                       │
//!         └──► sessions.read() ──► send_video_packet() ──► UDP
//! ```
//!
//! Audio does not go through the session table: every viewer binds the
//! same `TrackLocalStaticRTP`, which fans out on its own.

pub mod config;
pub mod entry;
pub mod error;
pub mod store;

pub use config::RegistryConfig;
pub use entry::{Released, Stream, DEFAULT_LAYER};
pub use error::RegistryError;
pub use store::StreamRegistry;
