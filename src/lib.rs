//! whip-rs: WHIP/WHEP simulcast relay
//!
//! This library relays one live broadcast per stream key from a WebRTC
//! broadcaster to many viewers:
//! - WHIP ingest with constant-time stream key validation
//! - One inbound connection per key; concurrent claims resolve to one winner
//! - Simulcast layer demultiplexing with per-viewer layer selection
//! - Continuous RTP timelines across layer switches
//! - Keyframe requests (RTCP PLI) on viewer join, loss and layer switch
//! - WHEP egress with the server-sent-events and layer extensions
//!
//! # Architecture
//!
//! ```text
//!   broadcaster ──POST /whip──► RelayService::ingest
//!                                   │ validate key, claim Stream
//!                                   ▼
//!                          StreamRegistry { key → Stream }
//!                                   │
//!                 on_track ─────────┼──────────────┐
//!                    ▼              ▼              ▼
//!             run_audio_relay  run_video_relay  run_video_relay   (one per layer)
//!                    │              │              │
//!                    ▼              └──────┬───────┘
//!            shared audio track            ▼
//!                    │            EgressSession::send_video_packet
//!                    ▼                     ▼
//!   viewers ◄──────────────────────────────┘   ◄──POST /whep── RelayService::create_session
//! ```
//!
//! # Example: Simple Server
//!
//! ```no_run
//! use whip_rs::{BroadcasterInfo, RelayHandler, RelayServer, ServerConfig};
//!
//! struct MyHandler;
//!
//! impl RelayHandler for MyHandler {
//!     async fn on_stream_connected(&self, stream_key: &str) {
//!         println!("Stream connected: {}", stream_key);
//!     }
//!
//!     async fn on_broadcaster_updated(&self, _stream_key: &str, info: &BroadcasterInfo) {
//!         println!("Video codec: {}", info.video_codec);
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::default().stream_keys(vec!["abc123".into()]);
//!     let server = RelayServer::new(config, MyHandler).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod error;
pub mod registry;
pub mod relay;
pub mod server;
pub mod session;
pub mod stats;

// Re-export main types for convenience
pub use auth::StreamKeyValidator;
pub use error::{Error, Result};
pub use registry::{RegistryConfig, RegistryError, Stream, StreamRegistry};
pub use server::config::ServerConfig;
pub use server::handler::{NoopHandler, RelayHandler};
pub use server::listener::RelayServer;
pub use server::service::RelayService;
pub use session::{BroadcasterInfo, EgressSession};
