//! WHIP/WHEP server
//!
//! [`RelayService`] implements the ingest and egress operations;
//! [`RelayServer`] exposes them over HTTP.

pub mod config;
pub mod handler;
pub mod listener;
pub mod routes;
pub mod service;

pub use config::ServerConfig;
pub use handler::{NoopHandler, RelayHandler};
pub use listener::RelayServer;
pub use routes::router;
pub use service::RelayService;
