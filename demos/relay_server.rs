//! WHIP/WHEP relay server example
//!
//! Run with: cargo run --example relay_server
//!
//! Configuration comes from the environment:
//!   BIND_ADDR      HTTP address (default: 0.0.0.0:8080)
//!   STREAM_KEYS    Comma-separated accepted keys (default: abc123)
//!   STREAM_KEY     Temporary key that replaces STREAM_KEYS
//!   UDP_MUX_PORT   Shared ICE UDP port, 0 for ephemeral ports (default: 50137)
//!   NAT_1TO1_IPS   Comma-separated public IPs to advertise
//!
//! ## Publishing (send stream)
//!
//! With OBS (30+):
//!   Service: WHIP
//!   Server: http://localhost:8080/whip
//!   Bearer Token: abc123
//!
//! With GStreamer:
//!   gst-launch-1.0 videotestsrc ! x264enc ! rtph264pay ! \
//!     whipsink whip-endpoint=http://localhost:8080/whip auth-token=abc123
//!
//! ## Playing (receive stream)
//!
//! Any WHEP player pointed at http://localhost:8080/whep with the stream key
//! as the Authorization header.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use whip_rs::{BroadcasterInfo, RelayHandler, RelayServer, ServerConfig};

/// Handler that logs broadcaster events
struct LoggingHandler {
    connections: AtomicU64,
}

impl LoggingHandler {
    fn new() -> Self {
        Self {
            connections: AtomicU64::new(0),
        }
    }
}

impl RelayHandler for LoggingHandler {
    async fn on_stream_connected(&self, stream_key: &str) {
        let total = self.connections.fetch_add(1, Ordering::Relaxed) + 1;
        println!("[{}] Broadcaster connected (total connections: {})", stream_key, total);
    }

    async fn on_broadcaster_updated(&self, stream_key: &str, info: &BroadcasterInfo) {
        println!(
            "[{}] Broadcaster: remote={:?} video={} audio={}",
            stream_key, info.remote_addr, info.video_codec, info.audio_codec
        );
    }

    async fn on_stream_disconnected(&self, stream_key: &str) {
        println!("[{}] Broadcaster disconnected", stream_key);
    }
}

fn list_from_env(name: &str) -> Option<Vec<String>> {
    let value = std::env::var(name).ok()?;
    let items: Vec<String> = value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

fn config_from_env() -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let mut config = ServerConfig::default()
        .stream_keys(list_from_env("STREAM_KEYS").unwrap_or_else(|| vec!["abc123".to_string()]));

    if let Ok(addr) = std::env::var("BIND_ADDR") {
        config = config.bind(addr.parse::<SocketAddr>()?);
    }

    if let Ok(key) = std::env::var("STREAM_KEY") {
        if !key.is_empty() {
            config = config.temporary_stream_key(key);
        }
    }

    if let Ok(port) = std::env::var("UDP_MUX_PORT") {
        config = match port.parse::<u16>()? {
            0 => config.disable_udp_mux(),
            port => config.udp_mux_port(port),
        };
    }

    if let Some(ips) = list_from_env("NAT_1TO1_IPS") {
        config = config.nat_1to1_ips(ips);
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("whip_rs=debug".parse()?)
                .add_directive("relay_server=debug".parse()?)
                .add_directive("tower_http=info".parse()?),
        )
        .init();

    let config = config_from_env()?;

    println!("Starting WHIP/WHEP relay on {}", config.bind_addr);
    match config.udp_mux_port {
        Some(port) => println!("ICE media on UDP port {}", port),
        None => println!("ICE media on ephemeral UDP ports"),
    }
    println!();
    println!("=== Publish a stream ===");
    println!("OBS:    Service: WHIP  Server: http://localhost:{}/whip", config.bind_addr.port());
    println!();
    println!("=== Play a stream ===");
    println!("WHEP:   http://localhost:{}/whep", config.bind_addr.port());
    println!();

    let server = RelayServer::new(config, LoggingHandler::new()).await?;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            eprintln!("Failed to listen for ctrl-c: {}", e);
        }
        println!("\nShutting down...");
    };

    if let Err(e) = server.run_until(shutdown).await {
        eprintln!("Server error: {}", e);
    }

    Ok(())
}
