//! Server configuration

use std::net::SocketAddr;
use std::time::Duration;

use crate::registry::RegistryConfig;

/// Default single UDP port shared by every ICE agent
pub const DEFAULT_UDP_MUX_PORT: u16 = 50137;

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the HTTP signaling endpoints bind to
    pub bind_addr: SocketAddr,

    /// UDP port shared by all peer connections (None = ephemeral ports)
    pub udp_mux_port: Option<u16>,

    /// Public IPs advertised as host candidates
    pub nat_1to1_ips: Vec<String>,

    /// STUN/TURN server URLs
    pub ice_servers: Vec<String>,

    /// Accepted stream keys
    pub stream_keys: Vec<String>,

    /// Single key that replaces `stream_keys` when set
    pub temporary_stream_key: Option<String>,

    /// Upper bound on ICE candidate gathering during negotiation
    pub gathering_timeout: Duration,

    /// Stream registry options
    pub registry: RegistryConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            udp_mux_port: Some(DEFAULT_UDP_MUX_PORT),
            nat_1to1_ips: Vec::new(),
            ice_servers: Vec::new(),
            stream_keys: Vec::new(),
            temporary_stream_key: None,
            gathering_timeout: Duration::from_secs(10),
            registry: RegistryConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the shared UDP port
    pub fn udp_mux_port(mut self, port: u16) -> Self {
        self.udp_mux_port = Some(port);
        self
    }

    /// Let every peer connection pick its own ephemeral UDP ports
    pub fn disable_udp_mux(mut self) -> Self {
        self.udp_mux_port = None;
        self
    }

    /// Set the advertised public IPs
    pub fn nat_1to1_ips(mut self, ips: Vec<String>) -> Self {
        self.nat_1to1_ips = ips;
        self
    }

    /// Add a STUN/TURN server URL
    pub fn ice_server(mut self, url: impl Into<String>) -> Self {
        self.ice_servers.push(url.into());
        self
    }

    /// Set the accepted stream keys
    pub fn stream_keys(mut self, keys: Vec<String>) -> Self {
        self.stream_keys = keys;
        self
    }

    /// Set a temporary override key
    pub fn temporary_stream_key(mut self, key: impl Into<String>) -> Self {
        self.temporary_stream_key = Some(key.into());
        self
    }

    /// Set the ICE gathering timeout
    pub fn gathering_timeout(mut self, timeout: Duration) -> Self {
        self.gathering_timeout = timeout;
        self
    }

    /// Set the registry options
    pub fn registry(mut self, registry: RegistryConfig) -> Self {
        self.registry = registry;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();

        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.udp_mux_port, Some(DEFAULT_UDP_MUX_PORT));
        assert!(config.nat_1to1_ips.is_empty());
        assert!(config.ice_servers.is_empty());
        assert!(config.stream_keys.is_empty());
        assert!(config.temporary_stream_key.is_none());
        assert_eq!(config.gathering_timeout, Duration::from_secs(10));
        assert_eq!(config.registry.keyframe_queue_capacity, 50);
    }

    #[test]
    fn test_with_addr() {
        let addr: SocketAddr = "127.0.0.1:9090".parse().unwrap();
        let config = ServerConfig::with_addr(addr);

        assert_eq!(config.bind_addr.port(), 9090);
    }

    #[test]
    fn test_builder_udp_mux() {
        let config = ServerConfig::default().udp_mux_port(40000);
        assert_eq!(config.udp_mux_port, Some(40000));

        let config = config.disable_udp_mux();
        assert!(config.udp_mux_port.is_none());
    }

    #[test]
    fn test_builder_ice_servers_accumulate() {
        let config = ServerConfig::default()
            .ice_server("stun:stun.l.google.com:19302")
            .ice_server("stun:stun1.l.google.com:19302");

        assert_eq!(config.ice_servers.len(), 2);
    }

    #[test]
    fn test_builder_chaining() {
        let addr: SocketAddr = "127.0.0.1:8081".parse().unwrap();
        let config = ServerConfig::default()
            .bind(addr)
            .nat_1to1_ips(vec!["203.0.113.7".into()])
            .stream_keys(vec!["abc123".into()])
            .temporary_stream_key("temp")
            .gathering_timeout(Duration::from_secs(3))
            .registry(RegistryConfig::default().keyframe_queue_capacity(8));

        assert_eq!(config.bind_addr, addr);
        assert_eq!(config.nat_1to1_ips, vec!["203.0.113.7"]);
        assert_eq!(config.stream_keys, vec!["abc123"]);
        assert_eq!(config.temporary_stream_key.as_deref(), Some("temp"));
        assert_eq!(config.gathering_timeout, Duration::from_secs(3));
        assert_eq!(config.registry.keyframe_queue_capacity, 8);
    }
}
