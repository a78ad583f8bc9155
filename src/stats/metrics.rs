//! Statistics for relayed streams and viewer sessions

use std::time::{Duration, Instant};

use crate::session::IngestPhase;

/// Egress session statistics
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    /// Packets written to the viewer
    pub packets_sent: u64,
    /// Packets dropped because they belong to another layer
    pub packets_filtered: u64,
    /// Failed writes (closed-pipe errors excluded)
    pub write_errors: u64,
    /// Number of `set_layer` calls
    pub layer_switches: u64,
    /// Session duration
    pub duration: Duration,
}

impl SessionStats {
    /// Create new stats tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Share of forwarded packets that were delivered
    pub fn delivery_ratio(&self) -> f64 {
        let total = self.packets_sent + self.packets_filtered;
        if total == 0 {
            0.0
        } else {
            self.packets_sent as f64 / total as f64
        }
    }
}

/// Counters for a single simulcast layer
#[derive(Debug, Clone)]
pub struct LayerStats {
    /// Layer tag
    pub layer: String,
    /// Packets received on this layer
    pub packets: u64,
    /// Payload bytes received on this layer
    pub bytes: u64,
    /// First packet time
    pub started_at: Instant,
}

impl LayerStats {
    pub fn new(layer: impl Into<String>) -> Self {
        Self {
            layer: layer.into(),
            packets: 0,
            bytes: 0,
            started_at: Instant::now(),
        }
    }

    /// Count one packet
    pub fn record(&mut self, size: usize) {
        self.packets += 1;
        self.bytes += size as u64;
    }

    /// Calculate bitrate in bits per second
    pub fn bitrate(&self) -> u64 {
        bitrate(self.bytes, self.started_at.elapsed())
    }
}

/// Stream-level statistics
#[derive(Debug, Clone)]
pub struct StreamStats {
    /// Stream key
    pub stream_key: String,
    /// Inbound connection phase
    pub phase: IngestPhase,
    /// Time since the stream was created
    pub uptime: Duration,
    /// Attached egress sessions
    pub viewer_count: usize,
    /// Per-layer counters, in layer discovery order
    pub layers: Vec<LayerStats>,
}

impl StreamStats {
    /// Total video bytes received across all layers
    pub fn total_bytes(&self) -> u64 {
        self.layers.iter().map(|l| l.bytes).sum()
    }

    /// Aggregate inbound video bitrate in bits per second
    pub fn bitrate(&self) -> u64 {
        bitrate(self.total_bytes(), self.uptime)
    }
}

fn bitrate(bytes: u64, elapsed: Duration) -> u64 {
    let secs = elapsed.as_secs();
    if secs > 0 {
        (bytes * 8) / secs
    } else {
        0
    }
}
