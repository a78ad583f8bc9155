//! Statistics and metrics

pub mod metrics;

pub use metrics::{LayerStats, SessionStats, StreamStats};
