//! Registry configuration

/// Default capacity of the per-stream keyframe request queue
pub const DEFAULT_KEYFRAME_QUEUE_CAPACITY: usize = 50;

/// Configuration applied to every stream the registry creates
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Pending keyframe requests kept per stream before new ones are dropped
    pub keyframe_queue_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            keyframe_queue_capacity: DEFAULT_KEYFRAME_QUEUE_CAPACITY,
        }
    }
}

impl RegistryConfig {
    /// Set the keyframe queue capacity (minimum 1)
    pub fn keyframe_queue_capacity(mut self, capacity: usize) -> Self {
        self.keyframe_queue_capacity = capacity.max(1);
        self
    }
}
