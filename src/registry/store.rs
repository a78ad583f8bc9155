//! Stream registry implementation
//!
//! The process-wide table of live streams. Claiming a key and tearing a
//! stream down both go through here so there is never more than one
//! `Stream` per key.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::session::EgressSession;

use super::config::RegistryConfig;
use super::entry::{Released, Stream};
use super::error::RegistryError;

/// Central registry for all live streams
///
/// The map lock is only held for map operations, never across negotiation
/// or packet forwarding.
pub struct StreamRegistry {
    /// Map of stream key to stream
    streams: Mutex<HashMap<String, Arc<Stream>>>,

    /// Configuration
    config: RegistryConfig,
}

impl StreamRegistry {
    /// Create a new stream registry with default configuration
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a new stream registry with custom configuration
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Get the registry configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Get the stream for a key, creating it if it does not exist
    pub async fn get_or_create(&self, key: &str) -> Arc<Stream> {
        let mut streams = self.streams.lock().await;
        Arc::clone(
            streams
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Stream::new(key, &self.config))),
        )
    }

    /// Claim a key for a broadcaster
    ///
    /// Creates the stream if needed and marks it as negotiating in the same
    /// critical section, so concurrent claims for one key have exactly one
    /// winner. Returns an error if the stream already has a publisher.
    pub async fn claim_publisher(&self, key: &str) -> Result<Arc<Stream>, RegistryError> {
        let mut streams = self.streams.lock().await;

        let stream = Arc::clone(
            streams
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Stream::new(key, &self.config))),
        );

        if !stream.try_claim() {
            tracing::debug!(stream = %key, "Publisher claim rejected");
            return Err(RegistryError::StreamAlreadyPublishing(key.to_string()));
        }

        tracing::info!(
            stream = %key,
            streams = streams.len(),
            "Publisher claimed stream"
        );

        Ok(stream)
    }

    /// Tear down the inbound side of a stream
    ///
    /// Only the first call for a given claim does anything. The map entry is
    /// removed only if it still refers to this same stream.
    pub async fn release_publisher(&self, stream: &Arc<Stream>) -> Option<Released> {
        let released = stream.release()?;

        let mut streams = self.streams.lock().await;
        let same = streams
            .get(stream.key())
            .map(|current| Arc::ptr_eq(current, stream))
            .unwrap_or(false);
        if same {
            streams.remove(stream.key());
        }

        tracing::info!(
            stream = %stream.key(),
            duration_secs = released.duration.as_secs(),
            removed = same,
            "Publisher released stream"
        );

        Some(released)
    }

    /// Get the stream for a key
    pub async fn get(&self, key: &str) -> Option<Arc<Stream>> {
        self.streams.lock().await.get(key).cloned()
    }

    /// Get a stream whose broadcaster is connected
    pub async fn get_live(&self, key: &str) -> Result<Arc<Stream>, RegistryError> {
        let stream = self
            .get(key)
            .await
            .ok_or_else(|| RegistryError::StreamNotFound(key.to_string()))?;

        if !stream.is_live() {
            return Err(RegistryError::StreamNotActive(key.to_string()));
        }

        Ok(stream)
    }

    /// Remove a stream from the map without touching its connection
    pub async fn remove(&self, key: &str) -> Option<Arc<Stream>> {
        let removed = self.streams.lock().await.remove(key);
        if removed.is_some() {
            tracing::debug!(stream = %key, "Stream removed");
        }
        removed
    }

    /// Keys of streams with a connected broadcaster, sorted
    pub async fn list_active_keys(&self) -> Vec<String> {
        let streams = self.streams.lock().await;
        let mut keys: Vec<String> = streams
            .iter()
            .filter(|(_, stream)| stream.is_live())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Snapshot of every registered stream
    pub async fn streams(&self) -> Vec<Arc<Stream>> {
        self.streams.lock().await.values().cloned().collect()
    }

    /// Find the stream and egress session for a session ID
    pub async fn find_session(&self, session_id: &str) -> Option<(Arc<Stream>, Arc<EgressSession>)> {
        for stream in self.streams().await {
            if let Some(session) = stream.get_session(session_id).await {
                return Some((stream, session));
            }
        }
        None
    }

    /// Number of registered streams
    pub async fn stream_count(&self) -> usize {
        self.streams.lock().await.len()
    }
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use tokio::task::JoinSet;

    use super::*;
    use crate::session::IngestPhase;

    #[tokio::test]
    async fn test_claim_publisher() {
        let registry = StreamRegistry::new();

        let stream = registry.claim_publisher("abc123").await.unwrap();
        assert_eq!(stream.key(), "abc123");
        assert_eq!(stream.phase(), IngestPhase::Negotiating);
        assert_eq!(registry.stream_count().await, 1);

        // Can't claim again while the first publisher holds it
        let result = registry.claim_publisher("abc123").await;
        assert!(matches!(
            result,
            Err(RegistryError::StreamAlreadyPublishing(_))
        ));

        // The existing stream is untouched
        let current = registry.get("abc123").await.unwrap();
        assert!(Arc::ptr_eq(&current, &stream));
        assert_eq!(current.phase(), IngestPhase::Negotiating);
    }

    #[tokio::test]
    async fn test_concurrent_claims_single_winner() {
        let registry = Arc::new(StreamRegistry::new());
        let mut tasks = JoinSet::new();

        for _ in 0..16 {
            let registry = Arc::clone(&registry);
            tasks.spawn(async move { registry.claim_publisher("abc123").await.is_ok() });
        }

        let mut winners = 0;
        while let Some(result) = tasks.join_next().await {
            if result.unwrap() {
                winners += 1;
            }
        }

        assert_eq!(winners, 1);
        assert_eq!(registry.stream_count().await, 1);
    }

    #[tokio::test]
    async fn test_independent_keys() {
        let registry = StreamRegistry::new();

        registry.claim_publisher("abc123").await.unwrap();
        registry.claim_publisher("def456").await.unwrap();

        assert_eq!(registry.stream_count().await, 2);
    }

    #[tokio::test]
    async fn test_release_then_reclaim() {
        let registry = StreamRegistry::new();

        let first = registry.claim_publisher("abc123").await.unwrap();
        assert!(first.mark_connected(None));

        let released = registry.release_publisher(&first).await;
        assert!(released.is_some());
        assert!(registry.get("abc123").await.is_none());

        // Releasing twice is a no-op
        assert!(registry.release_publisher(&first).await.is_none());

        let second = registry.claim_publisher("abc123").await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_stale_release_keeps_new_stream() {
        let registry = StreamRegistry::new();

        let first = registry.claim_publisher("abc123").await.unwrap();
        registry.remove("abc123").await;
        let second = registry.claim_publisher("abc123").await.unwrap();

        // Tearing down the old stream must not remove its replacement
        assert!(registry.release_publisher(&first).await.is_some());
        let current = registry.get("abc123").await.unwrap();
        assert!(Arc::ptr_eq(&current, &second));
    }

    #[tokio::test]
    async fn test_get_live() {
        let registry = StreamRegistry::new();

        let result = registry.get_live("abc123").await;
        assert!(matches!(result, Err(RegistryError::StreamNotFound(_))));

        let stream = registry.claim_publisher("abc123").await.unwrap();
        let result = registry.get_live("abc123").await;
        assert!(matches!(result, Err(RegistryError::StreamNotActive(_))));

        stream.mark_connected(None);
        assert!(registry.get_live("abc123").await.is_ok());
    }

    #[tokio::test]
    async fn test_list_active_keys_sorted() {
        let registry = StreamRegistry::new();

        for key in ["zeta", "alpha", "mid"] {
            let stream = registry.claim_publisher(key).await.unwrap();
            stream.mark_connected(None);
        }
        // Negotiating streams are not listed
        registry.claim_publisher("pending").await.unwrap();

        assert_eq!(registry.list_active_keys().await, vec!["alpha", "mid", "zeta"]);
    }

    #[tokio::test]
    async fn test_get_or_create_reuses_stream() {
        let registry = StreamRegistry::new();

        let a = registry.get_or_create("abc123").await;
        let b = registry.get_or_create("abc123").await;
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!a.has_publisher());
    }
}
