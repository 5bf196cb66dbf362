use crate::cache::CacheClient;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Prefix of single-machine entries, `machine:<id>`
pub const MACHINE_KEY_PREFIX: &str = "machine";

/// Key of the cached machine list
pub const ALL_MACHINES_KEY: &str = "machines:all";

/// Patterns cleared after any committed machine write
pub const MACHINE_INVALIDATION_PATTERNS: [&str; 2] = ["machines:*", "machine:*"];

pub fn machine_key(machine_id: i64) -> String {
    format!("{}:{}", MACHINE_KEY_PREFIX, machine_id)
}

/// JSON cache in front of the metadata store.
///
/// Nothing here returns an error: backend failures are logged and reads
/// degrade to misses.
#[derive(Clone)]
pub struct MetadataCache {
    client: Arc<CacheClient>,
    default_ttl: Duration,
}

impl MetadataCache {
    pub fn new(client: Arc<CacheClient>, default_ttl: Duration) -> Self {
        Self {
            client,
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn client(&self) -> &Arc<CacheClient> {
        &self.client
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.client.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!(key = key, "cache miss");
                return None;
            }
            Err(e) => {
                warn!(key = key, error = %e, "cache read failed, treating as miss");
                return None;
            }
        };

        match serde_json::from_slice(&raw) {
            Ok(value) => {
                debug!(key = key, "cache hit");
                Some(value)
            }
            Err(e) => {
                warn!(key = key, error = %e, "malformed cache entry, treating as miss");
                None
            }
        }
    }

    /// Store `value` for `ttl`, or the default TTL. Returns whether it was stored.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> bool {
        let payload = match serde_json::to_vec(value) {
            Ok(payload) => Bytes::from(payload),
            Err(e) => {
                warn!(key = key, error = %e, "failed to serialize cache value");
                return false;
            }
        };

        let ttl = ttl.unwrap_or(self.default_ttl);
        match self.client.set(key, payload, ttl).await {
            Ok(()) => {
                debug!(key = key, ttl_secs = ttl.as_secs(), "cache set");
                true
            }
            Err(e) => {
                warn!(key = key, error = %e, "cache write failed");
                false
            }
        }
    }

    pub async fn invalidate(&self, key: &str) -> bool {
        match self.client.delete(key).await {
            Ok(removed) => {
                debug!(key = key, removed = removed, "cache invalidate");
                removed
            }
            Err(e) => {
                warn!(key = key, error = %e, "cache invalidate failed");
                false
            }
        }
    }

    /// Remove every key matching a glob pattern; 0 on failure
    pub async fn invalidate_pattern(&self, pattern: &str) -> usize {
        match self.client.delete_pattern(pattern).await {
            Ok(removed) => {
                debug!(pattern = pattern, removed = removed, "cache invalidate pattern");
                removed
            }
            Err(e) => {
                warn!(pattern = pattern, error = %e, "cache pattern invalidation failed");
                0
            }
        }
    }

    /// Clear all machine entries after a committed machine write
    pub async fn invalidate_machines(&self) -> usize {
        let mut removed = 0;
        for pattern in MACHINE_INVALIDATION_PATTERNS {
            removed += self.invalidate_pattern(pattern).await;
        }
        removed
    }

    pub async fn close(&self) -> anyhow::Result<()> {
        self.client.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheBackend, InMemoryCacheConnector, MockCacheBackend, MockCacheConnector};
    use crate::retry::RetryPolicy;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Sample {
        id: i64,
        name: String,
    }

    fn in_memory_cache() -> (MetadataCache, InMemoryCacheConnector) {
        let connector = InMemoryCacheConnector::new();
        let client = CacheClient::new(
            Arc::new(connector.clone()),
            RetryPolicy::new(1, Duration::ZERO),
        );
        (MetadataCache::new(Arc::new(client), DEFAULT_CACHE_TTL), connector)
    }

    fn sample() -> Sample {
        Sample {
            id: 1,
            name: "M1".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_get_and_expiry() {
        let (cache, _) = in_memory_cache();

        assert!(cache.set("k", &sample(), Some(Duration::from_secs(60))).await);
        assert_eq!(cache.get::<Sample>("k").await, Some(sample()));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cache.get::<Sample>("k").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_ttl_applied() {
        let (cache, _) = in_memory_cache();
        assert!(cache.set("k", &sample(), None).await);

        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(cache.get::<Sample>("k").await.is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get::<Sample>("k").await.is_none());
    }

    #[tokio::test]
    async fn test_malformed_entry_is_a_miss() {
        let (cache, connector) = in_memory_cache();
        connector
            .backend()
            .set("k", Bytes::from_static(b"not json"), Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(cache.get::<Sample>("k").await, None);
    }

    #[tokio::test]
    async fn test_machine_invalidation_leaves_other_keys() {
        let (cache, _) = in_memory_cache();
        for key in ["machine:1", "machine:2", "machines:all", "machines:by_location:A"] {
            cache.set(key, &sample(), None).await;
        }
        cache.set("gateway:1", &sample(), None).await;

        assert_eq!(cache.invalidate_machines().await, 4);
        assert!(cache.get::<Sample>("gateway:1").await.is_some());
        assert!(cache.get::<Sample>("machine:1").await.is_none());
        assert!(cache.get::<Sample>(ALL_MACHINES_KEY).await.is_none());
    }

    #[tokio::test]
    async fn test_single_pattern_leaves_list_entry() {
        let (cache, _) = in_memory_cache();
        cache.set("machine:1", &sample(), None).await;
        cache.set(ALL_MACHINES_KEY, &vec![sample()], None).await;

        assert_eq!(cache.invalidate_pattern("machine:*").await, 1);
        assert!(cache.get::<Vec<Sample>>(ALL_MACHINES_KEY).await.is_some());
        assert_eq!(cache.invalidate_pattern("nothing:*").await, 0);
        assert!(!cache.invalidate("machine:1").await);
    }

    #[tokio::test]
    async fn test_backend_failures_are_swallowed() {
        let mut connector = MockCacheConnector::new();
        connector.expect_connect().returning(|| {
            let mut backend = MockCacheBackend::new();
            backend
                .expect_get()
                .returning(|_| Err(anyhow::anyhow!("timeout")));
            backend
                .expect_set()
                .returning(|_, _, _| Err(anyhow::anyhow!("timeout")));
            backend
                .expect_keys_matching()
                .returning(|_| Err(anyhow::anyhow!("timeout")));
            Ok(Arc::new(backend) as Arc<dyn CacheBackend>)
        });
        let client = CacheClient::new(Arc::new(connector), RetryPolicy::new(1, Duration::ZERO));
        let cache = MetadataCache::new(Arc::new(client), DEFAULT_CACHE_TTL);

        assert_eq!(cache.get::<Sample>("k").await, None);
        assert!(!cache.set("k", &sample(), None).await);
        assert_eq!(cache.invalidate_machines().await, 0);
    }

    #[test]
    fn test_machine_key() {
        assert_eq!(machine_key(42), "machine:42");
    }
}
