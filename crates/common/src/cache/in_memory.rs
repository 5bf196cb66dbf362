use crate::cache::{glob_matches, CacheBackend, CacheConnector};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

struct Entry {
    value: Bytes,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Process-local cache backend. Expired entries are dropped lazily.
#[derive(Clone, Default)]
pub struct InMemoryCacheBackend {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
}

impl InMemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheBackend for InMemoryCacheBackend {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Bytes>> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.is_live(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }

        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|entry| !entry.is_live(now)) {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> anyhow::Result<()> {
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<bool> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        Ok(entries.remove(key).is_some_and(|entry| entry.is_live(now)))
    }

    async fn keys_matching(&self, pattern: &str) -> anyhow::Result<Vec<String>> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(key, entry)| entry.is_live(now) && glob_matches(pattern, key))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn delete_many(&self, keys: Vec<String>) -> anyhow::Result<usize> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        Ok(keys
            .iter()
            .filter_map(|key| entries.remove(key))
            .filter(|entry| entry.is_live(now))
            .count())
    }

    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Hands out the same in-memory backend on every connect
#[derive(Clone, Default)]
pub struct InMemoryCacheConnector {
    backend: InMemoryCacheBackend,
}

impl InMemoryCacheConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backend(&self) -> InMemoryCacheBackend {
        self.backend.clone()
    }
}

#[async_trait]
impl CacheConnector for InMemoryCacheConnector {
    async fn connect(&self) -> anyhow::Result<Arc<dyn CacheBackend>> {
        Ok(Arc::new(self.backend.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let backend = InMemoryCacheBackend::new();
        backend
            .set("machine:1", Bytes::from_static(b"m1"), Duration::from_secs(60))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(
            backend.get("machine:1").await.unwrap(),
            Some(Bytes::from_static(b"m1"))
        );

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(backend.get("machine:1").await.unwrap(), None);
        assert!(backend.keys_matching("*").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let backend = InMemoryCacheBackend::new();
        let ttl = Duration::from_secs(10);
        backend.set("k", Bytes::from_static(b"a"), ttl).await.unwrap();
        backend.set("k", Bytes::from_static(b"b"), ttl).await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), Some(Bytes::from_static(b"b")));
    }

    #[tokio::test]
    async fn test_pattern_delete_counts_only_matches() {
        let backend = InMemoryCacheBackend::new();
        let ttl = Duration::from_secs(10);
        for key in ["machine:1", "machine:2", "machines:all", "other"] {
            backend.set(key, Bytes::from_static(b"x"), ttl).await.unwrap();
        }

        let keys = backend.keys_matching("machine:*").await.unwrap();
        assert_eq!(keys, vec!["machine:1".to_string(), "machine:2".to_string()]);
        assert_eq!(backend.delete_many(keys).await.unwrap(), 2);

        assert!(backend.get("machines:all").await.unwrap().is_some());
        assert!(backend.get("other").await.unwrap().is_some());
        assert!(!backend.delete("machine:1").await.unwrap());
    }

    #[tokio::test]
    async fn test_connector_shares_backend() {
        let connector = InMemoryCacheConnector::new();
        let first = connector.connect().await.unwrap();
        let second = connector.connect().await.unwrap();

        first
            .set("k", Bytes::from_static(b"v"), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(second.get("k").await.unwrap().is_some());
    }
}
