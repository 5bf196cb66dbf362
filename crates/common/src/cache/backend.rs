use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

/// Raw key/value operations of a connected cache backend.
///
/// Expired entries must behave as absent for `get` and `keys_matching`.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Bytes>>;

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> anyhow::Result<()>;

    /// Returns whether a live entry was removed
    async fn delete(&self, key: &str) -> anyhow::Result<bool>;

    /// Live keys matching a glob pattern (`*`, `?`, `\` escapes)
    async fn keys_matching(&self, pattern: &str) -> anyhow::Result<Vec<String>>;

    /// Delete all given keys in one batch, returning how many were removed
    async fn delete_many(&self, keys: Vec<String>) -> anyhow::Result<usize>;

    async fn close(&self) -> anyhow::Result<()>;
}

/// Opens connections to a cache backend
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait CacheConnector: Send + Sync {
    async fn connect(&self) -> anyhow::Result<Arc<dyn CacheBackend>>;
}
