use crate::cache::{CacheBackend, CacheConnector};
use crate::domain::{DomainError, DomainResult};
use crate::retry::RetryPolicy;
use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Lazily connected handle to the cache backend.
///
/// The first operation, or the first one after a failure, connects through
/// the retry policy. A failed operation drops the connection so the next call
/// reconnects.
pub struct CacheClient {
    connector: Arc<dyn CacheConnector>,
    retry_policy: RetryPolicy,
    backend: RwLock<Option<Arc<dyn CacheBackend>>>,
    connect_lock: Mutex<()>,
    state: watch::Sender<CacheConnectionState>,
}

impl CacheClient {
    pub fn new(connector: Arc<dyn CacheConnector>, retry_policy: RetryPolicy) -> Self {
        let (state, _) = watch::channel(CacheConnectionState::Disconnected);
        Self {
            connector,
            retry_policy,
            backend: RwLock::new(None),
            connect_lock: Mutex::new(()),
            state,
        }
    }

    pub fn state(&self) -> CacheConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<CacheConnectionState> {
        self.state.subscribe()
    }

    async fn connected_backend(&self) -> DomainResult<Arc<dyn CacheBackend>> {
        if let Some(backend) = self.backend.read().await.as_ref() {
            return Ok(backend.clone());
        }

        let _guard = self.connect_lock.lock().await;
        if let Some(backend) = self.backend.read().await.as_ref() {
            return Ok(backend.clone());
        }

        self.state.send_replace(CacheConnectionState::Connecting);
        let result = self
            .retry_policy
            .retry("cache_connect", || self.connector.connect(), |_| true)
            .await;

        match result {
            Ok(backend) => {
                *self.backend.write().await = Some(backend.clone());
                self.state.send_replace(CacheConnectionState::Connected);
                info!("cache connected");
                Ok(backend)
            }
            Err(e) => {
                self.state.send_replace(CacheConnectionState::Disconnected);
                Err(DomainError::ConnectivityError(format!(
                    "cache unavailable after {} attempts: {}",
                    self.retry_policy.max_attempts, e
                )))
            }
        }
    }

    async fn mark_failed(&self, failed: &Arc<dyn CacheBackend>) {
        let mut current = self.backend.write().await;
        if current
            .as_ref()
            .is_some_and(|backend| Arc::ptr_eq(backend, failed))
        {
            *current = None;
            self.state.send_replace(CacheConnectionState::Disconnected);
        }
    }

    async fn with_backend<T, F, Fut>(&self, operation: &str, f: F) -> DomainResult<T>
    where
        F: FnOnce(Arc<dyn CacheBackend>) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let backend = self.connected_backend().await?;
        match f(backend.clone()).await {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!(
                    operation = operation,
                    error = %e,
                    "cache operation failed, dropping connection"
                );
                self.mark_failed(&backend).await;
                Err(DomainError::ConnectivityError(format!(
                    "cache {} failed: {}",
                    operation, e
                )))
            }
        }
    }

    pub async fn get(&self, key: &str) -> DomainResult<Option<Bytes>> {
        self.with_backend("get", |backend| async move { backend.get(key).await })
            .await
    }

    pub async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> DomainResult<()> {
        self.with_backend("set", |backend| async move { backend.set(key, value, ttl).await })
            .await
    }

    pub async fn delete(&self, key: &str) -> DomainResult<bool> {
        self.with_backend("delete", |backend| async move { backend.delete(key).await })
            .await
    }

    /// Enumerate keys matching `pattern`, then delete them in one batch
    pub async fn delete_pattern(&self, pattern: &str) -> DomainResult<usize> {
        self.with_backend("delete_pattern", |backend| async move {
            let keys = backend.keys_matching(pattern).await?;
            if keys.is_empty() {
                return Ok(0);
            }
            debug!(pattern = pattern, matches = keys.len(), "deleting matched keys");
            backend.delete_many(keys).await
        })
        .await
    }

    /// Close the current connection, if any. Later calls reconnect.
    pub async fn close(&self) -> anyhow::Result<()> {
        let backend = self.backend.write().await.take();
        self.state.send_replace(CacheConnectionState::Disconnected);
        if let Some(backend) = backend {
            info!("closing cache connection");
            backend.close().await?;
        }
        Ok(())
    }
}
