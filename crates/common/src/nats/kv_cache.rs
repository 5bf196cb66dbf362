use crate::cache::{glob_matches, CacheBackend, CacheConnector};
use crate::nats::NatsClient;
use anyhow::{Context, Result};
use async_nats::jetstream::kv;
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use chrono::Utc;
use futures::future::try_join_all;
use futures::TryStreamExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const EXPIRY_HEADER_LEN: usize = 8;

/// Map a cache key onto the NATS key alphabet. `:` becomes `.`, any other
/// character outside `[A-Za-z0-9-_/=.]` becomes `_`.
fn encode_key(key: &str) -> String {
    key.chars()
        .map(|c| match c {
            ':' => '.',
            c if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '/' | '=' | '.') => c,
            _ => '_',
        })
        .collect()
}

fn decode_key(key: &str) -> String {
    key.replace('.', ":")
}

/// Encode a glob pattern the same way as keys, leaving wildcards and escapes intact
fn encode_pattern(pattern: &str) -> String {
    pattern
        .chars()
        .map(|c| match c {
            '*' | '?' | '\\' => c,
            c => encode_key(&c.to_string()).chars().next().unwrap_or('_'),
        })
        .collect()
}

/// Prefix the payload with its absolute expiry in Unix milliseconds
fn frame_entry(value: &[u8], ttl: Duration) -> Bytes {
    let expires_at = Utc::now().timestamp_millis() + ttl.as_millis() as i64;
    let mut buf = BytesMut::with_capacity(EXPIRY_HEADER_LEN + value.len());
    buf.put_i64(expires_at);
    buf.put_slice(value);
    buf.freeze()
}

/// Payload of a framed entry, or `None` when expired or not framed
fn unframe_entry(raw: Bytes, now_ms: i64) -> Option<Bytes> {
    if raw.len() < EXPIRY_HEADER_LEN {
        return None;
    }
    let mut header = [0u8; EXPIRY_HEADER_LEN];
    header.copy_from_slice(&raw[..EXPIRY_HEADER_LEN]);
    if i64::from_be_bytes(header) <= now_ms {
        return None;
    }
    Some(raw.slice(EXPIRY_HEADER_LEN..))
}

/// Cache backend on a JetStream key-value bucket
pub struct NatsKvCacheBackend {
    client: async_nats::Client,
    store: kv::Store,
}

impl NatsKvCacheBackend {
    pub fn new(client: async_nats::Client, store: kv::Store) -> Self {
        Self { client, store }
    }

    async fn live_value(&self, encoded_key: &str) -> Result<Option<Bytes>> {
        let raw = self
            .store
            .get(encoded_key)
            .await
            .context("failed to read key-value entry")?;
        Ok(raw.and_then(|raw| unframe_entry(raw, Utc::now().timestamp_millis())))
    }
}

#[async_trait]
impl CacheBackend for NatsKvCacheBackend {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.live_value(&encode_key(key)).await
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        self.store
            .put(encode_key(key), frame_entry(&value, ttl))
            .await
            .context("failed to write key-value entry")?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let encoded = encode_key(key);
        let existed = self.live_value(&encoded).await?.is_some();
        self.store
            .purge(&encoded)
            .await
            .context("failed to purge key-value entry")?;
        Ok(existed)
    }

    async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>> {
        let encoded_pattern = encode_pattern(pattern);
        let keys: Vec<String> = self
            .store
            .keys()
            .await
            .context("failed to list key-value keys")?
            .try_collect()
            .await
            .context("failed to read key-value keys")?;

        let mut matched = Vec::new();
        for key in keys {
            if !glob_matches(&encoded_pattern, &key) {
                continue;
            }
            if self.live_value(&key).await?.is_some() {
                matched.push(decode_key(&key));
            }
        }
        matched.sort();
        debug!(pattern = %pattern, matches = matched.len(), "matched key-value keys");
        Ok(matched)
    }

    async fn delete_many(&self, keys: Vec<String>) -> Result<usize> {
        let count = keys.len();
        try_join_all(keys.iter().map(|key| self.store.purge(encode_key(key))))
            .await
            .context("failed to purge key-value entries")?;
        Ok(count)
    }

    async fn close(&self) -> Result<()> {
        self.client
            .flush()
            .await
            .context("failed to flush NATS connection")
    }
}

/// Connects to NATS and opens the cache bucket
pub struct NatsKvCacheConnector {
    url: String,
    bucket: String,
    connection_timeout: Duration,
    max_age: Duration,
}

impl NatsKvCacheConnector {
    /// `max_age` bounds every entry in the bucket and should be at least the
    /// longest TTL in use.
    pub fn new(
        url: impl Into<String>,
        bucket: impl Into<String>,
        connection_timeout: Duration,
        max_age: Duration,
    ) -> Self {
        Self {
            url: url.into(),
            bucket: bucket.into(),
            connection_timeout,
            max_age,
        }
    }
}

#[async_trait]
impl CacheConnector for NatsKvCacheConnector {
    async fn connect(&self) -> Result<Arc<dyn CacheBackend>> {
        let client = NatsClient::connect(&self.url, self.connection_timeout).await?;
        let store = client.key_value_store(&self.bucket, self.max_age).await?;
        Ok(Arc::new(NatsKvCacheBackend::new(client.client().clone(), store)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_encoding() {
        assert_eq!(encode_key("machine:42"), "machine.42");
        assert_eq!(encode_key("machines:all"), "machines.all");
        assert_eq!(encode_key("a b*c"), "a_b_c");
        assert_eq!(decode_key("machine.42"), "machine:42");
    }

    #[test]
    fn test_pattern_encoding_keeps_wildcards() {
        let pattern = encode_pattern("machine:*");
        assert_eq!(pattern, "machine.*");
        assert!(glob_matches(&pattern, &encode_key("machine:1")));
        assert!(!glob_matches(&pattern, &encode_key("machines:all")));
    }

    #[test]
    fn test_frame_round_trip_and_expiry() {
        let framed = frame_entry(b"payload", Duration::from_secs(60));
        let now = Utc::now().timestamp_millis();

        assert_eq!(
            unframe_entry(framed.clone(), now),
            Some(Bytes::from_static(b"payload"))
        );
        assert_eq!(unframe_entry(framed, now + 61_000), None);
    }

    #[test]
    fn test_short_entry_ignored() {
        assert_eq!(unframe_entry(Bytes::from_static(b"abc"), 0), None);
    }
}
