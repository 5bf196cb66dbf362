use anyhow::{Context, Result};
use async_nats::jetstream::{self, kv};
use std::time::Duration;
use tracing::{debug, info};

pub struct NatsClient {
    client: async_nats::Client,
    jetstream: jetstream::Context,
}

impl NatsClient {
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self> {
        info!(url = %url, timeout_ms = timeout.as_millis(), "Connecting to NATS");

        let client = async_nats::ConnectOptions::new()
            .connection_timeout(timeout)
            .connect(url)
            .await
            .context("Failed to connect to NATS")?;

        let jetstream = jetstream::new(client.clone());

        info!("Successfully connected to NATS");
        Ok(Self { client, jetstream })
    }

    /// Open a key-value bucket, creating it when missing.
    ///
    /// Only the latest revision of a key is kept and nothing outlives `max_age`.
    pub async fn key_value_store(&self, bucket: &str, max_age: Duration) -> Result<kv::Store> {
        match self.jetstream.get_key_value(bucket).await {
            Ok(store) => {
                debug!(bucket = %bucket, "key-value bucket already exists");
                Ok(store)
            }
            Err(_) => {
                debug!(bucket = %bucket, "creating key-value bucket");
                self.jetstream
                    .create_key_value(kv::Config {
                        bucket: bucket.to_string(),
                        history: 1,
                        max_age,
                        ..Default::default()
                    })
                    .await
                    .context("failed to create key-value bucket")
            }
        }
    }

    pub fn client(&self) -> &async_nats::Client {
        &self.client
    }
}
