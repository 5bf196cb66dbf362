use crate::domain::{run_write_loop, IngestionService, IngestorState};
use crate::mqtt::subscriber::mqtt_options;
use crate::mqtt::{run_mqtt_subscriber, MqttSubscriberConfig};
use anyhow::Context;
use common::retry::RetryPolicy;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct TelemetryIngestorConfig {
    pub subscriber: MqttSubscriberConfig,
    /// Decoded messages waiting for the writer
    pub channel_capacity: usize,
    /// Maximum queued messages combined into one store write
    pub write_batch_size: usize,
    /// Applied to each store write before a chunk is dropped
    pub write_retry: RetryPolicy,
}

impl Default for TelemetryIngestorConfig {
    fn default() -> Self {
        Self {
            subscriber: MqttSubscriberConfig::default(),
            channel_capacity: 1024,
            write_batch_size: 100,
            write_retry: RetryPolicy::default(),
        }
    }
}

/// Subscribes to factory telemetry over MQTT and writes it to the
/// time-series store.
pub struct TelemetryIngestor {
    config: TelemetryIngestorConfig,
    service: Arc<IngestionService>,
    state: watch::Sender<IngestorState>,
}

impl TelemetryIngestor {
    pub fn new(config: TelemetryIngestorConfig, service: Arc<IngestionService>) -> Self {
        let (state, _) = watch::channel(IngestorState::Idle);
        Self {
            config,
            service,
            state,
        }
    }

    pub fn state(&self) -> IngestorState {
        *self.state.borrow()
    }

    /// Spawn the subscriber and writer tasks
    pub fn start(self) -> anyhow::Result<IngestorHandle> {
        // Fail on a bad broker URL before anything is spawned
        mqtt_options(&self.config.subscriber).context("invalid MQTT subscriber configuration")?;

        let token = CancellationToken::new();
        let (sender, receiver) = mpsc::channel(self.config.channel_capacity.max(1));

        let writer = tokio::spawn(run_write_loop(
            receiver,
            Arc::clone(&self.service),
            self.config.write_batch_size,
            self.config.write_retry,
        ));

        let subscriber = tokio::spawn(run_mqtt_subscriber(
            self.config.subscriber.clone(),
            sender,
            self.state.clone(),
            token.clone(),
        ));

        info!(
            broker_url = %self.config.subscriber.broker_url,
            "telemetry ingestor started"
        );

        Ok(IngestorHandle {
            state: self.state,
            token,
            subscriber,
            writer,
        })
    }

    #[allow(clippy::type_complexity)]
    pub fn into_runner_process(
        self,
    ) -> Box<
        dyn FnOnce(
                CancellationToken,
            ) -> std::pin::Pin<
                Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send>,
            > + Send,
    > {
        Box::new(move |ctx| {
            Box::pin(async move {
                let handle = self.start()?;
                ctx.cancelled().await;
                handle.stop().await
            })
        })
    }
}

/// Running ingestor tasks
pub struct IngestorHandle {
    state: watch::Sender<IngestorState>,
    token: CancellationToken,
    subscriber: JoinHandle<anyhow::Result<()>>,
    writer: JoinHandle<()>,
}

impl IngestorHandle {
    pub fn state(&self) -> IngestorState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<IngestorState> {
        self.state.subscribe()
    }

    /// Disconnect from the broker, then flush whatever is still queued
    pub async fn stop(self) -> anyhow::Result<()> {
        debug!("stopping telemetry ingestor");
        self.token.cancel();

        let subscriber_result = self
            .subscriber
            .await
            .context("MQTT subscriber task panicked")?;

        // The subscriber owned the only sender, so the writer drains and exits
        if let Err(e) = self.writer.await {
            warn!(error = %e, "ingestion writer task panicked");
        }

        self.state.send_replace(IngestorState::Idle);
        info!("telemetry ingestor stopped");
        subscriber_result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::MockTimeSeriesStore;

    fn service() -> Arc<IngestionService> {
        Arc::new(IngestionService::new(Arc::new(MockTimeSeriesStore::new())))
    }

    #[tokio::test]
    async fn test_new_ingestor_is_idle() {
        let ingestor = TelemetryIngestor::new(TelemetryIngestorConfig::default(), service());
        assert_eq!(ingestor.state(), IngestorState::Idle);
    }

    #[tokio::test]
    async fn test_start_rejects_bad_broker_url() {
        let config = TelemetryIngestorConfig {
            subscriber: MqttSubscriberConfig {
                broker_url: "mqtt://broker:99999".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };

        let ingestor = TelemetryIngestor::new(config, service());
        assert!(ingestor.start().is_err());
    }

    #[tokio::test]
    async fn test_stop_without_broker_returns_to_idle() {
        let config = TelemetryIngestorConfig {
            subscriber: MqttSubscriberConfig {
                // Nothing listens here; the subscriber keeps retrying
                broker_url: "mqtt://127.0.0.1:1".to_string(),
                reconnect_delay: std::time::Duration::from_millis(10),
                ..Default::default()
            },
            ..Default::default()
        };

        let handle = TelemetryIngestor::new(config, service()).start().unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(handle.state(), IngestorState::Connecting);

        handle.stop().await.unwrap();
    }
}
