use crate::domain::IngestorState;
use crate::mqtt::{decode_message, parse_topic, TELEMETRY_SUBSCRIPTION};
use anyhow::{bail, Context, Result};
use common::domain::IngestionBatch;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument, Span};

const DISCONNECT_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct MqttSubscriberConfig {
    pub broker_url: String,
    pub client_id: String,
    pub keep_alive: Duration,
    pub reconnect_delay: Duration,
    /// Capacity of the rumqttc request queue
    pub request_capacity: usize,
}

impl Default for MqttSubscriberConfig {
    fn default() -> Self {
        Self {
            broker_url: "mqtt://localhost:1883".to_string(),
            client_id: "millstream-ingestor".to_string(),
            keep_alive: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(5),
            request_capacity: 100,
        }
    }
}

/// Parse broker URL in format mqtt://host:port or tcp://host:port or host:port
pub(crate) fn parse_broker_url(url: &str) -> Result<(String, u16)> {
    let trimmed = url.trim_start_matches("mqtt://").trim_start_matches("tcp://");

    let parts: Vec<&str> = trimmed.split(':').collect();
    match parts.as_slice() {
        [host] if !host.is_empty() => Ok((host.to_string(), 1883)),
        [host, port] if !host.is_empty() => {
            let port = port
                .parse::<u16>()
                .with_context(|| format!("Invalid port in broker URL: {}", port))?;
            Ok((host.to_string(), port))
        }
        _ => bail!("Invalid broker URL format: {}", url),
    }
}

pub(crate) fn mqtt_options(config: &MqttSubscriberConfig) -> Result<MqttOptions> {
    let (host, port) = parse_broker_url(&config.broker_url)?;
    let mut options = MqttOptions::new(&config.client_id, host, port);
    options.set_keep_alive(config.keep_alive);
    options.set_clean_session(true);
    Ok(options)
}

/// Receive telemetry until cancelled, pushing accepted messages onto `sender`.
///
/// rumqttc reconnects on the next poll after an error; the subscription is
/// re-issued after every `ConnAck`.
#[instrument(name = "mqtt_subscriber", skip_all, fields(broker_url = %config.broker_url))]
pub async fn run_mqtt_subscriber(
    config: MqttSubscriberConfig,
    sender: mpsc::Sender<IngestionBatch>,
    state: watch::Sender<IngestorState>,
    token: CancellationToken,
) -> Result<()> {
    let options = mqtt_options(&config)?;
    let (client, mut eventloop) = AsyncClient::new(options, config.request_capacity);

    info!(client_id = %config.client_id, "starting MQTT subscriber");
    state.send_replace(IngestorState::Connecting);

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                debug!("cancellation received, disconnecting");
                disconnect(&client, &mut eventloop).await;
                state.send_replace(IngestorState::Idle);
                info!("MQTT subscriber stopped");
                return Ok(());
            }
            event = eventloop.poll() => {
                match event {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        handle_mqtt_message(&publish.topic, &publish.payload, &sender).await;
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("connected to MQTT broker");
                        match client.try_subscribe(TELEMETRY_SUBSCRIPTION, QoS::AtLeastOnce) {
                            Ok(()) => {
                                state.send_replace(IngestorState::Subscribed);
                            }
                            Err(e) => error!(error = %e, "failed to queue subscription"),
                        }
                    }
                    Ok(Event::Incoming(Packet::SubAck(_))) => {
                        info!(topic = TELEMETRY_SUBSCRIPTION, "subscription acknowledged");
                        state.send_replace(IngestorState::Running);
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        warn!("broker sent disconnect");
                        state.send_replace(IngestorState::Connecting);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(
                            error = %e,
                            delay_ms = config.reconnect_delay.as_millis() as u64,
                            "MQTT connection error, reconnecting"
                        );
                        state.send_replace(IngestorState::Connecting);
                        tokio::select! {
                            _ = token.cancelled() => {}
                            _ = tokio::time::sleep(config.reconnect_delay) => {}
                        }
                    }
                }
            }
        }
    }
}

async fn disconnect(client: &AsyncClient, eventloop: &mut EventLoop) {
    if let Err(e) = client.try_disconnect() {
        debug!(error = %e, "could not queue disconnect");
        return;
    }
    // Poll until the disconnect is written or the connection drops
    let flush = async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(rumqttc::Outgoing::Disconnect)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    };
    if tokio::time::timeout(DISCONNECT_FLUSH_TIMEOUT, flush).await.is_err() {
        debug!("timed out flushing MQTT disconnect");
    }
}

/// Decode one message and queue it for writing. Rejected messages are logged
/// with their topic and raw payload and dropped.
///
/// Each message gets its own root span.
pub(crate) async fn handle_mqtt_message(
    topic: &str,
    payload: &[u8],
    sender: &mpsc::Sender<IngestionBatch>,
) -> bool {
    let span = info_span!(
        parent: Span::none(),
        "mqtt_message",
        topic = %topic,
        payload_size = payload.len(),
        factory_id = tracing::field::Empty,
        machine_id = tracing::field::Empty,
    );

    async {
        let parsed = parse_topic(topic);
        Span::current().record("factory_id", parsed.factory_id.as_str());

        let batch = match decode_message(&parsed, payload, chrono::Utc::now()) {
            Ok(batch) => batch,
            Err(rejection) => {
                warn!(
                    error = %rejection,
                    payload = %String::from_utf8_lossy(payload),
                    "discarding telemetry message"
                );
                return false;
            }
        };

        if let Some(reading) = batch.readings().first() {
            Span::current().record("machine_id", reading.machine_id);
        }

        if sender.send(batch).await.is_err() {
            error!("ingestion channel closed, dropping telemetry message");
            return false;
        }
        debug!("queued telemetry message");
        true
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_broker_url_with_port() {
        let (host, port) = parse_broker_url("mqtt://localhost:1883").unwrap();
        assert_eq!(host, "localhost");
        assert_eq!(port, 1883);
    }

    #[test]
    fn test_parse_broker_url_default_port() {
        let (host, port) = parse_broker_url("tcp://broker.local").unwrap();
        assert_eq!(host, "broker.local");
        assert_eq!(port, 1883);
    }

    #[test]
    fn test_parse_broker_url_rejects_garbage() {
        assert!(parse_broker_url("mqtt://host:port").is_err());
        assert!(parse_broker_url("a:b:c").is_err());
        assert!(parse_broker_url("").is_err());
    }

    #[tokio::test]
    async fn test_malformed_message_does_not_block_next_one() {
        let (tx, mut rx) = mpsc::channel(4);
        let topic = "factory/f-01/machine/3/telemetry";

        assert!(!handle_mqtt_message(topic, b"{not json", &tx).await);
        assert!(
            !handle_mqtt_message(topic, json!({"value": 1}).to_string().as_bytes(), &tx).await
        );

        let good = json!({
            "sensor_type": "vibration",
            "value": 0.02,
            "timestamp": "2024-01-01T00:00:00Z",
            "unit": "g"
        });
        assert!(handle_mqtt_message(topic, good.to_string().as_bytes(), &tx).await);

        let batch = rx.recv().await.unwrap();
        assert_eq!(batch.gateway_id(), "f-01");
        assert_eq!(batch.readings()[0].machine_id, 3);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_channel_reports_drop() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let good = json!({
            "sensor_type": "speed",
            "value": 10,
            "timestamp": "2024-01-01T00:00:00Z",
            "unit": "rpm"
        });
        assert!(
            !handle_mqtt_message(
                "factory/f/machine/1/telemetry",
                good.to_string().as_bytes(),
                &tx
            )
            .await
        );
    }

    #[tokio::test]
    async fn test_invalid_broker_url_fails_fast() {
        let (tx, _rx) = mpsc::channel(1);
        let (state, _) = watch::channel(IngestorState::Idle);
        let config = MqttSubscriberConfig {
            broker_url: "mqtt://host:notaport".to_string(),
            ..Default::default()
        };

        let result = run_mqtt_subscriber(config, tx, state, CancellationToken::new()).await;
        assert!(result.is_err());
    }
}
