use chrono::{DateTime, Utc};
use common::domain::{
    deserialize_timestamp, DomainError, DomainResult, IngestionBatch, SensorReading,
    TimeSeriesStore,
};
use common::garde::{finite_value, validate_struct};
use garde::Validate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// One reading inside a batch ingestion request
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SensorReadingRequest {
    #[garde(skip)]
    pub machine_id: i64,
    #[garde(length(min = 1))]
    pub sensor_type: String,
    #[garde(custom(finite_value))]
    pub value: f64,
    #[garde(length(min = 1))]
    pub unit: String,
    #[serde(deserialize_with = "deserialize_timestamp")]
    #[garde(skip)]
    pub timestamp: DateTime<Utc>,
}

impl From<SensorReadingRequest> for SensorReading {
    fn from(request: SensorReadingRequest) -> Self {
        SensorReading {
            machine_id: request.machine_id,
            sensor_type: request.sensor_type,
            value: request.value,
            unit: request.unit,
            timestamp: request.timestamp,
        }
    }
}

/// Body of a gateway batch upload
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct IngestBatchRequest {
    #[garde(length(min = 1))]
    pub gateway_id: String,
    #[serde(deserialize_with = "deserialize_timestamp")]
    #[garde(skip)]
    pub timestamp: DateTime<Utc>,
    #[garde(length(min = 1), dive)]
    pub data: Vec<SensorReadingRequest>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReceipt {
    pub gateway_id: String,
    pub readings_written: usize,
}

/// Validates whole batches and writes them to the time-series store
pub struct IngestionService {
    store: Arc<dyn TimeSeriesStore>,
}

impl IngestionService {
    pub fn new(store: Arc<dyn TimeSeriesStore>) -> Self {
        Self { store }
    }

    /// Parse, validate and write a batch body. A single bad reading rejects
    /// the batch and nothing is written.
    #[instrument(skip_all)]
    pub async fn ingest_batch(&self, body: serde_json::Value) -> DomainResult<IngestReceipt> {
        let request: IngestBatchRequest = match serde_json::from_value(body.clone()) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, payload = %body, "rejected malformed ingestion batch");
                return Err(DomainError::ValidationError(e.to_string()));
            }
        };

        if let Err(e) = validate_struct(&request) {
            warn!(error = %e, payload = %body, "rejected invalid ingestion batch");
            return Err(e);
        }

        let batch = IngestionBatch::new(
            request.gateway_id,
            request.timestamp,
            request.data.into_iter().map(SensorReading::from).collect(),
        )?;

        let gateway_id = batch.gateway_id().to_string();
        let readings_written = self.write_batch(batch).await?;

        Ok(IngestReceipt {
            gateway_id,
            readings_written,
        })
    }

    pub async fn write_batch(&self, batch: IngestionBatch) -> DomainResult<usize> {
        self.write_batches(vec![batch]).await
    }

    /// Write several batches in one store submission
    pub async fn write_batches(&self, batches: Vec<IngestionBatch>) -> DomainResult<usize> {
        let batch_count = batches.len();
        let readings: Vec<SensorReading> = batches
            .into_iter()
            .flat_map(IngestionBatch::into_readings)
            .collect();

        if readings.is_empty() {
            return Ok(0);
        }

        self.store.write(&readings).await?;
        debug!(
            batches = batch_count,
            readings = readings.len(),
            "wrote sensor readings"
        );
        Ok(readings.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::MockTimeSeriesStore;
    use serde_json::json;

    fn reading_json(machine_id: i64, value: serde_json::Value) -> serde_json::Value {
        json!({
            "machine_id": machine_id,
            "sensor_type": "temperature",
            "value": value,
            "timestamp": "2024-01-01T00:00:00Z",
            "unit": "C"
        })
    }

    #[tokio::test]
    async fn test_valid_batch_written_in_one_call() {
        let mut store = MockTimeSeriesStore::new();
        store
            .expect_write()
            .withf(|readings: &[SensorReading]| {
                readings.len() == 2
                    && readings[0].machine_id == 1
                    && readings[1].value == 72.0
                    && readings[0].timestamp.timestamp() == 1_704_067_200
            })
            .times(1)
            .returning(|_| Ok(()));

        let service = IngestionService::new(Arc::new(store));
        let receipt = service
            .ingest_batch(json!({
                "gateway_id": "gw-1",
                "timestamp": "2024-01-01T00:00:05Z",
                "data": [reading_json(1, json!(70.5)), reading_json(2, json!(72.0))]
            }))
            .await
            .unwrap();

        assert_eq!(
            receipt,
            IngestReceipt {
                gateway_id: "gw-1".to_string(),
                readings_written: 2
            }
        );
    }

    #[tokio::test]
    async fn test_one_bad_reading_rejects_whole_batch() {
        let mut store = MockTimeSeriesStore::new();
        store.expect_write().never();
        let service = IngestionService::new(Arc::new(store));

        let result = service
            .ingest_batch(json!({
                "gateway_id": "gw-1",
                "timestamp": "2024-01-01T00:00:05Z",
                "data": [reading_json(1, json!(70.5)), reading_json(2, json!("hot"))]
            }))
            .await;

        assert!(matches!(result, Err(DomainError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_missing_field_rejects_batch() {
        let mut store = MockTimeSeriesStore::new();
        store.expect_write().never();
        let service = IngestionService::new(Arc::new(store));

        let mut reading = reading_json(1, json!(1.0));
        reading.as_object_mut().unwrap().remove("unit");

        let result = service
            .ingest_batch(json!({
                "gateway_id": "gw-1",
                "timestamp": "2024-01-01T00:00:05Z",
                "data": [reading]
            }))
            .await;

        assert!(matches!(result, Err(DomainError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_empty_data_rejected() {
        let mut store = MockTimeSeriesStore::new();
        store.expect_write().never();
        let service = IngestionService::new(Arc::new(store));

        let result = service
            .ingest_batch(json!({
                "gateway_id": "gw-1",
                "timestamp": "2024-01-01T00:00:05Z",
                "data": []
            }))
            .await;

        assert!(matches!(result, Err(DomainError::ValidationError(msg)) if msg.contains("data")));
    }

    #[tokio::test]
    async fn test_empty_sensor_type_rejected_by_validation() {
        let mut store = MockTimeSeriesStore::new();
        store.expect_write().never();
        let service = IngestionService::new(Arc::new(store));

        let mut reading = reading_json(1, json!(1.0));
        reading["sensor_type"] = json!("");

        let result = service
            .ingest_batch(json!({
                "gateway_id": "gw-1",
                "timestamp": "2024-01-01T00:00:05Z",
                "data": [reading]
            }))
            .await;

        assert!(matches!(result, Err(DomainError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let mut store = MockTimeSeriesStore::new();
        store
            .expect_write()
            .times(1)
            .returning(|_| Err(DomainError::StorageError(anyhow::anyhow!("insert failed"))));
        let service = IngestionService::new(Arc::new(store));

        let result = service
            .ingest_batch(json!({
                "gateway_id": "gw-1",
                "timestamp": "2024-01-01T00:00:05Z",
                "data": [reading_json(1, json!(1.0))]
            }))
            .await;

        assert!(matches!(result, Err(DomainError::StorageError(_))));
    }
}
