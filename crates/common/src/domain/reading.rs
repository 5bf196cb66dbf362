use crate::domain::interval::WindowInterval;
use crate::domain::result::{DomainError, DomainResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single numeric sample reported by a gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub machine_id: i64,
    pub sensor_type: String,
    pub value: f64,
    pub unit: String,
    pub timestamp: DateTime<Utc>,
}

/// Readings delivered together by one gateway. Never empty.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestionBatch {
    gateway_id: String,
    timestamp: DateTime<Utc>,
    readings: Vec<SensorReading>,
}

impl IngestionBatch {
    pub fn new(
        gateway_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        readings: Vec<SensorReading>,
    ) -> DomainResult<Self> {
        if readings.is_empty() {
            return Err(DomainError::ValidationError(
                "batch must contain at least one reading".to_string(),
            ));
        }
        Ok(Self {
            gateway_id: gateway_id.into(),
            timestamp,
            readings,
        })
    }

    pub fn gateway_id(&self) -> &str {
        &self.gateway_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn readings(&self) -> &[SensorReading] {
        &self.readings
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn into_readings(self) -> Vec<SensorReading> {
        self.readings
    }
}

/// One aggregation window of a machine's history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedReading {
    pub time: DateTime<Utc>,
    pub machine_id: i64,
    pub sensor_type: String,
    pub unit: String,
    pub value: f64,
}

/// Parameters of a windowed history query over `[start, end)`
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryQuery {
    pub machine_id: i64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub interval: WindowInterval,
}

/// Append-only storage of sensor readings with windowed mean queries
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait TimeSeriesStore: Send + Sync {
    /// Persist all readings in a single submission. An empty slice is a no-op.
    async fn write(&self, readings: &[SensorReading]) -> DomainResult<()>;

    /// Mean value per epoch-aligned window, ordered by window start
    async fn query(&self, query: HistoryQuery) -> DomainResult<Vec<AggregatedReading>>;
}
