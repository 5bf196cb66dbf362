use crate::clickhouse::ClickHouseClient;
use crate::domain::{
    AggregatedReading, DomainError, DomainResult, HistoryQuery, SensorReading, TimeSeriesStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clickhouse::Row;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument};

#[derive(Debug, Clone, Row, Serialize, Deserialize)]
pub struct SensorDataRow {
    pub machine_id: String,
    pub sensor_type: String,
    pub unit: String,
    pub value: f64,
    #[serde(with = "clickhouse::serde::chrono::datetime64::millis")]
    pub timestamp: DateTime<Utc>,
}

impl From<&SensorReading> for SensorDataRow {
    fn from(reading: &SensorReading) -> Self {
        SensorDataRow {
            machine_id: reading.machine_id.to_string(),
            sensor_type: reading.sensor_type.clone(),
            unit: reading.unit.clone(),
            value: reading.value,
            timestamp: reading.timestamp,
        }
    }
}

#[derive(Debug, Clone, Row, Deserialize)]
pub struct WindowRow {
    pub window_start_ms: i64,
    pub sensor_type: String,
    pub unit: String,
    pub mean_value: f64,
}

/// Map a window row to its output record, stamped at the window end. The
/// last window is clamped to the query end.
fn to_aggregated(row: WindowRow, query: &HistoryQuery) -> DomainResult<AggregatedReading> {
    let window_end_ms = row.window_start_ms + query.interval.as_millis();
    let window_end = DateTime::from_timestamp_millis(window_end_ms).ok_or_else(|| {
        DomainError::StorageError(anyhow::anyhow!(
            "window end out of range: {}",
            window_end_ms
        ))
    })?;

    Ok(AggregatedReading {
        time: window_end.min(query.end),
        machine_id: query.machine_id,
        sensor_type: row.sensor_type,
        unit: row.unit,
        value: row.mean_value,
    })
}

/// ClickHouse implementation of TimeSeriesStore over the `sensor_data` table
#[derive(Clone)]
pub struct ClickHouseSensorDataStore {
    client: ClickHouseClient,
    table: String,
}

impl ClickHouseSensorDataStore {
    pub fn new(client: ClickHouseClient, table: String) -> Self {
        Self { client, table }
    }

    fn window_sql(&self) -> String {
        format!(
            "WITH toInt64(?) AS width, toUnixTimestamp64Milli(timestamp) AS ts_ms \
             SELECT \
                intDiv(ts_ms - if(ts_ms < 0, width - 1, 0), width) * width AS window_start_ms, \
                sensor_type, \
                unit, \
                avg(value) AS mean_value \
             FROM {} \
             WHERE machine_id = ? \
               AND timestamp >= fromUnixTimestamp64Milli(toInt64(?)) \
               AND timestamp < fromUnixTimestamp64Milli(toInt64(?)) \
             GROUP BY window_start_ms, sensor_type, unit \
             ORDER BY window_start_ms, sensor_type, unit",
            self.table
        )
    }
}

#[async_trait]
impl TimeSeriesStore for ClickHouseSensorDataStore {
    #[instrument(skip(self, readings), fields(count = readings.len(), table = %self.table))]
    async fn write(&self, readings: &[SensorReading]) -> DomainResult<()> {
        if readings.is_empty() {
            debug!("no readings to store, skipping");
            return Ok(());
        }

        let mut insert = self
            .client
            .get_client()
            .insert::<SensorDataRow>(&self.table)
            .await
            .map_err(|e| {
                error!("failed to create ClickHouse inserter: {}", e);
                DomainError::StorageError(e.into())
            })?;

        // Dropping the insert without end() aborts the whole submission
        for reading in readings {
            insert.write(&SensorDataRow::from(reading)).await.map_err(|e| {
                error!("failed to write row to ClickHouse: {}", e);
                DomainError::StorageError(e.into())
            })?;
        }

        insert.end().await.map_err(|e| {
            error!("failed to finalize ClickHouse insert: {}", e);
            DomainError::StorageError(e.into())
        })?;

        debug!(rows_inserted = readings.len(), "stored sensor readings");
        Ok(())
    }

    #[instrument(
        skip(self, query),
        fields(machine_id = query.machine_id, interval = %query.interval)
    )]
    async fn query(&self, query: HistoryQuery) -> DomainResult<Vec<AggregatedReading>> {
        let width = query.interval.as_millis();

        let rows = self
            .client
            .get_client()
            .query(&self.window_sql())
            .bind(width)
            .bind(query.machine_id.to_string())
            .bind(query.start.timestamp_millis())
            .bind(query.end.timestamp_millis())
            .fetch_all::<WindowRow>()
            .await
            .map_err(|e| {
                error!("failed to query sensor history: {}", e);
                DomainError::StorageError(e.into())
            })?;

        debug!(windows = rows.len(), "fetched aggregated windows");

        rows.into_iter()
            .map(|row| to_aggregated(row, &query))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::parse_interval;
    use chrono::TimeZone;

    fn query() -> HistoryQuery {
        HistoryQuery {
            machine_id: 1,
            start: Utc.with_ymd_and_hms(2024, 1, 1, 0, 30, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 1, 1, 3, 0, 0).unwrap(),
            interval: parse_interval("1h").unwrap(),
        }
    }

    #[test]
    fn test_reading_to_row_conversion() {
        let reading = SensorReading {
            machine_id: 42,
            sensor_type: "pressure".to_string(),
            value: 101.3,
            unit: "kPa".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        };

        let row = SensorDataRow::from(&reading);
        assert_eq!(row.machine_id, "42");
        assert_eq!(row.sensor_type, "pressure");
        assert_eq!(row.unit, "kPa");
        assert_eq!(row.value, 101.3);
        assert_eq!(row.timestamp, reading.timestamp);
    }

    fn row_at(start: DateTime<Utc>) -> WindowRow {
        WindowRow {
            window_start_ms: start.timestamp_millis(),
            sensor_type: "temperature".to_string(),
            unit: "C".to_string(),
            mean_value: 75.5,
        }
    }

    #[test]
    fn test_window_stamped_at_its_end() {
        let query = query();
        let aggregated =
            to_aggregated(row_at(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()), &query)
                .unwrap();

        assert_eq!(
            aggregated.time,
            Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap()
        );
        assert_eq!(aggregated.machine_id, 1);
        assert_eq!(aggregated.value, 75.5);
    }

    #[test]
    fn test_last_window_clamped_to_end() {
        let mut query = query();
        query.end = Utc.with_ymd_and_hms(2024, 1, 1, 2, 20, 0).unwrap();
        let row = row_at(Utc.with_ymd_and_hms(2024, 1, 1, 2, 0, 0).unwrap());

        assert_eq!(to_aggregated(row, &query).unwrap().time, query.end);
    }

    #[test]
    fn test_window_sql_targets_configured_table() {
        let store = ClickHouseSensorDataStore::new(
            ClickHouseClient::new("http://localhost:8123", "default", "default", ""),
            "sensor_data".to_string(),
        );
        let sql = store.window_sql();
        assert!(sql.contains("FROM sensor_data"));
        assert!(sql.contains("avg(value)"));
        assert!(sql.contains("ORDER BY window_start_ms, sensor_type, unit"));
    }

    #[test]
    fn test_window_sql_floors_pre_epoch_timestamps() {
        let store = ClickHouseSensorDataStore::new(
            ClickHouseClient::new("http://localhost:8123", "default", "default", ""),
            "sensor_data".to_string(),
        );
        let sql = store.window_sql();
        assert!(sql.contains("intDiv(ts_ms - if(ts_ms < 0, width - 1, 0), width) * width"));
    }
}
