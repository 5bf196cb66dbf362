#![cfg(feature = "integration-tests")]

use chrono::{DateTime, TimeZone, Utc};
use common::clickhouse::{ClickHouseClient, ClickHouseSensorDataStore};
use common::domain::{parse_interval, HistoryQuery, SensorReading, TimeSeriesStore};
use goose::MigrationRunner;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, Image};
use testcontainers_modules::clickhouse::ClickHouse;

/// ClickHouse 24.10 exposing HTTP (8123) and native TCP (9000, for goose)
#[derive(Debug, Clone)]
struct ClickHouse24 {
    inner: ClickHouse,
    ports: Vec<ContainerPort>,
}

impl Default for ClickHouse24 {
    fn default() -> Self {
        Self {
            inner: ClickHouse::default(),
            ports: vec![ContainerPort::Tcp(8123), ContainerPort::Tcp(9000)],
        }
    }
}

impl Image for ClickHouse24 {
    fn name(&self) -> &str {
        "clickhouse/clickhouse-server"
    }

    fn tag(&self) -> &str {
        "24.10"
    }

    fn ready_conditions(&self) -> Vec<WaitFor> {
        self.inner.ready_conditions()
    }

    fn env_vars(
        &self,
    ) -> impl IntoIterator<
        Item = (
            impl Into<std::borrow::Cow<'_, str>>,
            impl Into<std::borrow::Cow<'_, str>>,
        ),
    > {
        self.inner.env_vars()
    }

    fn expose_ports(&self) -> &[ContainerPort] {
        &self.ports
    }
}

async fn setup_store() -> (ContainerAsync<ClickHouse24>, ClickHouseSensorDataStore) {
    let clickhouse = ClickHouse24::default().start().await.unwrap();
    let host = clickhouse.get_host().await.unwrap();
    let http_port = clickhouse.get_host_port_ipv4(8123).await.unwrap();
    let native_port = clickhouse.get_host_port_ipv4(9000).await.unwrap();

    let goose_path = which::which("goose").expect("goose binary not found");
    MigrationRunner::clickhouse(
        goose_path.to_string_lossy().to_string(),
        format!("{}/migrations/clickhouse", env!("CARGO_MANIFEST_DIR")),
        &format!("{}:{}", host, native_port),
        "default",
        "default",
        "",
    )
    .run_migrations()
    .await
    .expect("Migrations should run successfully");

    let client = ClickHouseClient::new(
        &format!("http://{}:{}", host, http_port),
        "default",
        "default",
        "",
    );
    client.ping().await.expect("Should be able to ping ClickHouse");

    (
        clickhouse,
        ClickHouseSensorDataStore::new(client, "sensor_data".to_string()),
    )
}

fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, hour, minute, 0).unwrap()
}

fn reading(
    machine_id: i64,
    sensor_type: &str,
    value: f64,
    timestamp: DateTime<Utc>,
) -> SensorReading {
    SensorReading {
        machine_id,
        sensor_type: sensor_type.to_string(),
        value,
        unit: "F".to_string(),
        timestamp,
    }
}

fn query(
    machine_id: i64,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    interval: &str,
) -> HistoryQuery {
    HistoryQuery {
        machine_id,
        start,
        end,
        interval: parse_interval(interval).unwrap(),
    }
}

#[tokio::test]
async fn test_mean_of_two_readings_in_one_window() {
    let (_container, store) = setup_store().await;

    store
        .write(&[
            reading(1, "temperature", 71.0, at(10, 5)),
            reading(1, "temperature", 80.0, at(10, 50)),
        ])
        .await
        .unwrap();

    let windows = store
        .query(query(1, at(10, 0), at(11, 0), "1h"))
        .await
        .unwrap();

    assert_eq!(windows.len(), 1);
    assert_eq!(windows[0].value, 75.5);
    assert_eq!(windows[0].time, at(11, 0));
    assert_eq!(windows[0].machine_id, 1);
    assert_eq!(windows[0].unit, "F");
}

#[tokio::test]
async fn test_empty_windows_omitted_and_order_ascending() {
    let (_container, store) = setup_store().await;

    store
        .write(&[
            reading(1, "temperature", 60.0, at(12, 10)),
            reading(1, "temperature", 10.0, at(10, 0)),
            reading(1, "temperature", 20.0, at(10, 10)),
            reading(1, "pressure", 5.0, at(10, 1)),
        ])
        .await
        .unwrap();

    let windows = store
        .query(query(1, at(10, 0), at(13, 0), "15m"))
        .await
        .unwrap();

    let summary: Vec<(DateTime<Utc>, &str, f64)> = windows
        .iter()
        .map(|w| (w.time, w.sensor_type.as_str(), w.value))
        .collect();
    assert_eq!(
        summary,
        vec![
            (at(10, 15), "pressure", 5.0),
            (at(10, 15), "temperature", 15.0),
            (at(12, 15), "temperature", 60.0),
        ]
    );
}

#[tokio::test]
async fn test_range_is_half_open_and_scoped_to_machine() {
    let (_container, store) = setup_store().await;

    store
        .write(&[
            reading(1, "temperature", 1.0, at(9, 59)),
            reading(1, "temperature", 2.0, at(10, 0)),
            reading(1, "temperature", 3.0, at(11, 0)),
            reading(2, "temperature", 100.0, at(10, 30)),
        ])
        .await
        .unwrap();

    let windows = store
        .query(query(1, at(10, 0), at(11, 0), "1h"))
        .await
        .unwrap();

    assert_eq!(windows.len(), 1);
    assert_eq!(windows[0].value, 2.0);
}

#[tokio::test]
async fn test_window_time_is_window_end_clamped_to_query_end() {
    let (_container, store) = setup_store().await;

    store
        .write(&[reading(1, "speed", 1200.0, at(10, 40))])
        .await
        .unwrap();

    let windows = store
        .query(query(1, at(10, 30), at(12, 0), "1h"))
        .await
        .unwrap();
    assert_eq!(windows.len(), 1);
    assert_eq!(windows[0].time, at(11, 0));

    let clamped = store
        .query(query(1, at(10, 30), at(10, 50), "1h"))
        .await
        .unwrap();
    assert_eq!(clamped.len(), 1);
    assert_eq!(clamped[0].time, at(10, 50));
}

#[tokio::test]
async fn test_pre_epoch_readings_floor_into_their_window() {
    let (_container, store) = setup_store().await;
    let before_epoch = Utc.with_ymd_and_hms(1969, 12, 31, 23, 30, 0).unwrap();

    store
        .write(&[reading(1, "temperature", 4.0, before_epoch)])
        .await
        .unwrap();

    let windows = store
        .query(query(
            1,
            Utc.with_ymd_and_hms(1969, 12, 31, 23, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(1970, 1, 1, 1, 0, 0).unwrap(),
            "1h",
        ))
        .await
        .unwrap();

    assert_eq!(windows.len(), 1);
    assert_eq!(windows[0].time, Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap());
}
