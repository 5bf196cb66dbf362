use common::postgres::PostgresConfig;
use common::retry::RetryPolicy;
use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    // OpenTelemetry configuration
    /// OTLP gRPC endpoint
    #[serde(default = "default_otel_endpoint")]
    pub otel_endpoint: String,

    #[serde(default)]
    pub otel_enabled: bool,

    #[serde(default = "default_otel_service_name")]
    pub otel_service_name: String,

    // PostgreSQL configuration
    #[serde(default = "default_postgres_host")]
    pub postgres_host: String,

    #[serde(default = "default_postgres_port")]
    pub postgres_port: u16,

    #[serde(default = "default_postgres_database")]
    pub postgres_database: String,

    #[serde(default = "default_postgres_username")]
    pub postgres_username: String,

    #[serde(default = "default_postgres_password")]
    pub postgres_password: String,

    #[serde(default = "default_postgres_pool_size")]
    pub postgres_pool_size: usize,

    /// Path to PostgreSQL migrations directory
    #[serde(default = "default_postgres_migrations_dir")]
    pub postgres_migrations_dir: String,

    /// Path to goose binary, shared by both migration sets
    #[serde(default = "default_goose_binary_path")]
    pub goose_binary_path: String,

    // ClickHouse configuration
    /// ClickHouse HTTP URL (for client connections)
    #[serde(default = "default_clickhouse_url")]
    pub clickhouse_url: String,

    /// ClickHouse native TCP URL (for migrations with goose)
    #[serde(default = "default_clickhouse_native_url")]
    pub clickhouse_native_url: String,

    #[serde(default = "default_clickhouse_database")]
    pub clickhouse_database: String,

    #[serde(default = "default_clickhouse_username")]
    pub clickhouse_username: String,

    #[serde(default)]
    pub clickhouse_password: String,

    #[serde(default = "default_clickhouse_migrations_dir")]
    pub clickhouse_migrations_dir: String,

    /// Table holding raw sensor readings
    #[serde(default = "default_clickhouse_table")]
    pub clickhouse_table: String,

    // NATS configuration
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// JetStream key-value bucket backing the metadata cache
    #[serde(default = "default_nats_cache_bucket")]
    pub nats_cache_bucket: String,

    #[serde(default = "default_nats_connection_timeout_secs")]
    pub nats_connection_timeout_secs: u64,

    // Cache configuration
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Connection attempts per cache or store connect, including the first
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    // MQTT configuration
    #[serde(default = "default_mqtt_broker_url")]
    pub mqtt_broker_url: String,

    #[serde(default = "default_mqtt_client_id")]
    pub mqtt_client_id: String,

    #[serde(default = "default_mqtt_keep_alive_secs")]
    pub mqtt_keep_alive_secs: u64,

    #[serde(default = "default_mqtt_reconnect_delay_ms")]
    pub mqtt_reconnect_delay_ms: u64,

    /// Decoded messages buffered between the subscriber and the writer
    #[serde(default = "default_ingest_channel_capacity")]
    pub ingest_channel_capacity: usize,

    #[serde(default = "default_ingest_write_batch_size")]
    pub ingest_write_batch_size: usize,

    /// Startup timeout for initialization operations in seconds
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_otel_service_name() -> String {
    "millstream".to_string()
}

fn default_postgres_host() -> String {
    "localhost".to_string()
}

fn default_postgres_port() -> u16 {
    5432
}

fn default_postgres_database() -> String {
    "millstream".to_string()
}

fn default_postgres_username() -> String {
    "millstream".to_string()
}

fn default_postgres_password() -> String {
    "millstream".to_string()
}

fn default_postgres_pool_size() -> usize {
    10
}

fn default_postgres_migrations_dir() -> String {
    "crates/common/migrations/postgres".to_string()
}

fn default_goose_binary_path() -> String {
    "goose".to_string()
}

fn default_clickhouse_url() -> String {
    "http://localhost:8123".to_string()
}

fn default_clickhouse_native_url() -> String {
    "localhost:9000".to_string()
}

fn default_clickhouse_database() -> String {
    "default".to_string()
}

fn default_clickhouse_username() -> String {
    "default".to_string()
}

fn default_clickhouse_migrations_dir() -> String {
    "crates/common/migrations/clickhouse".to_string()
}

fn default_clickhouse_table() -> String {
    "sensor_data".to_string()
}

fn default_nats_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_nats_cache_bucket() -> String {
    "millstream_cache".to_string()
}

fn default_nats_connection_timeout_secs() -> u64 {
    5
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_mqtt_broker_url() -> String {
    "mqtt://localhost:1883".to_string()
}

fn default_mqtt_client_id() -> String {
    "millstream-ingestor".to_string()
}

fn default_mqtt_keep_alive_secs() -> u64 {
    30
}

fn default_mqtt_reconnect_delay_ms() -> u64 {
    5000
}

fn default_ingest_channel_capacity() -> usize {
    1024
}

fn default_ingest_write_batch_size() -> usize {
    100
}

fn default_startup_timeout_secs() -> u64 {
    30
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("MILLSTREAM"))
            .build()?
            .try_deserialize()
    }

    pub fn postgres(&self) -> PostgresConfig {
        PostgresConfig {
            host: self.postgres_host.clone(),
            port: self.postgres_port,
            database: self.postgres_database.clone(),
            username: self.postgres_username.clone(),
            password: self.postgres_password.clone(),
            max_pool_size: self.postgres_pool_size,
            migrations_dir: self.postgres_migrations_dir.clone(),
            goose_binary_path: self.goose_binary_path.clone(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.retry_delay_ms))
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }
}
