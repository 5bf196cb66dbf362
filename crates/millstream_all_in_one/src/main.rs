mod config;

use common::cache::{CacheClient, MetadataCache};
use common::clickhouse::{ClickHouseClient, ClickHouseSensorDataStore};
use common::nats::NatsKvCacheConnector;
use common::postgres::{PostgresClient, PostgresMachineRepository};
use common::retry::RetryPolicy;
use common::telemetry::{init_telemetry, shutdown_telemetry, TelemetryConfig, TelemetryProviders};
use config::ServiceConfig;
use goose::MigrationRunner;
use machine_api::MachineApi;
use millstream_runner::Runner;
use std::sync::Arc;
use std::time::Duration;
use telemetry_ingestor::mqtt::MqttSubscriberConfig;
use telemetry_ingestor::{IngestionService, TelemetryIngestor, TelemetryIngestorConfig};
use tracing::{debug, error, info};

#[tokio::main]
async fn main() {
    let config = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let telemetry_providers: Option<TelemetryProviders> = match init_telemetry(&TelemetryConfig {
        service_name: config.otel_service_name.clone(),
        otel_endpoint: config.otel_endpoint.clone(),
        otel_enabled: config.otel_enabled,
        log_level: config.log_level.clone(),
    }) {
        Ok(providers) => providers,
        Err(e) => {
            eprintln!("Failed to initialize telemetry: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        otel_enabled = config.otel_enabled,
        otel_endpoint = %config.otel_endpoint,
        "Starting millstream service"
    );
    debug!("Configuration: {:?}", config);

    let deps = match tokio::time::timeout(
        config.startup_timeout(),
        initialize_shared_dependencies(&config),
    )
    .await
    {
        Ok(Ok(deps)) => deps,
        Ok(Err(e)) => {
            error!("Failed to initialize shared dependencies: {:#}", e);
            std::process::exit(1);
        }
        Err(_) => {
            error!(
                timeout_secs = config.startup_timeout_secs,
                "Timed out initializing shared dependencies"
            );
            std::process::exit(1);
        }
    };

    let store = Arc::new(ClickHouseSensorDataStore::new(
        deps.clickhouse,
        config.clickhouse_table.clone(),
    ));

    let machine_api = MachineApi::new(
        Arc::new(PostgresMachineRepository::new(deps.postgres)),
        store.clone(),
        deps.cache.clone(),
    );
    machine_api.warm_cache().await;

    let ingestion_service = Arc::new(IngestionService::new(store));
    let ingestor = TelemetryIngestor::new(
        TelemetryIngestorConfig {
            subscriber: MqttSubscriberConfig {
                broker_url: config.mqtt_broker_url.clone(),
                client_id: config.mqtt_client_id.clone(),
                keep_alive: Duration::from_secs(config.mqtt_keep_alive_secs),
                reconnect_delay: Duration::from_millis(config.mqtt_reconnect_delay_ms),
                ..Default::default()
            },
            channel_capacity: config.ingest_channel_capacity,
            write_batch_size: config.ingest_write_batch_size,
            write_retry: config.retry_policy(),
        },
        ingestion_service,
    );

    let runner = Runner::new()
        .with_named_process("telemetry_ingestor", ingestor.into_runner_process())
        .with_closer({
            let cache = deps.cache;
            move || {
                Box::pin(async move {
                    info!("Running cleanup tasks...");
                    if let Err(e) = cache.close().await {
                        error!(error = %e, "Failed to close metadata cache");
                    }

                    shutdown_telemetry(telemetry_providers);

                    info!("Cleanup complete");
                    Ok(())
                })
            }
        })
        .with_closer_timeout(Duration::from_secs(10));

    runner.run().await;
}

struct SharedDependencies {
    postgres: PostgresClient,
    clickhouse: ClickHouseClient,
    cache: MetadataCache,
}

async fn initialize_shared_dependencies(
    config: &ServiceConfig,
) -> anyhow::Result<SharedDependencies> {
    let retry_policy = config.retry_policy();

    info!("Initializing PostgreSQL...");
    run_postgres_migrations(config).await?;
    let postgres = create_postgres_client(config, retry_policy).await?;

    info!("Initializing ClickHouse...");
    run_clickhouse_migrations(config).await?;
    let clickhouse = create_clickhouse_client(config, retry_policy).await?;

    info!("Initializing metadata cache...");
    let cache = create_metadata_cache(config, retry_policy);

    Ok(SharedDependencies {
        postgres,
        clickhouse,
        cache,
    })
}

async fn run_postgres_migrations(config: &ServiceConfig) -> anyhow::Result<()> {
    let postgres = config.postgres();
    let runner = MigrationRunner::new(
        postgres.goose_binary_path.clone(),
        postgres.migrations_dir.clone(),
        "postgres".to_string(),
        postgres.dsn(),
    );
    runner.run_migrations().await
}

async fn run_clickhouse_migrations(config: &ServiceConfig) -> anyhow::Result<()> {
    let runner = MigrationRunner::clickhouse(
        config.goose_binary_path.clone(),
        config.clickhouse_migrations_dir.clone(),
        &config.clickhouse_native_url,
        &config.clickhouse_database,
        &config.clickhouse_username,
        &config.clickhouse_password,
    );
    runner.run_migrations().await
}

async fn create_postgres_client(
    config: &ServiceConfig,
    retry_policy: RetryPolicy,
) -> anyhow::Result<PostgresClient> {
    let postgres = config.postgres();
    let client = PostgresClient::new(
        &postgres.host,
        postgres.port,
        &postgres.database,
        &postgres.username,
        &postgres.password,
        postgres.max_pool_size,
    )?;
    retry_policy
        .retry("postgres_ping", || client.ping(), |_| true)
        .await?;
    Ok(client)
}

async fn create_clickhouse_client(
    config: &ServiceConfig,
    retry_policy: RetryPolicy,
) -> anyhow::Result<ClickHouseClient> {
    let client = ClickHouseClient::new(
        &config.clickhouse_url,
        &config.clickhouse_database,
        &config.clickhouse_username,
        &config.clickhouse_password,
    );
    retry_policy
        .retry("clickhouse_ping", || client.ping(), |_| true)
        .await?;
    Ok(client)
}

/// The cache connects lazily on first use, so an unreachable NATS server
/// does not block startup
fn create_metadata_cache(config: &ServiceConfig, retry_policy: RetryPolicy) -> MetadataCache {
    let connector = NatsKvCacheConnector::new(
        config.nats_url.clone(),
        config.nats_cache_bucket.clone(),
        Duration::from_secs(config.nats_connection_timeout_secs),
        config.cache_ttl(),
    );
    let client = CacheClient::new(Arc::new(connector), retry_policy);
    MetadataCache::new(Arc::new(client), config.cache_ttl())
}
