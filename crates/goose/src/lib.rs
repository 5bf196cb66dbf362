use anyhow::{bail, Context, Result};
use tokio::process::Command;
use tracing::{debug, info};

/// Applies goose-managed SQL migrations by invoking the goose binary.
///
/// Works for any driver goose supports; the DSN format is driver specific.
#[derive(Debug, Clone)]
pub struct MigrationRunner {
    goose_binary_path: String,
    migrations_dir: String,
    driver: String,
    dsn: String,
}

impl MigrationRunner {
    pub fn new(
        goose_binary_path: String,
        migrations_dir: String,
        driver: String,
        dsn: String,
    ) -> Self {
        Self {
            goose_binary_path,
            migrations_dir,
            driver,
            dsn,
        }
    }

    /// Runner for a ClickHouse native-protocol endpoint (`host:port`)
    pub fn clickhouse(
        goose_binary_path: String,
        migrations_dir: String,
        native_url: &str,
        database: &str,
        username: &str,
        password: &str,
    ) -> Self {
        Self::new(
            goose_binary_path,
            migrations_dir,
            "clickhouse".to_string(),
            clickhouse_dsn(native_url, database, username, password),
        )
    }

    async fn goose(&self, command: &str) -> Result<String> {
        let output = Command::new(&self.goose_binary_path)
            .arg("-dir")
            .arg(&self.migrations_dir)
            .arg(&self.driver)
            .arg(&self.dsn)
            .arg(command)
            .output()
            .await
            .with_context(|| format!("failed to execute {}", self.goose_binary_path))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "goose {} failed for {}.\nstdout: {}\nstderr: {}",
                command,
                self.migrations_dir,
                stdout,
                stderr
            );
        }
        Ok(stdout)
    }

    /// Apply all pending migrations
    pub async fn run_migrations(&self) -> Result<()> {
        debug!(dir = %self.migrations_dir, driver = %self.driver, "running migrations");
        let stdout = self.goose("up").await?;
        info!(dir = %self.migrations_dir, "migrations applied");
        debug!("goose output:\n{}", stdout);
        Ok(())
    }

    /// Roll back the most recent migration
    pub async fn rollback_migration(&self) -> Result<()> {
        debug!(dir = %self.migrations_dir, "rolling back most recent migration");
        self.goose("down").await?;
        Ok(())
    }

    pub async fn migration_status(&self) -> Result<String> {
        self.goose("status").await
    }
}

/// DSN for goose's clickhouse driver
pub fn clickhouse_dsn(native_url: &str, database: &str, username: &str, password: &str) -> String {
    format!(
        "clickhouse://{}:{}@{}/{}",
        username, password, native_url, database
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clickhouse_dsn() {
        assert_eq!(
            clickhouse_dsn("localhost:9000", "default", "default", ""),
            "clickhouse://default:@localhost:9000/default"
        );
    }

    #[test]
    fn test_clickhouse_runner_uses_clickhouse_driver() {
        let runner = MigrationRunner::clickhouse(
            "goose".to_string(),
            "migrations/clickhouse".to_string(),
            "localhost:9000",
            "default",
            "default",
            "",
        );
        assert_eq!(runner.driver, "clickhouse");
        assert!(runner.dsn.starts_with("clickhouse://"));
    }

    #[tokio::test]
    async fn test_missing_binary_reports_error() {
        let runner = MigrationRunner::new(
            "/nonexistent/goose".to_string(),
            "migrations/".to_string(),
            "postgres".to_string(),
            "postgres://localhost/test".to_string(),
        );

        let err = runner.run_migrations().await.unwrap_err();
        assert!(err.to_string().contains("/nonexistent/goose"));
    }
}
