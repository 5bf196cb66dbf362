use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub max_pool_size: usize,
    pub migrations_dir: String,
    pub goose_binary_path: String,
}

impl PostgresConfig {
    /// DSN understood by goose's postgres driver
    pub fn dsn(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode=disable",
            self.username, self.password, self.host, self.port, self.database
        )
    }
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "millstream".to_string(),
            username: "millstream".to_string(),
            password: "millstream".to_string(),
            max_pool_size: 10,
            migrations_dir: "crates/common/migrations/postgres".to_string(),
            goose_binary_path: "goose".to_string(),
        }
    }
}
