//! Configuration handling for the database console core.
//!
//! Settings come from CLI arguments with `DBCONSOLE_*` environment fallbacks,
//! and convert into the settings structs of the pool, executor and service.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::auth::RoleMatrix;
use crate::credentials::CredentialStore;
use crate::db::pool::{
    DEFAULT_ACQUIRE_TIMEOUT_SECS, DEFAULT_IDLE_TTL_SECS, DEFAULT_MAX_PER_CONNECTION,
    DEFAULT_SWEEP_INTERVAL_SECS,
};
use crate::db::{ExecutorSettings, PoolSettings, SessionSettings};
use crate::error::{CoreError, CoreResult};
use crate::models::{DEFAULT_QUERY_TIMEOUT_SECS, DEFAULT_ROW_CAP};
use crate::service::{ConsoleSettings, DEFAULT_DATA_PAGE};

pub const DEFAULT_STORE_URL: &str = "sqlite://dbconsole.db";
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Clone, Parser)]
#[command(
    name = "dbconsole",
    about = "Connection pooling, query execution and schema introspection for a database console",
    version
)]
pub struct Config {
    /// Store for saved queries and query history
    #[arg(long, default_value = DEFAULT_STORE_URL, env = "DBCONSOLE_STORE_URL")]
    pub store_url: String,

    /// Base64 AES-256 key sealing connection credentials (sensitive - not logged)
    #[arg(long, env = "DBCONSOLE_ENCRYPTION_KEY", hide_env_values = true)]
    pub encryption_key: Option<String>,

    /// Maximum live sessions per connection
    #[arg(
        long,
        default_value_t = DEFAULT_MAX_PER_CONNECTION,
        env = "DBCONSOLE_MAX_CONNECTIONS_PER_TARGET"
    )]
    pub max_connections_per_target: usize,

    /// Seconds to wait for a free session before failing
    #[arg(
        long,
        default_value_t = DEFAULT_ACQUIRE_TIMEOUT_SECS,
        env = "DBCONSOLE_ACQUIRE_TIMEOUT"
    )]
    pub acquire_timeout: u64,

    /// Seconds allowed to open a session
    #[arg(
        long,
        default_value_t = DEFAULT_CONNECT_TIMEOUT_SECS,
        env = "DBCONSOLE_CONNECT_TIMEOUT"
    )]
    pub connect_timeout: u64,

    /// Seconds an idle session is kept before the sweep closes it
    #[arg(long, default_value_t = DEFAULT_IDLE_TTL_SECS, env = "DBCONSOLE_IDLE_TTL")]
    pub idle_ttl: u64,

    /// Seconds between idle sweeps
    #[arg(
        long,
        default_value_t = DEFAULT_SWEEP_INTERVAL_SECS,
        env = "DBCONSOLE_SWEEP_INTERVAL"
    )]
    pub sweep_interval: u64,

    /// Query timeout in seconds
    #[arg(
        long,
        default_value_t = DEFAULT_QUERY_TIMEOUT_SECS,
        env = "DBCONSOLE_QUERY_TIMEOUT"
    )]
    pub query_timeout: u64,

    /// Hard row cap per result
    #[arg(long, default_value_t = DEFAULT_ROW_CAP, env = "DBCONSOLE_MAX_ROWS")]
    pub max_rows: usize,

    /// Fail instead of truncating results over the row cap
    #[arg(long, env = "DBCONSOLE_STRICT_ROW_LIMIT")]
    pub strict_row_limit: bool,

    /// Default page size for table browsing
    #[arg(long, default_value_t = DEFAULT_DATA_PAGE, env = "DBCONSOLE_DATA_PAGE_SIZE")]
    pub data_page_size: usize,

    /// JSON file overriding the minimum role per action
    #[arg(long, value_name = "PATH", env = "DBCONSOLE_ROLE_MATRIX")]
    pub role_matrix: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "DBCONSOLE_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "DBCONSOLE_JSON_LOGS")]
    pub json_logs: bool,
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Create a default configuration (useful for testing).
    pub fn default_config() -> Self {
        Self {
            store_url: DEFAULT_STORE_URL.to_string(),
            encryption_key: None,
            max_connections_per_target: DEFAULT_MAX_PER_CONNECTION,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT_SECS,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT_SECS,
            idle_ttl: DEFAULT_IDLE_TTL_SECS,
            sweep_interval: DEFAULT_SWEEP_INTERVAL_SECS,
            query_timeout: DEFAULT_QUERY_TIMEOUT_SECS,
            max_rows: DEFAULT_ROW_CAP,
            strict_row_limit: false,
            data_page_size: DEFAULT_DATA_PAGE,
            role_matrix: None,
            log_level: "info".to_string(),
            json_logs: false,
        }
    }

    pub fn validate(&self) -> CoreResult<()> {
        let positive = [
            ("max-connections-per-target", self.max_connections_per_target as u64),
            ("acquire-timeout", self.acquire_timeout),
            ("connect-timeout", self.connect_timeout),
            ("sweep-interval", self.sweep_interval),
            ("query-timeout", self.query_timeout),
            ("max-rows", self.max_rows as u64),
            ("data-page-size", self.data_page_size as u64),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(CoreError::invalid_input(format!(
                    "{} must be greater than 0",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Get the query timeout as a Duration.
    pub fn query_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.query_timeout)
    }

    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            max_per_connection: self.max_connections_per_target,
            acquire_timeout: Duration::from_secs(self.acquire_timeout),
            idle_ttl: Duration::from_secs(self.idle_ttl),
            sweep_interval: Duration::from_secs(self.sweep_interval),
            session: SessionSettings {
                connect_timeout: Duration::from_secs(self.connect_timeout),
                // Server-side backstop for the client-side deadline
                statement_timeout: Some(self.query_timeout_duration()),
            },
        }
    }

    pub fn executor_settings(&self) -> ExecutorSettings {
        ExecutorSettings {
            timeout: self.query_timeout_duration(),
            row_cap: self.max_rows,
            strict_row_limit: self.strict_row_limit,
        }
    }

    /// Full service settings. Reads the role matrix file if one is configured.
    pub fn console_settings(&self) -> CoreResult<ConsoleSettings> {
        self.validate()?;
        let role_matrix = match &self.role_matrix {
            Some(path) => RoleMatrix::from_file(path)?,
            None => RoleMatrix::default(),
        };
        Ok(ConsoleSettings {
            pool: self.pool_settings(),
            executor: self.executor_settings(),
            role_matrix,
            data_page_size: self.data_page_size,
        })
    }

    pub fn credential_store(&self) -> CoreResult<CredentialStore> {
        let key = self.encryption_key.as_deref().ok_or_else(|| {
            CoreError::invalid_input(
                "An encryption key is required (--encryption-key or DBCONSOLE_ENCRYPTION_KEY)",
            )
        })?;
        CredentialStore::from_base64(key)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("store_url", &self.store_url)
            .field(
                "encryption_key",
                &self.encryption_key.as_ref().map(|_| "****"),
            )
            .field("max_connections_per_target", &self.max_connections_per_target)
            .field("acquire_timeout", &self.acquire_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("idle_ttl", &self.idle_ttl)
            .field("sweep_interval", &self.sweep_interval)
            .field("query_timeout", &self.query_timeout)
            .field("max_rows", &self.max_rows)
            .field("strict_row_limit", &self.strict_row_limit)
            .field("data_page_size", &self.data_page_size)
            .field("role_matrix", &self.role_matrix)
            .field("log_level", &self.log_level)
            .field("json_logs", &self.json_logs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Action;
    use crate::models::Role;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.store_url, DEFAULT_STORE_URL);
        assert_eq!(config.max_connections_per_target, 5);
        assert_eq!(config.max_rows, 10_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_from_args() {
        let config = Config::try_parse_from([
            "dbconsole",
            "--max-rows",
            "500",
            "--query-timeout",
            "5",
            "--strict-row-limit",
        ])
        .unwrap();
        let executor = config.executor_settings();
        assert_eq!(executor.row_cap, 500);
        assert_eq!(executor.timeout, Duration::from_secs(5));
        assert!(executor.strict_row_limit);
        assert_eq!(
            config.pool_settings().session.statement_timeout,
            Some(Duration::from_secs(5))
        );
    }

    #[test]
    fn test_zero_rejected() {
        let config = Config {
            max_rows: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_hides_key() {
        let config = Config {
            encryption_key: Some("c2VjcmV0LWtleQ==".into()),
            ..Config::default()
        };
        let debug = format!("{:?}", config);
        assert!(!debug.contains("c2VjcmV0LWtleQ=="));
    }

    #[test]
    fn test_missing_key() {
        assert!(matches!(
            Config::default().credential_store(),
            Err(CoreError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_role_matrix_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roles.json");
        std::fs::write(&path, r#"{"save_query": "owner"}"#).unwrap();
        let config = Config {
            role_matrix: Some(path),
            ..Config::default()
        };
        let settings = config.console_settings().unwrap();
        assert_eq!(settings.role_matrix.required(Action::SaveQuery), Role::Owner);
    }
}
