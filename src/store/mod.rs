//! Persistent state owned by the core: saved queries and query history.
//!
//! Both live in one SQLite database, keyed by DBConnection id. The schema is
//! applied idempotently on open.

mod history;
mod saved_queries;

pub use history::{HistoryRecorder, QueryOutcome};
pub use saved_queries::SavedQueryStore;

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use tracing::info;

use crate::error::{CoreError, CoreResult};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS saved_queries (
    id TEXT PRIMARY KEY,
    db_connection_id TEXT NOT NULL,
    name TEXT NOT NULL,
    query TEXT NOT NULL,
    created_at_us INTEGER NOT NULL,
    updated_at_us INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_saved_queries_conn
    ON saved_queries (db_connection_id, name);

CREATE TABLE IF NOT EXISTS query_history (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    db_connection_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    query TEXT NOT NULL,
    executed_at_us INTEGER NOT NULL,
    duration_ms INTEGER NOT NULL,
    row_count INTEGER,
    rows_affected INTEGER,
    error TEXT,
    status TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_query_history_conn
    ON query_history (db_connection_id, seq DESC);
"#;

/// SQLite-backed application store.
#[derive(Debug, Clone)]
pub struct AppStore {
    pool: SqlitePool,
}

impl AppStore {
    /// Open (creating if missing) the store at `url`, e.g. `sqlite://dbconsole.db`.
    pub async fn open(url: &str) -> CoreResult<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| CoreError::invalid_input(format!("Invalid store URL: {}", e)))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(store_error)?;

        let store = Self { pool };
        store.migrate().await?;
        info!("Application store opened");
        Ok(store)
    }

    /// Private in-memory store. A single connection keeps every caller on
    /// the same database.
    pub async fn in_memory() -> CoreResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(store_error)?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(store_error)?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> CoreResult<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(())
    }

    pub fn saved_queries(&self) -> SavedQueryStore {
        SavedQueryStore::new(self.pool.clone())
    }

    pub fn history(&self) -> HistoryRecorder {
        HistoryRecorder::new(self.pool.clone())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Store failures are server-side faults, never engine execution errors.
fn store_error(e: sqlx::Error) -> CoreError {
    CoreError::internal(format!("Application store error: {}", e))
}

fn to_micros(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

fn from_micros(us: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(us).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_migrations_idempotent() {
        let store = AppStore::in_memory().await.unwrap();
        store.migrate().await.unwrap();
        store.migrate().await.unwrap();
    }

    #[tokio::test]
    async fn test_open_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("console.db").display());
        let store = AppStore::open(&url).await.unwrap();
        store.close().await;
        // Reopen applies the schema again without error
        AppStore::open(&url).await.unwrap();
    }

    #[test]
    fn test_micros_roundtrip() {
        let now = DateTime::from_timestamp_micros(1_700_000_000_123_456).unwrap();
        assert_eq!(from_micros(to_micros(now)), now);
    }
}
