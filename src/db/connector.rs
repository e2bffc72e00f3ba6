//! Engine capability interface.
//!
//! The pool, executor and schema inspector program only against
//! `Connector` and `LiveConnection`. Each supported engine provides one
//! implementation in `db::engines`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::db::engines::{MySqlConnector, PostgresConnector, SqliteConnector};
use crate::error::{CoreError, CoreResult};
use crate::models::{ColumnMeta, ConnectionSecret, EngineType, QueryParam};

/// SQL text plus positional parameters, in the engine's placeholder syntax.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundStatement {
    pub sql: String,
    pub params: Vec<QueryParam>,
}

impl BoundStatement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params(sql: impl Into<String>, params: Vec<QueryParam>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// Add a parameter.
    pub fn bind(mut self, param: QueryParam) -> Self {
        self.params.push(param);
        self
    }
}

/// Rows decoded to JSON, positionally aligned with `columns`.
#[derive(Debug, Clone, Default)]
pub struct RawRows {
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<Vec<JsonValue>>,
}

impl RawRows {
    /// Index of a column by name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// Per-session settings applied when a live connection is opened.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub connect_timeout: Duration,
    /// Server-side statement timeout, where the engine supports one
    pub statement_timeout: Option<Duration>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            statement_timeout: None,
        }
    }
}

/// A single live session to an external database.
#[async_trait]
pub trait LiveConnection: Send {
    fn engine(&self) -> EngineType;

    /// Lightweight liveness probe.
    async fn ping(&mut self) -> CoreResult<()>;

    /// Run a row-returning statement, reading at most `max_rows` rows.
    ///
    /// A statement without parameters may be a script. Every statement in it
    /// runs, rows of all result-producing statements are returned in order
    /// with the columns of the first row, and rows-affected counts are not
    /// reported. Use `execute` when the counts matter.
    async fn fetch(&mut self, stmt: &BoundStatement, max_rows: usize) -> CoreResult<RawRows>;

    /// `fetch` inside a read-only transaction that is always rolled back.
    /// Engines without read-only transactions fall back to a plain `fetch`.
    async fn fetch_read_only(
        &mut self,
        stmt: &BoundStatement,
        max_rows: usize,
    ) -> CoreResult<RawRows> {
        self.fetch(stmt, max_rows).await
    }

    /// Run statements for their effect and return total rows affected.
    /// More than one statement runs inside a single transaction.
    async fn execute(&mut self, stmts: &[BoundStatement]) -> CoreResult<u64>;

    /// Close the session gracefully.
    async fn close(self: Box<Self>);
}

/// Opens live sessions for one engine.
#[async_trait]
pub trait Connector: Send + Sync {
    fn engine(&self) -> EngineType;

    async fn connect(
        &self,
        secret: &ConnectionSecret,
        settings: &SessionSettings,
    ) -> CoreResult<Box<dyn LiveConnection>>;
}

/// Connectors keyed by engine.
#[derive(Clone)]
pub struct ConnectorRegistry {
    connectors: HashMap<EngineType, Arc<dyn Connector>>,
}

impl ConnectorRegistry {
    /// Registry with no connectors.
    pub fn empty() -> Self {
        Self {
            connectors: HashMap::new(),
        }
    }

    /// Register (or replace) the connector for its engine.
    pub fn register(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connectors.insert(connector.engine(), connector);
        self
    }

    pub fn get(&self, engine: EngineType) -> CoreResult<Arc<dyn Connector>> {
        self.connectors.get(&engine).cloned().ok_or_else(|| {
            CoreError::connect_failed(
                format!("No connector registered for {}", engine),
                "This engine is not supported by the server",
            )
        })
    }
}

impl Default for ConnectorRegistry {
    /// PostgreSQL, MySQL and SQLite.
    fn default() -> Self {
        Self::empty()
            .register(Arc::new(PostgresConnector))
            .register(Arc::new(MySqlConnector))
            .register(Arc::new(SqliteConnector))
    }
}

impl std::fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorRegistry")
            .field("engines", &self.connectors.keys().collect::<Vec<_>>())
            .finish()
    }
}
