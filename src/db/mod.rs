//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - The engine capability interface and its PostgreSQL/MySQL/SQLite connectors
//! - Per-connection pooling of live sessions
//! - Query execution with timeouts and row caps
//! - Schema introspection
//! - Parameterized statements for structured data operations
//! - Type mappings

pub mod connector;
pub mod engines;
pub mod executor;
pub mod pool;
pub mod schema;
pub mod statement;
pub mod types;

pub use connector::{
    BoundStatement, Connector, ConnectorRegistry, LiveConnection, RawRows, SessionSettings,
};
pub use engines::{MySqlConnector, PostgresConnector, SqliteConnector};
pub use executor::{ExecutionMode, ExecutorSettings, QueryExecutor};
pub use pool::{ConnectionPool, Deadline, PoolSettings, PoolStats, PooledHandle};
pub use schema::SchemaInspector;
pub use statement::StatementBuilder;
