//! Data models for the database console core.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod data;
pub mod project;
pub mod query;
pub mod schema;

// Re-export commonly used types
pub use connection::{ConnectionSecret, DbConnectionRecord, EngineType, SealedCredentials};
pub use data::{
    AddRowRequest, DataPage, DeleteRowsRequest, GetDataRequest, KeyMap, SortDirection, SortSpec,
    UpdateCellRequest,
};
pub use project::{Membership, Role};
pub use query::{
    ColumnMeta, DEFAULT_HISTORY_PAGE, DEFAULT_QUERY_TIMEOUT_SECS, DEFAULT_ROW_CAP, HistoryEntry,
    HistoryPage, HistoryQuery, HistoryStatus, MAX_HISTORY_PAGE, QueryParam, QueryRequest,
    ResultSet, SaveQueryRequest, SavedQuery, Warning,
};
pub use schema::{CanonicalType, ColumnDefinition, DataModel, TableInfo, TableRef, TableType};
