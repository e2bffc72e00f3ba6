//! Query-related data models.
//!
//! This module defines types for query requests, result sets, saved queries
//! and history entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::schema::CanonicalType;

/// Default hard row cap for query results.
pub const DEFAULT_ROW_CAP: usize = 10_000;

/// Default query timeout in seconds.
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 30;

/// Default number of history entries per page.
pub const DEFAULT_HISTORY_PAGE: u32 = 20;

/// Maximum number of history entries per page.
pub const MAX_HISTORY_PAGE: u32 = 100;

/// A parameter value for parameterized statements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    Null,
    Bool(bool),
    /// Stored as i64 for maximum range
    Int(i64),
    Float(f64),
    String(String),
    /// Arrays and objects, bound as JSON
    Json(JsonValue),
}

impl QueryParam {
    /// Check if this parameter is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Json(_) => "json",
        }
    }
}

impl From<JsonValue> for QueryParam {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Bool(b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            JsonValue::String(s) => Self::String(s),
            other => Self::Json(other),
        }
    }
}

/// A user-submitted query for the "run query" path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub sql: String,
    #[serde(default)]
    pub params: Vec<QueryParam>,
    /// Clamped to the configured row cap
    #[serde(default)]
    pub limit: Option<usize>,
    /// Clamped to the configured timeout
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl QueryRequest {
    /// Create a new query request with default options.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
            limit: None,
            timeout_secs: None,
        }
    }

    /// Add a parameter to this query.
    pub fn with_param(mut self, param: QueryParam) -> Self {
        self.params.push(param);
        self
    }

    /// Set the row limit.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the timeout.
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = Some(timeout_secs);
        self
    }

    /// Get the effective row limit, bounded by `cap`.
    pub fn effective_limit(&self, cap: usize) -> usize {
        self.limit.map(|l| l.clamp(1, cap.max(1))).unwrap_or(cap)
    }

    /// Get the effective timeout in seconds, bounded by `max_secs`.
    pub fn effective_timeout(&self, max_secs: u64) -> u64 {
        self.timeout_secs
            .map(|t| t.clamp(1, max_secs))
            .unwrap_or(max_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    /// Engine-specific type (e.g., "int8", "VARCHAR", "TEXT")
    pub type_name: String,
    pub canonical: CanonicalType,
}

impl ColumnMeta {
    /// Create column metadata, deriving the canonical type from the engine type name.
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        let type_name = type_name.into();
        Self {
            name: name.into(),
            canonical: CanonicalType::from_engine_type(&type_name),
            type_name,
        }
    }
}

/// Non-fatal conditions attached to a successful result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// The result was truncated at the row cap
    RowLimitExceeded { limit: usize },
    /// The execution succeeded but its history entry could not be persisted
    HistoryNotRecorded,
}

/// Columns plus rows as ordered sequences, in engine column order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultSet {
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<Vec<JsonValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_affected: Option<u64>,
    pub truncated: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Warning>,
    pub execution_time_ms: u64,
}

impl ResultSet {
    /// Create a result for write operations (INSERT/UPDATE/DELETE/DDL).
    pub fn write_result(rows_affected: u64, execution_time_ms: u64) -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            rows_affected: Some(rows_affected),
            truncated: false,
            warnings: Vec::new(),
            execution_time_ms,
        }
    }

    /// Get the number of rows in the result.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn has_warning(&self, warning: &Warning) -> bool {
        self.warnings.contains(warning)
    }

    pub fn push_warning(&mut self, warning: Warning) {
        if !self.warnings.contains(&warning) {
            self.warnings.push(warning);
        }
    }
}

/// A named query saved against a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedQuery {
    pub id: String,
    pub db_connection_id: String,
    pub name: String,
    pub query: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveQueryRequest {
    /// Overwrites the existing query in place when set
    #[serde(default)]
    pub query_id: Option<String>,
    pub name: String,
    pub query: String,
}

impl SaveQueryRequest {
    pub fn new(name: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            query_id: None,
            name: name.into(),
            query: query.into(),
        }
    }

    pub fn with_id(mut self, query_id: impl Into<String>) -> Self {
        self.query_id = Some(query_id.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryStatus {
    Success,
    Failed,
}

impl HistoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "success" => Self::Success,
            _ => Self::Failed,
        }
    }
}

/// Append-only execution record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    /// Monotonic position, used as the pagination cursor
    pub seq: i64,
    pub db_connection_id: String,
    pub user_id: String,
    pub query: String,
    pub executed_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_affected: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub status: HistoryStatus,
}

/// Cursor pagination for history reads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryQuery {
    /// Only entries strictly older than this sequence number
    #[serde(default)]
    pub before: Option<i64>,
    #[serde(default)]
    pub limit: Option<u32>,
}

impl HistoryQuery {
    pub fn effective_limit(&self) -> u32 {
        self.limit
            .map(|l| l.clamp(1, MAX_HISTORY_PAGE))
            .unwrap_or(DEFAULT_HISTORY_PAGE)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryPage {
    pub entries: Vec<HistoryEntry>,
    /// Pass as `before` to fetch the next (older) page
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_before: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_param_untagged() {
        let params: Vec<QueryParam> =
            serde_json::from_str(r#"[null, true, 42, 1.5, "x", {"a": 1}]"#).unwrap();
        assert!(params[0].is_null());
        assert_eq!(params[1], QueryParam::Bool(true));
        assert_eq!(params[2], QueryParam::Int(42));
        assert_eq!(params[3].type_name(), "float");
        assert_eq!(params[4], QueryParam::String("x".into()));
        assert_eq!(params[5].type_name(), "json");
    }

    #[test]
    fn test_query_request_bounds() {
        let req = QueryRequest::new("SELECT 1").with_limit(99_999).with_timeout(999);
        assert_eq!(req.effective_limit(10_000), 10_000);
        assert_eq!(req.effective_timeout(30), 30);

        let req = QueryRequest::new("SELECT 1");
        assert_eq!(req.effective_limit(500), 500);
        assert_eq!(req.effective_timeout(30), 30);
    }

    #[test]
    fn test_history_query_limit() {
        assert_eq!(HistoryQuery::default().effective_limit(), DEFAULT_HISTORY_PAGE);
        let q = HistoryQuery {
            before: None,
            limit: Some(5_000),
        };
        assert_eq!(q.effective_limit(), MAX_HISTORY_PAGE);
    }

    #[test]
    fn test_warning_serialization() {
        let json = serde_json::to_value(Warning::RowLimitExceeded { limit: 10 }).unwrap();
        assert_eq!(json["kind"], "row_limit_exceeded");
        assert_eq!(json["limit"], 10);
    }

    #[test]
    fn test_push_warning_dedup() {
        let mut rs = ResultSet::write_result(1, 0);
        rs.push_warning(Warning::HistoryNotRecorded);
        rs.push_warning(Warning::HistoryNotRecorded);
        assert_eq!(rs.warnings.len(), 1);
    }
}
