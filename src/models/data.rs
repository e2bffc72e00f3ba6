//! Payloads for structured table data operations.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::query::{QueryParam, ResultSet};
use super::schema::TableRef;
use crate::error::{CoreError, CoreResult};

/// Column name to value, identifying one row (or carrying one row's values).
/// Ordered so generated statements are deterministic.
pub type KeyMap = BTreeMap<String, QueryParam>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SortSpec {
    pub column: String,
    #[serde(default)]
    pub direction: SortDirection,
}

/// Paged table browse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetDataRequest {
    #[serde(flatten)]
    pub table: TableRef,
    #[serde(default)]
    pub offset: u64,
    /// Clamped to the configured row cap
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub sort: Option<SortSpec>,
    /// Also return the total row count
    #[serde(default)]
    pub fetch_count: bool,
}

impl GetDataRequest {
    pub fn new(table: TableRef) -> Self {
        Self {
            table,
            offset: 0,
            limit: None,
            sort: None,
            fetch_count: false,
        }
    }

    pub fn with_page(mut self, offset: u64, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }

    pub fn with_sort(mut self, column: impl Into<String>, direction: SortDirection) -> Self {
        self.sort = Some(SortSpec {
            column: column.into(),
            direction,
        });
        self
    }

    pub fn with_count(mut self) -> Self {
        self.fetch_count = true;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPage {
    #[serde(flatten)]
    pub result: ResultSet,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

/// Single-cell update: `SET column = value WHERE key`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateCellRequest {
    #[serde(flatten)]
    pub table: TableRef,
    pub key: KeyMap,
    pub column: String,
    pub value: QueryParam,
}

impl UpdateCellRequest {
    pub fn validate(&self) -> CoreResult<()> {
        self.table.validate()?;
        require_keyed(&self.key)?;
        if self.column.trim().is_empty() {
            return Err(CoreError::invalid_input("Column name cannot be empty"));
        }
        Ok(())
    }
}

/// Insert one row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddRowRequest {
    #[serde(flatten)]
    pub table: TableRef,
    pub values: KeyMap,
}

impl AddRowRequest {
    pub fn validate(&self) -> CoreResult<()> {
        self.table.validate()?;
        if self.values.is_empty() {
            return Err(CoreError::invalid_input("At least one column value is required"));
        }
        Ok(())
    }
}

/// Delete one or more rows, each identified by a key map. Applied atomically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteRowsRequest {
    #[serde(flatten)]
    pub table: TableRef,
    pub keys: Vec<KeyMap>,
}

impl DeleteRowsRequest {
    pub fn validate(&self) -> CoreResult<()> {
        self.table.validate()?;
        if self.keys.is_empty() {
            return Err(CoreError::invalid_input("At least one row key is required"));
        }
        self.keys.iter().try_for_each(require_keyed)
    }
}

fn require_keyed(key: &KeyMap) -> CoreResult<()> {
    if key.is_empty() {
        return Err(CoreError::invalid_input(
            "Row key cannot be empty; unkeyed updates and deletes are not allowed",
        ));
    }
    if key.keys().any(|c| c.trim().is_empty()) {
        return Err(CoreError::invalid_input("Key column name cannot be empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_requires_key() {
        let req = UpdateCellRequest {
            table: TableRef::new("users"),
            key: KeyMap::new(),
            column: "name".into(),
            value: QueryParam::String("x".into()),
        };
        assert!(matches!(req.validate(), Err(CoreError::InvalidInput { .. })));
    }

    #[test]
    fn test_delete_rejects_any_empty_key() {
        let mut key = KeyMap::new();
        key.insert("id".into(), QueryParam::Int(1));
        let req = DeleteRowsRequest {
            table: TableRef::new("users"),
            keys: vec![key, KeyMap::new()],
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_get_data_request_deserialize_flattened() {
        let req: GetDataRequest = serde_json::from_str(
            r#"{"schema": "public", "name": "users", "limit": 50, "sort": {"column": "id", "direction": "desc"}}"#,
        )
        .unwrap();
        assert_eq!(req.table.schema.as_deref(), Some("public"));
        assert_eq!(req.limit, Some(50));
        assert_eq!(req.sort.unwrap().direction, SortDirection::Desc);
    }
}
