//! Schema-related data models.
//!
//! This module defines the engine-neutral shapes produced by introspection.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Small engine-neutral type vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CanonicalType {
    Text,
    Integer,
    Float,
    Boolean,
    Datetime,
    Binary,
    Other,
}

impl CanonicalType {
    /// Normalize an engine-specific type name (e.g. `int8`, `VARCHAR(30)`,
    /// `timestamp with time zone`) into the canonical vocabulary.
    pub fn from_engine_type(type_name: &str) -> Self {
        let lower = type_name.trim().to_lowercase();

        // Contain "int" but are not integers
        if lower.contains("interval") || lower.contains("point") {
            return Self::Other;
        }

        if lower.contains("date") || lower.contains("time") || lower == "year" {
            return Self::Datetime;
        }

        if lower == "bool" || lower == "boolean" {
            return Self::Boolean;
        }

        if lower.contains("int") || lower.contains("serial") {
            return Self::Integer;
        }

        if lower.contains("float")
            || lower.contains("double")
            || lower.contains("real")
            || lower.contains("decimal")
            || lower.contains("numeric")
            || lower == "money"
        {
            return Self::Float;
        }

        if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
            return Self::Binary;
        }

        if lower.contains("char")
            || lower.contains("text")
            || lower.contains("clob")
            || lower == "uuid"
            || lower == "name"
            || lower == "string"
            || lower.starts_with("enum")
        {
            return Self::Text;
        }

        Self::Other
    }
}

impl std::fmt::Display for CanonicalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Text => "text",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::Datetime => "datetime",
            Self::Binary => "binary",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

/// A reference to a table, optionally schema-qualified.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    pub name: String,
}

impl TableRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema: None,
            name: name.into(),
        }
    }

    /// Set the schema name.
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Parse `table` or `schema.table`.
    pub fn parse(qualified: &str) -> CoreResult<Self> {
        let table = match qualified.split_once('.') {
            Some((schema, name)) => Self::new(name).with_schema(schema),
            None => Self::new(qualified),
        };
        table.validate()?;
        Ok(table)
    }

    /// Reject empty names. Quoting is handled by the statement builder.
    pub fn validate(&self) -> CoreResult<()> {
        if self.name.trim().is_empty() {
            return Err(CoreError::invalid_input("Table name cannot be empty"));
        }
        if matches!(&self.schema, Some(s) if s.trim().is_empty()) {
            return Err(CoreError::invalid_input("Schema name cannot be empty"));
        }
        Ok(())
    }
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Type of database table object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableType {
    Table,
    View,
}

impl TableType {
    /// Parse table type from database-specific string.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "view" | "materialized view" | "system view" => Self::View,
            _ => Self::Table,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    pub name: String,
    pub table_type: TableType,
}

impl TableInfo {
    pub fn new(name: impl Into<String>, table_type: TableType) -> Self {
        Self {
            schema: None,
            name: name.into(),
            table_type,
        }
    }

    /// Set the schema name.
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn table_ref(&self) -> TableRef {
        TableRef {
            schema: self.schema.clone(),
            name: self.name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub name: String,
    /// Full engine type (e.g., `varchar(30)`, `bigint unsigned`)
    pub data_type: String,
    pub canonical: CanonicalType,
    pub nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    pub is_primary_key: bool,
}

impl ColumnDefinition {
    /// Create a new column definition.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, nullable: bool) -> Self {
        let data_type = data_type.into();
        Self {
            name: name.into(),
            canonical: CanonicalType::from_engine_type(&data_type),
            data_type,
            nullable,
            default_value: None,
            is_primary_key: false,
        }
    }

    /// Set whether this is a primary key column.
    pub fn with_primary_key(mut self, is_pk: bool) -> Self {
        self.is_primary_key = is_pk;
        self
    }

    /// Set the raw default expression.
    pub fn with_default(mut self, default_value: Option<String>) -> Self {
        self.default_value = default_value;
        self
    }
}

/// Derived description of a table's columns, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataModel {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    pub name: String,
    pub columns: Vec<ColumnDefinition>,
    pub primary_key: Vec<String>,
}

impl DataModel {
    pub fn new(table: &TableRef, columns: Vec<ColumnDefinition>) -> Self {
        let primary_key = columns
            .iter()
            .filter(|c| c.is_primary_key)
            .map(|c| c.name.clone())
            .collect();
        Self {
            schema: table.schema.clone(),
            name: table.name.clone(),
            columns,
            primary_key,
        }
    }

    /// Get the fully qualified table name.
    pub fn qualified_name(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", schema, self.name),
            None => self.name.clone(),
        }
    }
}
