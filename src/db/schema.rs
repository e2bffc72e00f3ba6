//! Schema introspection module.
//!
//! Lists tables and describes their columns for SQLite, PostgreSQL, and MySQL
//! by running catalog queries through a pooled handle. Engine type names are
//! normalized into the canonical type vocabulary.
//!
//! # Architecture
//!
//! SQL queries are organized in the `queries` submodule with constants for each
//! database type. Catalog rows come back as JSON values and are mapped by the
//! `parse_*` helpers, so the mapping does not depend on a particular driver.

use std::time::Duration;

use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::db::connector::{BoundStatement, RawRows};
use crate::db::pool::{Deadline, PooledHandle};
use crate::db::statement::StatementBuilder;
use crate::error::{CoreError, CoreResult};
use crate::models::{
    ColumnDefinition, DataModel, EngineType, QueryParam, TableInfo, TableRef, TableType,
};

const DEFAULT_PG_SCHEMA: &str = "public";

/// Catalog result sets are small; this only guards against pathological catalogs.
const MAX_CATALOG_ROWS: usize = 100_000;

/// Schema inspector for database introspection. Read-only.
#[derive(Debug, Clone)]
pub struct SchemaInspector {
    timeout: Duration,
}

impl SchemaInspector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// List tables and views visible on the connection.
    pub async fn list_tables(
        &self,
        handle: &mut PooledHandle,
        cancel: &CancellationToken,
    ) -> CoreResult<Vec<TableInfo>> {
        let engine = handle.engine();
        let stmt = list_tables_statement(engine, None)?;
        let deadline = Deadline::new(self.timeout, cancel.clone());
        let rows = handle.fetch(&stmt, MAX_CATALOG_ROWS, &deadline).await?;
        let tables = parse_tables(engine, &rows);
        debug!(
            connection_id = %handle.connection_id(),
            count = tables.len(),
            "Listed tables"
        );
        Ok(tables)
    }

    /// Describe a table's columns in declaration order.
    pub async fn describe(
        &self,
        handle: &mut PooledHandle,
        table: &TableRef,
        cancel: &CancellationToken,
    ) -> CoreResult<DataModel> {
        table.validate()?;
        let engine = handle.engine();
        let table = match (engine, &table.schema) {
            (EngineType::Postgres, None) => table.clone().with_schema(DEFAULT_PG_SCHEMA),
            _ => table.clone(),
        };
        let stmt = describe_statement(engine, &table)?;
        let deadline = Deadline::new(self.timeout, cancel.clone());
        let rows = handle.fetch(&stmt, MAX_CATALOG_ROWS, &deadline).await?;

        let columns = parse_columns(engine, &rows);
        if columns.is_empty() {
            return Err(CoreError::not_found("table", table.to_string()));
        }
        Ok(DataModel::new(&table, columns))
    }
}

fn list_tables_statement(engine: EngineType, schema: Option<&str>) -> CoreResult<BoundStatement> {
    let schema_param = schema
        .map(|s| QueryParam::String(s.to_string()))
        .unwrap_or(QueryParam::Null);
    Ok(match engine {
        EngineType::Postgres => BoundStatement::new(queries::postgres::LIST_TABLES),
        EngineType::MySql => {
            BoundStatement::with_params(queries::mysql::LIST_TABLES, vec![schema_param])
        }
        EngineType::Sqlite => match schema {
            Some(schema) => {
                let master = format!(
                    "{}.sqlite_master",
                    StatementBuilder::new(engine).quote_ident(schema)?
                );
                BoundStatement::new(queries::sqlite::LIST_TABLES.replace("sqlite_master", &master))
            }
            None => BoundStatement::new(queries::sqlite::LIST_TABLES),
        },
    })
}

fn describe_statement(engine: EngineType, table: &TableRef) -> CoreResult<BoundStatement> {
    let name = QueryParam::String(table.name.clone());
    Ok(match engine {
        EngineType::Postgres => BoundStatement::with_params(
            queries::postgres::DESCRIBE_COLUMNS,
            vec![
                name,
                QueryParam::String(
                    table
                        .schema
                        .clone()
                        .unwrap_or_else(|| DEFAULT_PG_SCHEMA.to_string()),
                ),
            ],
        ),
        EngineType::MySql => BoundStatement::with_params(
            queries::mysql::DESCRIBE_COLUMNS,
            vec![
                name,
                table
                    .schema
                    .clone()
                    .map(QueryParam::String)
                    .unwrap_or(QueryParam::Null),
            ],
        ),
        EngineType::Sqlite => match &table.schema {
            Some(schema) => BoundStatement::with_params(
                queries::sqlite::DESCRIBE_COLUMNS_IN_SCHEMA,
                vec![name, QueryParam::String(schema.clone())],
            ),
            None => BoundStatement::with_params(queries::sqlite::DESCRIBE_COLUMNS, vec![name]),
        },
    })
}

// =============================================================================
// SQL Query Templates
// =============================================================================
//
// Text-typed catalog columns are cast explicitly so every engine returns
// plain strings.

mod queries {
    pub mod postgres {
        pub const LIST_TABLES: &str = r#"
            SELECT
                table_schema::text AS table_schema,
                table_name::text AS table_name,
                table_type::text AS table_type
            FROM information_schema.tables
            WHERE table_schema NOT IN ('pg_catalog', 'information_schema')
            AND table_type IN ('BASE TABLE', 'VIEW')
            ORDER BY table_schema, table_name
            "#;

        pub const DESCRIBE_COLUMNS: &str = r#"
        SELECT
            c.column_name::text AS column_name,
            format_type(a.atttypid, a.atttypmod) AS column_type,
            c.is_nullable::text AS is_nullable,
            c.column_default::text AS column_default,
            (pk.column_name IS NOT NULL) AS is_primary_key
        FROM information_schema.columns c
        JOIN pg_class t ON t.relname = c.table_name
        JOIN pg_namespace n ON n.oid = t.relnamespace AND n.nspname = c.table_schema
        JOIN pg_attribute a ON a.attrelid = t.oid AND a.attname = c.column_name
        LEFT JOIN (
            SELECT kcu.column_name
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
                ON tc.constraint_name = kcu.constraint_name
                AND tc.table_schema = kcu.table_schema
            WHERE tc.table_name = $1
            AND tc.table_schema = $2
            AND tc.constraint_type = 'PRIMARY KEY'
        ) pk ON c.column_name = pk.column_name
        WHERE c.table_name = $1 AND c.table_schema = $2
        ORDER BY c.ordinal_position
        "#;
    }

    pub mod mysql {
        pub const LIST_TABLES: &str = r#"
            SELECT
                CONVERT(TABLE_SCHEMA USING utf8) AS TABLE_SCHEMA,
                CONVERT(TABLE_NAME USING utf8) AS TABLE_NAME,
                CONVERT(TABLE_TYPE USING utf8) AS TABLE_TYPE
            FROM information_schema.TABLES
            WHERE TABLE_SCHEMA = COALESCE(?, DATABASE())
            AND TABLE_TYPE IN ('BASE TABLE', 'VIEW')
            ORDER BY TABLE_NAME
            "#;

        pub const DESCRIBE_COLUMNS: &str = r#"
        SELECT
            CONVERT(COLUMN_NAME USING utf8) AS COLUMN_NAME,
            CONVERT(COLUMN_TYPE USING utf8) AS COLUMN_TYPE,
            CONVERT(IS_NULLABLE USING utf8) AS IS_NULLABLE,
            CONVERT(COLUMN_DEFAULT USING utf8) AS COLUMN_DEFAULT,
            CONVERT(COLUMN_KEY USING utf8) AS COLUMN_KEY
        FROM information_schema.columns
        WHERE TABLE_NAME = ? AND TABLE_SCHEMA = COALESCE(?, DATABASE())
        ORDER BY ORDINAL_POSITION
        "#;
    }

    pub mod sqlite {
        pub const LIST_TABLES: &str = r#"
            SELECT name, type FROM sqlite_master
            WHERE type IN ('table', 'view')
            AND name NOT LIKE 'sqlite_%'
            ORDER BY name
            "#;

        pub const DESCRIBE_COLUMNS: &str = r#"
            SELECT name, type, "notnull", dflt_value, pk
            FROM pragma_table_info(?)
            ORDER BY cid
            "#;

        pub const DESCRIBE_COLUMNS_IN_SCHEMA: &str = r#"
            SELECT name, type, "notnull", dflt_value, pk
            FROM pragma_table_info(?, ?)
            ORDER BY cid
            "#;
    }
}

// =============================================================================
// Catalog row mapping
// =============================================================================

fn cell<'a>(rows: &RawRows, row: &'a [JsonValue], column: &str) -> Option<&'a JsonValue> {
    rows.column_index(column).and_then(|idx| row.get(idx))
}

fn text(rows: &RawRows, row: &[JsonValue], column: &str) -> Option<String> {
    match cell(rows, row, column)? {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Truthiness of catalog flags: booleans, 0/1 integers, `YES`/`NO`, `t`/`f`.
fn flag(rows: &RawRows, row: &[JsonValue], column: &str) -> bool {
    match cell(rows, row, column) {
        Some(JsonValue::Bool(b)) => *b,
        Some(JsonValue::Number(n)) => n.as_i64().is_some_and(|n| n != 0),
        Some(JsonValue::String(s)) => matches!(s.to_lowercase().as_str(), "yes" | "t" | "true" | "1"),
        _ => false,
    }
}

fn parse_tables(engine: EngineType, rows: &RawRows) -> Vec<TableInfo> {
    let (schema_col, name_col, type_col) = match engine {
        EngineType::Postgres => (Some("table_schema"), "table_name", "table_type"),
        EngineType::MySql => (Some("TABLE_SCHEMA"), "TABLE_NAME", "TABLE_TYPE"),
        EngineType::Sqlite => (None, "name", "type"),
    };
    rows.rows
        .iter()
        .filter_map(|row| {
            let name = text(rows, row, name_col)?;
            let table_type = text(rows, row, type_col)
                .map(|t| TableType::parse(&t))
                .unwrap_or(TableType::Table);
            let mut info = TableInfo::new(name, table_type);
            if let Some(schema) = schema_col.and_then(|c| text(rows, row, c)) {
                info = info.with_schema(schema);
            }
            Some(info)
        })
        .collect()
}

fn parse_columns(engine: EngineType, rows: &RawRows) -> Vec<ColumnDefinition> {
    rows.rows
        .iter()
        .filter_map(|row| {
            let column = match engine {
                EngineType::Postgres => ColumnDefinition::new(
                    text(rows, row, "column_name")?,
                    text(rows, row, "column_type").unwrap_or_default(),
                    flag(rows, row, "is_nullable"),
                )
                .with_primary_key(flag(rows, row, "is_primary_key"))
                .with_default(text(rows, row, "column_default")),
                EngineType::MySql => ColumnDefinition::new(
                    text(rows, row, "COLUMN_NAME")?,
                    text(rows, row, "COLUMN_TYPE").unwrap_or_default(),
                    flag(rows, row, "IS_NULLABLE"),
                )
                .with_primary_key(text(rows, row, "COLUMN_KEY").as_deref() == Some("PRI"))
                .with_default(text(rows, row, "COLUMN_DEFAULT")),
                // pk holds the 1-based position within the key, 0 otherwise
                EngineType::Sqlite => ColumnDefinition::new(
                    text(rows, row, "name")?,
                    text(rows, row, "type").unwrap_or_default(),
                    !flag(rows, row, "notnull"),
                )
                .with_primary_key(flag(rows, row, "pk"))
                .with_default(text(rows, row, "dflt_value")),
            };
            Some(column)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CanonicalType, ColumnMeta};
    use serde_json::json;

    fn raw(columns: &[&str], rows: Vec<Vec<JsonValue>>) -> RawRows {
        RawRows {
            columns: columns.iter().map(|c| ColumnMeta::new(*c, "TEXT")).collect(),
            rows,
        }
    }

    #[test]
    fn test_parse_sqlite_columns() {
        let rows = raw(
            &["name", "type", "notnull", "dflt_value", "pk"],
            vec![
                vec![json!("id"), json!("INTEGER"), json!(0), JsonValue::Null, json!(1)],
                vec![json!("name"), json!("TEXT"), json!(1), json!("'x'"), json!(0)],
            ],
        );
        let columns = parse_columns(EngineType::Sqlite, &rows);
        assert_eq!(columns.len(), 2);
        assert_eq!(columns[0].name, "id");
        assert_eq!(columns[0].canonical, CanonicalType::Integer);
        assert!(columns[0].is_primary_key);
        assert!(columns[0].nullable);
        assert_eq!(columns[1].canonical, CanonicalType::Text);
        assert!(!columns[1].nullable);
        assert_eq!(columns[1].default_value.as_deref(), Some("'x'"));
    }

    #[test]
    fn test_parse_postgres_columns() {
        let rows = raw(
            &["column_name", "column_type", "is_nullable", "column_default", "is_primary_key"],
            vec![
                vec![json!("id"), json!("bigint"), json!("NO"), json!("nextval('s')"), json!(true)],
                vec![json!("created"), json!("timestamp with time zone"), json!("YES"), JsonValue::Null, json!(false)],
            ],
        );
        let columns = parse_columns(EngineType::Postgres, &rows);
        assert!(columns[0].is_primary_key);
        assert!(!columns[0].nullable);
        assert_eq!(columns[1].canonical, CanonicalType::Datetime);
        assert!(columns[1].nullable);
    }

    #[test]
    fn test_parse_mysql_columns() {
        let rows = raw(
            &["COLUMN_NAME", "COLUMN_TYPE", "IS_NULLABLE", "COLUMN_DEFAULT", "COLUMN_KEY"],
            vec![
                vec![json!("id"), json!("int unsigned"), json!("NO"), JsonValue::Null, json!("PRI")],
                vec![json!("flag"), json!("tinyint(1)"), json!("YES"), json!("0"), json!("")],
            ],
        );
        let columns = parse_columns(EngineType::MySql, &rows);
        assert!(columns[0].is_primary_key);
        assert!(!columns[1].is_primary_key);
        assert_eq!(columns[1].default_value.as_deref(), Some("0"));
    }

    #[test]
    fn test_parse_tables() {
        let rows = raw(
            &["table_schema", "table_name", "table_type"],
            vec![
                vec![json!("public"), json!("users"), json!("BASE TABLE")],
                vec![json!("public"), json!("active_users"), json!("VIEW")],
            ],
        );
        let tables = parse_tables(EngineType::Postgres, &rows);
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].schema.as_deref(), Some("public"));
        assert_eq!(tables[0].table_type, TableType::Table);
        assert_eq!(tables[1].table_type, TableType::View);
    }

    #[test]
    fn test_sqlite_schema_qualified_listing() {
        let stmt = list_tables_statement(EngineType::Sqlite, Some("aux")).unwrap();
        assert!(stmt.sql.contains("\"aux\".sqlite_master"));
        let stmt = describe_statement(EngineType::Sqlite, &TableRef::new("t")).unwrap();
        assert_eq!(stmt.params, vec![QueryParam::String("t".into())]);
    }
}
