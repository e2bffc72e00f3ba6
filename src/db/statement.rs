//! Parameterized statement builder for structured data operations.
//!
//! Identifiers are quoted per engine; every user-supplied value is bound as a
//! parameter and never spliced into the SQL text.

use crate::db::connector::BoundStatement;
use crate::error::{CoreError, CoreResult};
use crate::models::{
    AddRowRequest, DeleteRowsRequest, EngineType, GetDataRequest, KeyMap, QueryParam, TableRef,
    UpdateCellRequest,
};

/// Builds SQL for one engine dialect.
#[derive(Debug, Clone, Copy)]
pub struct StatementBuilder {
    engine: EngineType,
}

impl StatementBuilder {
    pub fn new(engine: EngineType) -> Self {
        Self { engine }
    }

    /// Quote an identifier, doubling any embedded quote character.
    pub fn quote_ident(&self, ident: &str) -> CoreResult<String> {
        if ident.is_empty() {
            return Err(CoreError::invalid_input("Identifier cannot be empty"));
        }
        if ident.contains('\0') {
            return Err(CoreError::invalid_input("Identifier contains a NUL byte"));
        }
        let q = match self.engine {
            EngineType::MySql => '`',
            EngineType::Postgres | EngineType::Sqlite => '"',
        };
        let escaped = ident.replace(q, &format!("{q}{q}"));
        Ok(format!("{q}{escaped}{q}"))
    }

    pub fn quote_table(&self, table: &TableRef) -> CoreResult<String> {
        let name = self.quote_ident(&table.name)?;
        match &table.schema {
            Some(schema) => Ok(format!("{}.{}", self.quote_ident(schema)?, name)),
            None => Ok(name),
        }
    }

    /// Placeholder for the `n`th (1-based) parameter.
    pub fn placeholder(&self, n: usize) -> String {
        match self.engine {
            EngineType::Postgres => format!("${}", n),
            EngineType::MySql | EngineType::Sqlite => "?".to_string(),
        }
    }

    /// `"a" = $1 AND "b" = $2`, binding key values in column order.
    /// NULL key values use `IS NULL` so they still match.
    fn where_clause(
        &self,
        key: &KeyMap,
        params: &mut Vec<QueryParam>,
    ) -> CoreResult<String> {
        let mut parts = Vec::with_capacity(key.len());
        for (column, value) in key {
            let column = self.quote_ident(column)?;
            if value.is_null() {
                parts.push(format!("{} IS NULL", column));
            } else {
                params.push(value.clone());
                parts.push(format!("{} = {}", column, self.placeholder(params.len())));
            }
        }
        Ok(parts.join(" AND "))
    }

    pub fn select_page(&self, request: &GetDataRequest, limit: usize) -> CoreResult<BoundStatement> {
        let mut sql = format!("SELECT * FROM {}", self.quote_table(&request.table)?);
        if let Some(sort) = &request.sort {
            sql.push_str(&format!(
                " ORDER BY {} {}",
                self.quote_ident(&sort.column)?,
                sort.direction.as_sql()
            ));
        }
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let offset = i64::try_from(request.offset).unwrap_or(i64::MAX);
        sql.push_str(&format!(
            " LIMIT {} OFFSET {}",
            self.placeholder(1),
            self.placeholder(2)
        ));
        Ok(BoundStatement::with_params(
            sql,
            vec![QueryParam::Int(limit), QueryParam::Int(offset)],
        ))
    }

    pub fn count_rows(&self, table: &TableRef) -> CoreResult<BoundStatement> {
        Ok(BoundStatement::new(format!(
            "SELECT COUNT(*) AS total FROM {}",
            self.quote_table(table)?
        )))
    }

    pub fn update_cell(&self, request: &UpdateCellRequest) -> CoreResult<BoundStatement> {
        request.validate()?;
        let mut params = vec![request.value.clone()];
        let set = format!(
            "{} = {}",
            self.quote_ident(&request.column)?,
            self.placeholder(1)
        );
        let filter = self.where_clause(&request.key, &mut params)?;
        Ok(BoundStatement::with_params(
            format!(
                "UPDATE {} SET {} WHERE {}",
                self.quote_table(&request.table)?,
                set,
                filter
            ),
            params,
        ))
    }

    pub fn insert_row(&self, request: &AddRowRequest) -> CoreResult<BoundStatement> {
        request.validate()?;
        let mut columns = Vec::with_capacity(request.values.len());
        let mut placeholders = Vec::with_capacity(request.values.len());
        let mut params = Vec::with_capacity(request.values.len());
        for (column, value) in &request.values {
            columns.push(self.quote_ident(column)?);
            params.push(value.clone());
            placeholders.push(self.placeholder(params.len()));
        }
        Ok(BoundStatement::with_params(
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                self.quote_table(&request.table)?,
                columns.join(", "),
                placeholders.join(", ")
            ),
            params,
        ))
    }

    /// One DELETE per key, to be run in a single transaction.
    pub fn delete_rows(&self, request: &DeleteRowsRequest) -> CoreResult<Vec<BoundStatement>> {
        request.validate()?;
        let table = self.quote_table(&request.table)?;
        request
            .keys
            .iter()
            .map(|key| {
                let mut params = Vec::with_capacity(key.len());
                let filter = self.where_clause(key, &mut params)?;
                Ok(BoundStatement::with_params(
                    format!("DELETE FROM {} WHERE {}", table, filter),
                    params,
                ))
            })
            .collect()
    }
}
