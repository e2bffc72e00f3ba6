use std::time::Instant;

use serde_json::Value as JsonValue;

use super::{Caller, DbConsole};
use crate::auth::Action;
use crate::db::{BoundStatement, StatementBuilder};
use crate::error::{CoreError, CoreResult};
use crate::models::{
    AddRowRequest, DataPage, DbConnectionRecord, DeleteRowsRequest, GetDataRequest, ResultSet,
    UpdateCellRequest,
};

impl DbConsole {
    /// Page through a table's rows.
    pub async fn get_data(
        &self,
        caller: &Caller,
        conn_id: &str,
        request: GetDataRequest,
    ) -> CoreResult<DataPage> {
        let (_, record) = self
            .gate
            .authorize(&caller.user_id, conn_id, Action::ReadData)
            .await?;
        request.table.validate()?;

        let builder = StatementBuilder::new(record.engine);
        let limit = request
            .limit
            .unwrap_or(self.data_page_size)
            .clamp(1, self.executor.settings().row_cap.max(1));
        let page = builder.select_page(&request, limit)?;
        let count = request
            .fetch_count
            .then(|| builder.count_rows(&request.table))
            .transpose()?;

        let mut handle = self.pool.acquire(&record, &caller.cancel).await?;
        let result: CoreResult<DataPage> = async {
            let result = self
                .executor
                .fetch_statement(&mut handle, &page, limit, &caller.cancel)
                .await?;
            let total = match &count {
                Some(stmt) => {
                    let counted = self
                        .executor
                        .fetch_statement(&mut handle, stmt, 1, &caller.cancel)
                        .await?;
                    Some(total_from(&counted)?)
                }
                None => None,
            };
            Ok::<_, CoreError>(DataPage { result, total })
        }
        .await;
        handle.release().await;
        result
    }

    /// Update one cell of the row identified by `key`.
    pub async fn update_single_data(
        &self,
        caller: &Caller,
        conn_id: &str,
        request: UpdateCellRequest,
    ) -> CoreResult<ResultSet> {
        let (_, record) = self
            .gate
            .authorize(&caller.user_id, conn_id, Action::MutateData)
            .await?;
        let stmt = StatementBuilder::new(record.engine).update_cell(&request)?;
        self.mutate(caller, &record, vec![stmt]).await
    }

    pub async fn add_data(
        &self,
        caller: &Caller,
        conn_id: &str,
        request: AddRowRequest,
    ) -> CoreResult<ResultSet> {
        let (_, record) = self
            .gate
            .authorize(&caller.user_id, conn_id, Action::MutateData)
            .await?;
        let stmt = StatementBuilder::new(record.engine).insert_row(&request)?;
        self.mutate(caller, &record, vec![stmt]).await
    }

    /// Delete every row in `keys`, all or nothing.
    pub async fn delete_data(
        &self,
        caller: &Caller,
        conn_id: &str,
        request: DeleteRowsRequest,
    ) -> CoreResult<ResultSet> {
        let (_, record) = self
            .gate
            .authorize(&caller.user_id, conn_id, Action::MutateData)
            .await?;
        let stmts = StatementBuilder::new(record.engine).delete_rows(&request)?;
        self.mutate(caller, &record, stmts).await
    }

    async fn mutate(
        &self,
        caller: &Caller,
        record: &DbConnectionRecord,
        stmts: Vec<BoundStatement>,
    ) -> CoreResult<ResultSet> {
        let mut handle = self.pool.acquire(record, &caller.cancel).await?;
        let started = Instant::now();
        let result = self
            .executor
            .execute_mutation(&mut handle, &stmts, &caller.cancel)
            .await;
        handle.release().await;

        // History keeps the parameterized text, never the bound values
        let text = stmts
            .iter()
            .map(|s| s.sql.as_str())
            .collect::<Vec<_>>()
            .join(";\n");
        self.finish(record, &caller.user_id, &text, started, result)
            .await
    }
}

/// First cell of a `COUNT(*)` result.
fn total_from(result: &ResultSet) -> CoreResult<u64> {
    let cell = result.rows.first().and_then(|row| row.first());
    let total = match cell {
        Some(JsonValue::Number(n)) => n.as_u64(),
        Some(JsonValue::String(s)) => s.parse().ok(),
        _ => None,
    };
    total.ok_or_else(|| CoreError::internal("Row count query returned no number"))
}
