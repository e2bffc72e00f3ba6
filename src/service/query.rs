use std::time::Instant;

use tracing::info;

use super::sql_classifier::classify;
use super::{Caller, DbConsole};
use crate::auth::Action;
use crate::error::CoreResult;
use crate::models::{HistoryPage, HistoryQuery, QueryRequest, ResultSet, SaveQueryRequest, SavedQuery};

impl DbConsole {
    /// Run user SQL. Read statements need the read role and run read-only;
    /// anything else needs the write role and is recorded the same way.
    /// Transaction control and session statements are rejected.
    pub async fn run_query(
        &self,
        caller: &Caller,
        conn_id: &str,
        request: QueryRequest,
    ) -> CoreResult<ResultSet> {
        let (membership, record) = self.gate.resolve(&caller.user_id, conn_id).await?;
        let kind = classify(&request.sql, record.engine)?;
        self.gate.require(&membership, kind.required_action())?;

        let mut handle = self.pool.acquire(&record, &caller.cancel).await?;
        let started = Instant::now();
        let result = self
            .executor
            .run(&mut handle, &request, kind.execution_mode(), &caller.cancel)
            .await;
        handle.release().await;

        if let Ok(set) = &result {
            info!(
                connection_id = %record.id,
                user_id = %caller.user_id,
                ?kind,
                rows = set.row_count(),
                rows_affected = ?set.rows_affected,
                truncated = set.truncated,
                elapsed_ms = set.execution_time_ms,
                "Query executed"
            );
        }
        self.finish(&record, &caller.user_id, &request.sql, started, result)
            .await
    }

    pub async fn save_query(
        &self,
        caller: &Caller,
        conn_id: &str,
        request: SaveQueryRequest,
    ) -> CoreResult<SavedQuery> {
        let (_, record) = self
            .gate
            .authorize(&caller.user_id, conn_id, Action::SaveQuery)
            .await?;
        self.saved_queries.save(&record.id, &request).await
    }

    pub async fn get_queries(&self, caller: &Caller, conn_id: &str) -> CoreResult<Vec<SavedQuery>> {
        let (_, record) = self
            .gate
            .authorize(&caller.user_id, conn_id, Action::ReadQueries)
            .await?;
        self.saved_queries.list(&record.id).await
    }

    pub async fn get_query(
        &self,
        caller: &Caller,
        conn_id: &str,
        query_id: &str,
    ) -> CoreResult<SavedQuery> {
        let (_, record) = self
            .gate
            .authorize(&caller.user_id, conn_id, Action::ReadQueries)
            .await?;
        self.saved_queries.get(&record.id, query_id).await
    }

    /// Newest-first history page.
    pub async fn get_query_history(
        &self,
        caller: &Caller,
        conn_id: &str,
        query: HistoryQuery,
    ) -> CoreResult<HistoryPage> {
        let (_, record) = self
            .gate
            .authorize(&caller.user_id, conn_id, Action::ReadHistory)
            .await?;
        self.history.page(&record.id, &query).await
    }
}
