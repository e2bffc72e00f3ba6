//! Query execution engine.
//!
//! Runs user SQL and structured data operations on a pooled handle with:
//! - A hard execution timeout (aborts the engine call, never abandons it)
//! - A hard row cap, enforced while streaming (reads at most cap + 1 rows)
//! - Explicit cancellation
//!
//! Execution errors are never retried.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::db::connector::BoundStatement;
use crate::db::pool::{Deadline, PooledHandle};
use crate::error::{CoreError, CoreResult};
use crate::models::{DEFAULT_QUERY_TIMEOUT_SECS, DEFAULT_ROW_CAP, QueryRequest, ResultSet, Warning};

/// How a statement is run against the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Row-returning; rows are streamed up to the cap
    Fetch,
    /// Like `Fetch`, inside a read-only transaction where the engine has one
    ReadOnly,
    /// Run for effect; rows affected are reported
    Execute,
}

#[derive(Debug, Clone, Copy)]
pub struct ExecutorSettings {
    pub timeout: Duration,
    pub row_cap: usize,
    /// Fail instead of truncating when the row cap is exceeded
    pub strict_row_limit: bool,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS),
            row_cap: DEFAULT_ROW_CAP,
            strict_row_limit: false,
        }
    }
}

/// Query executor that handles database query execution.
#[derive(Debug, Clone, Default)]
pub struct QueryExecutor {
    settings: ExecutorSettings,
}

impl QueryExecutor {
    pub fn new(settings: ExecutorSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    fn max_timeout_secs(&self) -> u64 {
        self.settings.timeout.as_secs().max(1)
    }

    fn deadline(&self, secs: u64, cancel: &CancellationToken) -> Deadline {
        Deadline::new(Duration::from_secs(secs), cancel.clone())
    }

    /// Execute a user query.
    pub async fn run(
        &self,
        handle: &mut PooledHandle,
        request: &QueryRequest,
        mode: ExecutionMode,
        cancel: &CancellationToken,
    ) -> CoreResult<ResultSet> {
        let timeout_secs = request.effective_timeout(self.max_timeout_secs());
        let deadline = self.deadline(timeout_secs, cancel);
        let stmt = BoundStatement::with_params(request.sql.clone(), request.params.clone());

        debug!(
            connection_id = %handle.connection_id(),
            handle_id = handle.id(),
            params = request.params.len(),
            ?mode,
            timeout_secs = deadline.timeout.as_secs(),
            "Executing query"
        );

        match mode {
            ExecutionMode::Fetch | ExecutionMode::ReadOnly => {
                let limit = request.effective_limit(self.settings.row_cap);
                let read_only = mode == ExecutionMode::ReadOnly;
                self.fetch_capped(handle, &stmt, limit, read_only, &deadline)
                    .await
            }
            ExecutionMode::Execute => self.execute_statements(handle, &[stmt], &deadline).await,
        }
    }

    /// Run a row-returning statement, truncating at `limit` rows.
    pub async fn fetch_capped(
        &self,
        handle: &mut PooledHandle,
        stmt: &BoundStatement,
        limit: usize,
        read_only: bool,
        deadline: &Deadline,
    ) -> CoreResult<ResultSet> {
        let start = Instant::now();
        let max_rows = limit.saturating_add(1);
        let fetched = if read_only {
            handle.fetch_read_only(stmt, max_rows, deadline).await?
        } else {
            handle.fetch(stmt, max_rows, deadline).await?
        };

        let mut rows = fetched.rows;
        let truncated = rows.len() > limit;
        if truncated {
            rows.truncate(limit);
            if self.settings.strict_row_limit {
                return Err(CoreError::row_limit_exceeded(limit));
            }
            warn!(
                connection_id = %handle.connection_id(),
                limit,
                "Query result truncated"
            );
        }

        let mut result = ResultSet {
            columns: fetched.columns,
            rows,
            rows_affected: None,
            truncated,
            warnings: Vec::new(),
            execution_time_ms: start.elapsed().as_millis() as u64,
        };
        if truncated {
            result.push_warning(Warning::RowLimitExceeded { limit });
        }
        Ok(result)
    }

    /// Run structured mutation statements atomically.
    pub async fn execute_mutation(
        &self,
        handle: &mut PooledHandle,
        stmts: &[BoundStatement],
        cancel: &CancellationToken,
    ) -> CoreResult<ResultSet> {
        let deadline = self.deadline(self.max_timeout_secs(), cancel);
        self.execute_statements(handle, stmts, &deadline).await
    }

    /// Run a single row-returning statement built by the server, such as a
    /// table page or a count.
    pub async fn fetch_statement(
        &self,
        handle: &mut PooledHandle,
        stmt: &BoundStatement,
        limit: usize,
        cancel: &CancellationToken,
    ) -> CoreResult<ResultSet> {
        let deadline = self.deadline(self.max_timeout_secs(), cancel);
        let limit = limit.min(self.settings.row_cap);
        self.fetch_capped(handle, stmt, limit, false, &deadline)
            .await
    }

    async fn execute_statements(
        &self,
        handle: &mut PooledHandle,
        stmts: &[BoundStatement],
        deadline: &Deadline,
    ) -> CoreResult<ResultSet> {
        let start = Instant::now();
        let rows_affected = handle.execute(stmts, deadline).await?;
        Ok(ResultSet::write_result(
            rows_affected,
            start.elapsed().as_millis() as u64,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_executor_defaults() {
        let executor = QueryExecutor::default();
        assert_eq!(
            executor.settings().timeout,
            Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS)
        );
        assert_eq!(executor.settings().row_cap, DEFAULT_ROW_CAP);
        assert!(!executor.settings().strict_row_limit);
    }

    #[test]
    fn test_request_timeout_clamped_to_configured_timeout() {
        let executor = QueryExecutor::new(ExecutorSettings {
            timeout: Duration::from_secs(30),
            ..Default::default()
        });
        let max = executor.max_timeout_secs();
        assert_eq!(max, 30);
        assert_eq!(QueryRequest::new("SELECT 1").effective_timeout(max), 30);
        assert_eq!(
            QueryRequest::new("SELECT 1").with_timeout(300).effective_timeout(max),
            30
        );
        assert_eq!(
            QueryRequest::new("SELECT 1").with_timeout(0).effective_timeout(max),
            1
        );
        assert_eq!(
            QueryRequest::new("SELECT 1").with_timeout(5).effective_timeout(max),
            5
        );
    }

    #[test]
    fn test_sub_second_timeout_rounds_up() {
        let executor = QueryExecutor::new(ExecutorSettings {
            timeout: Duration::from_millis(200),
            ..Default::default()
        });
        assert_eq!(executor.max_timeout_secs(), 1);
    }
}
