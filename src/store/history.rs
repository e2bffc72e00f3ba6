use std::time::Duration;

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use super::{from_micros, store_error, to_micros};
use crate::error::CoreResult;
use crate::models::{HistoryEntry, HistoryPage, HistoryQuery, HistoryStatus, ResultSet};

/// What an execution produced, as recorded in history.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    Rows(u64),
    Affected(u64),
    Failed(String),
}

impl QueryOutcome {
    pub fn from_result(result: &ResultSet) -> Self {
        match result.rows_affected {
            Some(affected) => Self::Affected(affected),
            None => Self::Rows(result.row_count() as u64),
        }
    }
}

/// Append-only query history. Entries are never updated or deleted.
#[derive(Debug, Clone)]
pub struct HistoryRecorder {
    pool: SqlitePool,
}

impl HistoryRecorder {
    pub(super) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist one execution record. Returns once the entry is durable.
    pub async fn record(
        &self,
        db_connection_id: &str,
        user_id: &str,
        query: &str,
        duration: Duration,
        outcome: &QueryOutcome,
    ) -> CoreResult<HistoryEntry> {
        let id = uuid::Uuid::new_v4().to_string();
        let executed_at = from_micros(to_micros(Utc::now()));
        let duration_ms = duration.as_millis() as u64;

        let (row_count, rows_affected, error, status) = match outcome {
            QueryOutcome::Rows(n) => (Some(*n), None, None, HistoryStatus::Success),
            QueryOutcome::Affected(n) => (None, Some(*n), None, HistoryStatus::Success),
            QueryOutcome::Failed(message) => {
                (None, None, Some(message.clone()), HistoryStatus::Failed)
            }
        };

        let result = sqlx::query(
            "INSERT INTO query_history \
             (id, db_connection_id, user_id, query, executed_at_us, duration_ms, \
              row_count, rows_affected, error, status) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(db_connection_id)
        .bind(user_id)
        .bind(query)
        .bind(to_micros(executed_at))
        .bind(duration_ms as i64)
        .bind(row_count.map(|n| n as i64))
        .bind(rows_affected.map(|n| n as i64))
        .bind(error.as_deref())
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        let seq = result.last_insert_rowid();
        debug!(db_connection_id, user_id, seq, status = status.as_str(), "History recorded");

        Ok(HistoryEntry {
            id,
            seq,
            db_connection_id: db_connection_id.to_string(),
            user_id: user_id.to_string(),
            query: query.to_string(),
            executed_at,
            duration_ms,
            row_count,
            rows_affected,
            error,
            status,
        })
    }

    /// Newest-first page of a connection's history.
    pub async fn page(
        &self,
        db_connection_id: &str,
        query: &HistoryQuery,
    ) -> CoreResult<HistoryPage> {
        let limit = query.effective_limit();
        let before = query.before.unwrap_or(i64::MAX);

        // One extra row tells whether an older page exists
        let rows = sqlx::query(
            "SELECT seq, id, db_connection_id, user_id, query, executed_at_us, duration_ms, \
             row_count, rows_affected, error, status \
             FROM query_history \
             WHERE db_connection_id = ? AND seq < ? \
             ORDER BY seq DESC LIMIT ?",
        )
        .bind(db_connection_id)
        .bind(before)
        .bind(i64::from(limit) + 1)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        let mut entries = rows
            .iter()
            .map(entry_from_row)
            .collect::<CoreResult<Vec<_>>>()?;

        let next_before = if entries.len() > limit as usize {
            entries.truncate(limit as usize);
            entries.last().map(|e| e.seq)
        } else {
            None
        };

        Ok(HistoryPage {
            entries,
            next_before,
        })
    }
}

fn entry_from_row(row: &SqliteRow) -> CoreResult<HistoryEntry> {
    let row_count: Option<i64> = row.try_get("row_count").map_err(store_error)?;
    let rows_affected: Option<i64> = row.try_get("rows_affected").map_err(store_error)?;
    let duration_ms: i64 = row.try_get("duration_ms").map_err(store_error)?;
    let status: String = row.try_get("status").map_err(store_error)?;

    Ok(HistoryEntry {
        id: row.try_get("id").map_err(store_error)?,
        seq: row.try_get("seq").map_err(store_error)?,
        db_connection_id: row.try_get("db_connection_id").map_err(store_error)?,
        user_id: row.try_get("user_id").map_err(store_error)?,
        query: row.try_get("query").map_err(store_error)?,
        executed_at: from_micros(row.try_get("executed_at_us").map_err(store_error)?),
        duration_ms: duration_ms.max(0) as u64,
        row_count: row_count.map(|n| n.max(0) as u64),
        rows_affected: rows_affected.map(|n| n.max(0) as u64),
        error: row.try_get("error").map_err(store_error)?,
        status: HistoryStatus::parse(&status),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::AppStore;

    async fn recorder() -> HistoryRecorder {
        AppStore::in_memory().await.unwrap().history()
    }

    #[tokio::test]
    async fn test_record_and_read_back() {
        let history = recorder().await;
        let entry = history
            .record(
                "c1",
                "u1",
                "SELECT 1",
                Duration::from_millis(12),
                &QueryOutcome::Rows(1),
            )
            .await
            .unwrap();

        let page = history.page("c1", &HistoryQuery::default()).await.unwrap();
        assert_eq!(page.entries, vec![entry]);
        assert_eq!(page.next_before, None);
    }

    #[tokio::test]
    async fn test_failed_outcome() {
        let history = recorder().await;
        let entry = history
            .record(
                "c1",
                "u1",
                "SELEC 1",
                Duration::ZERO,
                &QueryOutcome::Failed("syntax error".into()),
            )
            .await
            .unwrap();
        assert_eq!(entry.status, HistoryStatus::Failed);
        assert_eq!(entry.error.as_deref(), Some("syntax error"));
        assert_eq!(entry.row_count, None);
    }

    #[tokio::test]
    async fn test_newest_first_with_cursor() {
        let history = recorder().await;
        for i in 0..5 {
            history
                .record(
                    "c1",
                    "u1",
                    &format!("SELECT {}", i),
                    Duration::ZERO,
                    &QueryOutcome::Rows(1),
                )
                .await
                .unwrap();
        }
        history
            .record("c2", "u1", "SELECT 'other'", Duration::ZERO, &QueryOutcome::Rows(1))
            .await
            .unwrap();

        let first = history
            .page(
                "c1",
                &HistoryQuery {
                    before: None,
                    limit: Some(2),
                },
            )
            .await
            .unwrap();
        assert_eq!(first.entries.len(), 2);
        assert_eq!(first.entries[0].query, "SELECT 4");
        assert_eq!(first.entries[1].query, "SELECT 3");

        let second = history
            .page(
                "c1",
                &HistoryQuery {
                    before: first.next_before,
                    limit: Some(10),
                },
            )
            .await
            .unwrap();
        let queries: Vec<_> = second.entries.iter().map(|e| e.query.as_str()).collect();
        assert_eq!(queries, vec!["SELECT 2", "SELECT 1", "SELECT 0"]);
        assert_eq!(second.next_before, None);
    }

    #[test]
    fn test_outcome_from_result() {
        let write = ResultSet::write_result(3, 1);
        assert_eq!(QueryOutcome::from_result(&write), QueryOutcome::Affected(3));
    }
}
