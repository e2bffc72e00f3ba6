use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use super::{from_micros, store_error, to_micros};
use crate::error::{CoreError, CoreResult};
use crate::models::{SaveQueryRequest, SavedQuery};

/// Saved queries, scoped by DBConnection id.
///
/// Saving with an existing `query_id` overwrites that query in place; there is
/// no version history.
#[derive(Debug, Clone)]
pub struct SavedQueryStore {
    pool: SqlitePool,
}

impl SavedQueryStore {
    pub(super) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn save(
        &self,
        db_connection_id: &str,
        request: &SaveQueryRequest,
    ) -> CoreResult<SavedQuery> {
        if request.query.trim().is_empty() {
            return Err(CoreError::invalid_input("Query text cannot be empty"));
        }
        // Stored at microsecond precision
        let now = from_micros(to_micros(Utc::now()));

        match &request.query_id {
            Some(query_id) => {
                let updated = sqlx::query(
                    "UPDATE saved_queries SET name = ?, query = ?, updated_at_us = ? \
                     WHERE id = ? AND db_connection_id = ?",
                )
                .bind(&request.name)
                .bind(&request.query)
                .bind(to_micros(now))
                .bind(query_id)
                .bind(db_connection_id)
                .execute(&self.pool)
                .await
                .map_err(store_error)?;

                if updated.rows_affected() == 0 {
                    return Err(CoreError::not_found("query", query_id.clone()));
                }
                debug!(db_connection_id, query_id = %query_id, "Saved query updated");
                self.get(db_connection_id, query_id).await
            }
            None => {
                let saved = SavedQuery {
                    id: uuid::Uuid::new_v4().to_string(),
                    db_connection_id: db_connection_id.to_string(),
                    name: request.name.clone(),
                    query: request.query.clone(),
                    created_at: now,
                    updated_at: now,
                };
                sqlx::query(
                    "INSERT INTO saved_queries \
                     (id, db_connection_id, name, query, created_at_us, updated_at_us) \
                     VALUES (?, ?, ?, ?, ?, ?)",
                )
                .bind(&saved.id)
                .bind(&saved.db_connection_id)
                .bind(&saved.name)
                .bind(&saved.query)
                .bind(to_micros(saved.created_at))
                .bind(to_micros(saved.updated_at))
                .execute(&self.pool)
                .await
                .map_err(store_error)?;

                debug!(db_connection_id, query_id = %saved.id, "Saved query created");
                Ok(saved)
            }
        }
    }

    /// All saved queries of a connection, by name.
    pub async fn list(&self, db_connection_id: &str) -> CoreResult<Vec<SavedQuery>> {
        let rows = sqlx::query(
            "SELECT id, db_connection_id, name, query, created_at_us, updated_at_us \
             FROM saved_queries WHERE db_connection_id = ? ORDER BY name, created_at_us",
        )
        .bind(db_connection_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        rows.iter().map(saved_query_from_row).collect()
    }

    /// A query saved against another connection is reported as not found.
    pub async fn get(&self, db_connection_id: &str, query_id: &str) -> CoreResult<SavedQuery> {
        let row = sqlx::query(
            "SELECT id, db_connection_id, name, query, created_at_us, updated_at_us \
             FROM saved_queries WHERE id = ? AND db_connection_id = ?",
        )
        .bind(query_id)
        .bind(db_connection_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        match row {
            Some(row) => saved_query_from_row(&row),
            None => Err(CoreError::not_found("query", query_id)),
        }
    }
}

fn saved_query_from_row(row: &SqliteRow) -> CoreResult<SavedQuery> {
    Ok(SavedQuery {
        id: row.try_get("id").map_err(store_error)?,
        db_connection_id: row.try_get("db_connection_id").map_err(store_error)?,
        name: row.try_get("name").map_err(store_error)?,
        query: row.try_get("query").map_err(store_error)?,
        created_at: from_micros(row.try_get("created_at_us").map_err(store_error)?),
        updated_at: from_micros(row.try_get("updated_at_us").map_err(store_error)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::AppStore;

    #[tokio::test]
    async fn test_save_and_get() {
        let store = AppStore::in_memory().await.unwrap().saved_queries();
        let saved = store
            .save("c1", &SaveQueryRequest::new("all users", "SELECT * FROM users"))
            .await
            .unwrap();

        let fetched = store.get("c1", &saved.id).await.unwrap();
        assert_eq!(fetched.query, "SELECT * FROM users");
        assert_eq!(fetched.db_connection_id, "c1");
        assert_eq!(fetched.name, "all users");
    }

    #[tokio::test]
    async fn test_overwrite_in_place() {
        let store = AppStore::in_memory().await.unwrap().saved_queries();
        let saved = store
            .save("c1", &SaveQueryRequest::new("q", "SELECT 1"))
            .await
            .unwrap();
        let updated = store
            .save(
                "c1",
                &SaveQueryRequest::new("q2", "SELECT 2").with_id(saved.id.clone()),
            )
            .await
            .unwrap();

        assert_eq!(updated.id, saved.id);
        assert_eq!(updated.query, "SELECT 2");
        assert_eq!(updated.created_at, saved.created_at);
        assert_eq!(store.list("c1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_scoped_by_connection() {
        let store = AppStore::in_memory().await.unwrap().saved_queries();
        let saved = store
            .save("c1", &SaveQueryRequest::new("q", "SELECT 1"))
            .await
            .unwrap();

        assert!(matches!(
            store.get("c2", &saved.id).await,
            Err(CoreError::NotFound { .. })
        ));
        assert!(store.list("c2").await.unwrap().is_empty());
        assert!(matches!(
            store
                .save("c2", &SaveQueryRequest::new("q", "SELECT 3").with_id(saved.id))
                .await,
            Err(CoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let store = AppStore::in_memory().await.unwrap().saved_queries();
        assert!(matches!(
            store.save("c1", &SaveQueryRequest::new("q", "  ")).await,
            Err(CoreError::InvalidInput { .. })
        ));
    }
}
