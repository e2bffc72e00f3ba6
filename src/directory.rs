//! Boundary to project and user persistence.
//!
//! The core never owns users, projects or connection records. It asks a
//! `Directory` for the two facts it needs to authorize and connect.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::CoreResult;
use crate::models::{DbConnectionRecord, Role};

#[async_trait]
pub trait Directory: Send + Sync {
    /// Role of `user_id` in `project_id`, or `None` if not a member.
    async fn get_membership(&self, user_id: &str, project_id: &str) -> CoreResult<Option<Role>>;

    /// Connection record by id, or `None` if it does not exist.
    async fn get_db_connection(&self, conn_id: &str) -> CoreResult<Option<DbConnectionRecord>>;
}

/// In-process directory for embedding and tests.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    memberships: RwLock<HashMap<(String, String), Role>>,
    connections: RwLock<HashMap<String, DbConnectionRecord>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_member(&self, project_id: &str, user_id: &str, role: Role) {
        self.memberships
            .write()
            .await
            .insert((user_id.to_string(), project_id.to_string()), role);
    }

    pub async fn remove_member(&self, project_id: &str, user_id: &str) {
        self.memberships
            .write()
            .await
            .remove(&(user_id.to_string(), project_id.to_string()));
    }

    pub async fn put_connection(&self, record: DbConnectionRecord) {
        self.connections
            .write()
            .await
            .insert(record.id.clone(), record);
    }

    pub async fn remove_connection(&self, conn_id: &str) -> Option<DbConnectionRecord> {
        self.connections.write().await.remove(conn_id)
    }
}

#[async_trait]
impl Directory for InMemoryDirectory {
    async fn get_membership(&self, user_id: &str, project_id: &str) -> CoreResult<Option<Role>> {
        Ok(self
            .memberships
            .read()
            .await
            .get(&(user_id.to_string(), project_id.to_string()))
            .copied())
    }

    async fn get_db_connection(&self, conn_id: &str) -> CoreResult<Option<DbConnectionRecord>> {
        Ok(self.connections.read().await.get(conn_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EngineType, SealedCredentials};

    #[tokio::test]
    async fn test_membership_lookup() {
        let dir = InMemoryDirectory::new();
        dir.add_member("p1", "alice", Role::Editor).await;

        assert_eq!(
            dir.get_membership("alice", "p1").await.unwrap(),
            Some(Role::Editor)
        );
        assert_eq!(dir.get_membership("alice", "p2").await.unwrap(), None);
        assert_eq!(dir.get_membership("bob", "p1").await.unwrap(), None);

        dir.remove_member("p1", "alice").await;
        assert_eq!(dir.get_membership("alice", "p1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_connection_lookup() {
        let dir = InMemoryDirectory::new();
        let record = DbConnectionRecord::new(
            "c1",
            "p1",
            EngineType::Sqlite,
            SealedCredentials("x".into()),
        );
        dir.put_connection(record).await;

        let found = dir.get_db_connection("c1").await.unwrap().unwrap();
        assert_eq!(found.project_id, "p1");
        assert!(dir.get_db_connection("c2").await.unwrap().is_none());
    }
}
