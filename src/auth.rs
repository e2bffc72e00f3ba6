//! Authorization gate for connection-scoped operations.
//!
//! Every entry point of the service resolves the caller's membership here
//! first. A caller who is not a member of the owning project gets
//! `Unauthorized` whether or not the connection exists.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::directory::Directory;
use crate::error::{CoreError, CoreResult};
use crate::models::{DbConnectionRecord, Membership, Role};

/// Operations subject to the role matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    RunReadQuery,
    RunWriteQuery,
    ReadData,
    MutateData,
    SaveQuery,
    ReadQueries,
    ReadHistory,
    Introspect,
    ManageConnection,
}

impl Action {
    pub const ALL: [Action; 9] = [
        Action::RunReadQuery,
        Action::RunWriteQuery,
        Action::ReadData,
        Action::MutateData,
        Action::SaveQuery,
        Action::ReadQueries,
        Action::ReadHistory,
        Action::Introspect,
        Action::ManageConnection,
    ];

    fn default_role(self) -> Role {
        match self {
            Action::RunReadQuery
            | Action::ReadData
            | Action::ReadQueries
            | Action::ReadHistory
            | Action::Introspect => Role::Viewer,
            Action::RunWriteQuery | Action::MutateData | Action::SaveQuery => Role::Editor,
            Action::ManageConnection => Role::Owner,
        }
    }
}

/// Minimum role per action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleMatrix {
    required: HashMap<Action, Role>,
}

impl RoleMatrix {
    /// Viewer reads, editor writes and saves, owner manages connections.
    pub fn new() -> Self {
        Self {
            required: Action::ALL
                .iter()
                .map(|a| (*a, a.default_role()))
                .collect(),
        }
    }

    /// Override the minimum role for one action.
    pub fn with(mut self, action: Action, role: Role) -> Self {
        self.required.insert(action, role);
        self
    }

    /// Parse a JSON object of `action -> role`. Actions not listed keep
    /// their defaults.
    pub fn from_json(json: &str) -> CoreResult<Self> {
        let overrides: HashMap<Action, Role> = serde_json::from_str(json)
            .map_err(|e| CoreError::invalid_input(format!("Invalid role matrix: {}", e)))?;
        Ok(overrides
            .into_iter()
            .fold(Self::new(), |matrix, (action, role)| matrix.with(action, role)))
    }

    pub fn from_file(path: &Path) -> CoreResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            CoreError::invalid_input(format!(
                "Cannot read role matrix {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json(&json)
    }

    pub fn required(&self, action: Action) -> Role {
        self.required
            .get(&action)
            .copied()
            .unwrap_or_else(|| action.default_role())
    }
}

impl Default for RoleMatrix {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves connection -> project -> membership -> role.
#[derive(Clone)]
pub struct AuthorizationGate {
    directory: Arc<dyn Directory>,
    matrix: RoleMatrix,
}

impl AuthorizationGate {
    pub fn new(directory: Arc<dyn Directory>, matrix: RoleMatrix) -> Self {
        Self { directory, matrix }
    }

    pub fn matrix(&self) -> &RoleMatrix {
        &self.matrix
    }

    /// Authorize `action` on a connection. Returns the membership and the
    /// connection record for downstream use.
    pub async fn authorize(
        &self,
        user_id: &str,
        conn_id: &str,
        action: Action,
    ) -> CoreResult<(Membership, DbConnectionRecord)> {
        let (membership, record) = self.resolve(user_id, conn_id).await?;
        self.require(&membership, action)?;
        Ok((membership, record))
    }

    /// Resolve the caller's membership in the project owning `conn_id`
    /// without checking any action.
    pub async fn resolve(
        &self,
        user_id: &str,
        conn_id: &str,
    ) -> CoreResult<(Membership, DbConnectionRecord)> {
        let Some(record) = self.directory.get_db_connection(conn_id).await? else {
            warn!(user_id, connection_id = conn_id, "Denied: unknown connection");
            return Err(denied());
        };
        let membership = self.membership(user_id, &record.project_id).await?;
        Ok((membership, record))
    }

    /// Authorize `action` within a project.
    pub async fn authorize_project(
        &self,
        user_id: &str,
        project_id: &str,
        action: Action,
    ) -> CoreResult<Membership> {
        let membership = self.membership(user_id, project_id).await?;
        self.require(&membership, action)?;
        Ok(membership)
    }

    /// Check an already resolved membership against the role matrix.
    pub fn require(&self, membership: &Membership, action: Action) -> CoreResult<()> {
        let required = self.matrix.required(action);
        if !membership.role.satisfies(required) {
            warn!(
                user_id = %membership.user_id,
                project_id = %membership.project_id,
                ?action,
                role = %membership.role,
                %required,
                "Denied: insufficient role"
            );
            return Err(CoreError::unauthorized(format!(
                "Role '{}' cannot perform this operation; '{}' is required",
                membership.role, required
            )));
        }
        debug!(
            user_id = %membership.user_id,
            project_id = %membership.project_id,
            ?action,
            "Authorized"
        );
        Ok(())
    }

    async fn membership(&self, user_id: &str, project_id: &str) -> CoreResult<Membership> {
        let Some(role) = self.directory.get_membership(user_id, project_id).await? else {
            warn!(user_id, project_id, "Denied: not a project member");
            return Err(denied());
        };
        Ok(Membership {
            user_id: user_id.to_string(),
            project_id: project_id.to_string(),
            role,
        })
    }
}

impl std::fmt::Debug for AuthorizationGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationGate")
            .field("matrix", &self.matrix)
            .finish_non_exhaustive()
    }
}

/// Same message for unknown connections and non-members.
fn denied() -> CoreError {
    CoreError::unauthorized("You do not have access to this connection")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::InMemoryDirectory;
    use crate::models::{EngineType, SealedCredentials};

    async fn gate() -> AuthorizationGate {
        let directory = InMemoryDirectory::new();
        directory.add_member("p1", "viewer", Role::Viewer).await;
        directory.add_member("p1", "editor", Role::Editor).await;
        directory.add_member("p2", "outsider", Role::Owner).await;
        directory
            .put_connection(DbConnectionRecord::new(
                "c1",
                "p1",
                EngineType::Sqlite,
                SealedCredentials("sealed".into()),
            ))
            .await;
        AuthorizationGate::new(Arc::new(directory), RoleMatrix::default())
    }

    #[tokio::test]
    async fn test_viewer_reads_but_cannot_mutate() {
        let gate = gate().await;
        let (membership, record) = gate
            .authorize("viewer", "c1", Action::ReadData)
            .await
            .unwrap();
        assert_eq!(membership.role, Role::Viewer);
        assert_eq!(record.project_id, "p1");

        assert!(matches!(
            gate.authorize("viewer", "c1", Action::MutateData).await,
            Err(CoreError::Unauthorized { .. })
        ));
        assert!(gate.authorize("editor", "c1", Action::MutateData).await.is_ok());
    }

    #[tokio::test]
    async fn test_no_existence_leak() {
        let gate = gate().await;
        let unknown = gate
            .authorize("outsider", "missing", Action::ReadData)
            .await
            .err()
            .unwrap();
        let foreign = gate
            .authorize("outsider", "c1", Action::ReadData)
            .await
            .err()
            .unwrap();
        assert!(matches!(unknown, CoreError::Unauthorized { .. }));
        assert_eq!(unknown.to_string(), foreign.to_string());
    }

    #[test]
    fn test_role_matrix_defaults() {
        let matrix = RoleMatrix::default();
        assert_eq!(matrix.required(Action::Introspect), Role::Viewer);
        assert_eq!(matrix.required(Action::MutateData), Role::Editor);
        assert_eq!(matrix.required(Action::ManageConnection), Role::Owner);
    }

    #[test]
    fn test_role_matrix_from_json() {
        let matrix = RoleMatrix::from_json(r#"{"run_write_query": "owner"}"#).unwrap();
        assert_eq!(matrix.required(Action::RunWriteQuery), Role::Owner);
        assert_eq!(matrix.required(Action::ReadData), Role::Viewer);
        assert!(RoleMatrix::from_json(r#"{"run_write_query": "admin"}"#).is_err());
    }
}
