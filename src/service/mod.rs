//! Operations exposed to the routing layer.
//!
//! Every connection-scoped operation takes the calling user and a DBConnection
//! id and runs the same path: authorization gate, pool acquire, executor or
//! introspector, release, history. Nothing below the gate is reachable without
//! passing it. Creating a connection is scoped to its project instead.

mod data;
mod query;
mod schema;
pub mod sql_classifier;

use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::auth::{Action, AuthorizationGate, RoleMatrix};
use crate::credentials::CredentialStore;
use crate::db::{
    ConnectionPool, ConnectorRegistry, ExecutorSettings, PoolSettings, QueryExecutor,
    SchemaInspector,
};
use crate::directory::Directory;
use crate::error::CoreResult;
use crate::models::{
    ConnectionSecret, DbConnectionRecord, ResultSet, SealedCredentials, Warning,
};
use crate::store::{AppStore, HistoryRecorder, QueryOutcome, SavedQueryStore};

pub use sql_classifier::StatementKind;

/// Default page size for table browsing.
pub const DEFAULT_DATA_PAGE: usize = 200;

/// The authenticated user behind a request, plus the request's cancellation.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user_id: String,
    pub cancel: CancellationToken,
}

impl Caller {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            cancel: CancellationToken::new(),
        }
    }

    /// Use the request's cancellation token (e.g. cancelled on client disconnect).
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ConsoleSettings {
    pub pool: PoolSettings,
    pub executor: ExecutorSettings,
    pub role_matrix: RoleMatrix,
    pub data_page_size: usize,
}

impl Default for ConsoleSettings {
    fn default() -> Self {
        Self {
            pool: PoolSettings::default(),
            executor: ExecutorSettings::default(),
            role_matrix: RoleMatrix::default(),
            data_page_size: DEFAULT_DATA_PAGE,
        }
    }
}

/// The connection and query-execution core.
pub struct DbConsole {
    gate: AuthorizationGate,
    credentials: Arc<CredentialStore>,
    pool: Arc<ConnectionPool>,
    executor: QueryExecutor,
    inspector: SchemaInspector,
    saved_queries: SavedQueryStore,
    history: HistoryRecorder,
    data_page_size: usize,
}

impl DbConsole {
    /// Build the console with the PostgreSQL, MySQL and SQLite connectors.
    pub fn new(
        directory: Arc<dyn Directory>,
        credentials: Arc<CredentialStore>,
        store: &AppStore,
        settings: ConsoleSettings,
    ) -> Self {
        Self::with_connectors(
            directory,
            credentials,
            store,
            ConnectorRegistry::default(),
            settings,
        )
    }

    pub fn with_connectors(
        directory: Arc<dyn Directory>,
        credentials: Arc<CredentialStore>,
        store: &AppStore,
        connectors: ConnectorRegistry,
        settings: ConsoleSettings,
    ) -> Self {
        Self {
            gate: AuthorizationGate::new(directory, settings.role_matrix),
            pool: Arc::new(ConnectionPool::new(
                connectors,
                Arc::clone(&credentials),
                settings.pool,
            )),
            credentials,
            executor: QueryExecutor::new(settings.executor),
            inspector: SchemaInspector::new(settings.executor.timeout),
            saved_queries: store.saved_queries(),
            history: store.history(),
            data_page_size: settings.data_page_size.max(1),
        }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Start the idle sweep. Call once after construction.
    pub fn start_background_tasks(&self) -> JoinHandle<()> {
        self.pool.start_idle_sweep()
    }

    /// Close every pooled session.
    pub async fn shutdown(&self) {
        self.pool.close_all().await;
    }

    /// Seal the credentials of a connection being created in `project_id`.
    /// The caller persists the returned blob with the connection record under
    /// the same `conn_id`.
    pub async fn seal_credentials(
        &self,
        caller: &Caller,
        project_id: &str,
        conn_id: &str,
        secret: &ConnectionSecret,
    ) -> CoreResult<SealedCredentials> {
        self.gate
            .authorize_project(&caller.user_id, project_id, Action::ManageConnection)
            .await?;
        let sealed = self.credentials.seal(conn_id, secret)?;
        info!(
            project_id,
            connection_id = conn_id,
            user_id = %caller.user_id,
            "Sealed connection credentials"
        );
        Ok(sealed)
    }

    /// Credentials or target of a connection were edited; the next request
    /// opens a fresh session.
    pub async fn connection_changed(&self, caller: &Caller, conn_id: &str) -> CoreResult<()> {
        let (_, record) = self
            .gate
            .authorize(&caller.user_id, conn_id, Action::ManageConnection)
            .await?;
        self.pool.invalidate(&record.id).await;
        Ok(())
    }

    /// A connection is being deleted. Must be called while the record still
    /// exists in the directory; closes every pooled session for it.
    pub async fn connection_deleted(&self, caller: &Caller, conn_id: &str) -> CoreResult<()> {
        let (_, record) = self
            .gate
            .authorize(&caller.user_id, conn_id, Action::ManageConnection)
            .await?;
        self.pool.remove(&record.id).await;
        info!(connection_id = %record.id, user_id = %caller.user_id, "Connection removed");
        Ok(())
    }

    /// Record an execution in history and attach the outcome. A successful
    /// result whose history write failed carries `HistoryNotRecorded`.
    async fn finish(
        &self,
        record: &DbConnectionRecord,
        user_id: &str,
        query: &str,
        started: Instant,
        result: CoreResult<ResultSet>,
    ) -> CoreResult<ResultSet> {
        let outcome = match &result {
            Ok(set) => QueryOutcome::from_result(set),
            Err(e) => QueryOutcome::Failed(e.to_string()),
        };

        let recorded = self
            .history
            .record(&record.id, user_id, query, started.elapsed(), &outcome)
            .await;

        match (result, recorded) {
            (Ok(mut set), Err(e)) => {
                error!(
                    connection_id = %record.id,
                    user_id,
                    error = %e,
                    "Failed to record query history"
                );
                set.push_warning(Warning::HistoryNotRecorded);
                Ok(set)
            }
            (Err(err), Err(e)) => {
                error!(
                    connection_id = %record.id,
                    user_id,
                    error = %e,
                    "Failed to record query history"
                );
                Err(err)
            }
            (result, Ok(_)) => result,
        }
    }
}

impl std::fmt::Debug for DbConsole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbConsole")
            .field("gate", &self.gate)
            .field("pool", &self.pool)
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}
