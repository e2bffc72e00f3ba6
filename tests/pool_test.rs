//! Connection pool behavior against an in-process fake engine.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dbconsole::db::{
    BoundStatement, ConnectionPool, Connector, ConnectorRegistry, Deadline, LiveConnection,
    PoolSettings, PoolStats, RawRows, SessionSettings,
};
use dbconsole::models::{ConnectionSecret, DbConnectionRecord, EngineType};
use dbconsole::{CoreError, CoreResult, CredentialStore};
use serde_json::json;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct FakeState {
    opens: AtomicUsize,
    closes: AtomicUsize,
    unhealthy: AtomicBool,
    fetch_delay_ms: AtomicU64,
    /// Number of upcoming connects that fail as unreachable
    connect_failures: AtomicUsize,
    /// Upcoming connects fail with a non-connection error
    connect_internal_error: AtomicBool,
}

struct FakeConnector {
    state: Arc<FakeState>,
}

#[async_trait]
impl Connector for FakeConnector {
    fn engine(&self) -> EngineType {
        EngineType::Sqlite
    }

    async fn connect(
        &self,
        _secret: &ConnectionSecret,
        _settings: &SessionSettings,
    ) -> CoreResult<Box<dyn LiveConnection>> {
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        if self.state.connect_internal_error.load(Ordering::SeqCst) {
            return Err(CoreError::internal("driver bug"));
        }
        let refused = self
            .state
            .connect_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(CoreError::connect_failed("refused", "check the server"));
        }
        Ok(Box::new(FakeSession {
            state: Arc::clone(&self.state),
        }))
    }
}

struct FakeSession {
    state: Arc<FakeState>,
}

#[async_trait]
impl LiveConnection for FakeSession {
    fn engine(&self) -> EngineType {
        EngineType::Sqlite
    }

    async fn ping(&mut self) -> CoreResult<()> {
        if self.state.unhealthy.load(Ordering::SeqCst) {
            return Err(CoreError::connect_failed("gone", "reconnect"));
        }
        Ok(())
    }

    async fn fetch(&mut self, _stmt: &BoundStatement, _max_rows: usize) -> CoreResult<RawRows> {
        let delay = self.state.fetch_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Ok(RawRows {
            columns: Vec::new(),
            rows: vec![vec![json!(1)]],
        })
    }

    async fn execute(&mut self, stmts: &[BoundStatement]) -> CoreResult<u64> {
        Ok(stmts.len() as u64)
    }

    async fn close(self: Box<Self>) {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
    }
}

struct Fixture {
    pool: Arc<ConnectionPool>,
    state: Arc<FakeState>,
    credentials: Arc<CredentialStore>,
}

impl Fixture {
    fn new(settings: PoolSettings) -> Self {
        let state = Arc::new(FakeState::default());
        let credentials = Arc::new(CredentialStore::new(&[7u8; 32]).unwrap());
        let registry = ConnectorRegistry::empty().register(Arc::new(FakeConnector {
            state: Arc::clone(&state),
        }));
        let pool = Arc::new(ConnectionPool::new(
            registry,
            Arc::clone(&credentials),
            settings,
        ));
        Self {
            pool,
            state,
            credentials,
        }
    }

    fn record(&self, id: &str) -> DbConnectionRecord {
        let sealed = self
            .credentials
            .seal(id, &ConnectionSecret::sqlite(":memory:"))
            .unwrap();
        DbConnectionRecord::new(id, "project-1", EngineType::Sqlite, sealed)
    }
}

fn settings(max_per_connection: usize) -> PoolSettings {
    PoolSettings {
        max_per_connection,
        acquire_timeout: Duration::from_millis(100),
        ..PoolSettings::default()
    }
}

#[tokio::test]
async fn test_concurrent_handles_never_share_a_session() {
    let fx = Fixture::new(settings(2));
    let record = fx.record("conn-a");
    let cancel = CancellationToken::new();

    let first = fx.pool.acquire(&record, &cancel).await.unwrap();
    let second = fx.pool.acquire(&record, &cancel).await.unwrap();
    assert_ne!(first.session_id(), second.session_id());
    assert_eq!(fx.pool.stats("conn-a").await, PoolStats { idle: 0, in_use: 2 });

    first.release().await;
    second.release().await;
    assert_eq!(fx.pool.stats("conn-a").await, PoolStats { idle: 2, in_use: 0 });
}

#[tokio::test]
async fn test_waiter_gets_released_session() {
    let fx = Fixture::new(PoolSettings {
        acquire_timeout: Duration::from_secs(5),
        ..settings(1)
    });
    let record = fx.record("conn-a");
    let cancel = CancellationToken::new();

    let first = fx.pool.acquire(&record, &cancel).await.unwrap();
    let first_session = first.session_id();

    let pool = Arc::clone(&fx.pool);
    let waiting_record = record.clone();
    let waiter = tokio::spawn(async move {
        let handle = pool
            .acquire(&waiting_record, &CancellationToken::new())
            .await
            .unwrap();
        let session = handle.session_id();
        handle.release().await;
        session
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiter.is_finished());

    first.release().await;
    assert_eq!(waiter.await.unwrap(), first_session);
    assert_eq!(fx.state.opens.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_saturation_times_out_without_blocking_other_connections() {
    let fx = Fixture::new(settings(1));
    let busy = fx.record("conn-a");
    let other = fx.record("conn-b");
    let cancel = CancellationToken::new();

    let held = fx.pool.acquire(&busy, &cancel).await.unwrap();

    let err = fx.pool.acquire(&busy, &cancel).await.unwrap_err();
    assert!(matches!(err, CoreError::Timeout { .. }));

    let unrelated = fx.pool.acquire(&other, &cancel).await.unwrap();
    unrelated.release().await;
    held.release().await;
}

#[tokio::test]
async fn test_cancelled_while_waiting() {
    let fx = Fixture::new(PoolSettings {
        acquire_timeout: Duration::from_secs(5),
        ..settings(1)
    });
    let record = fx.record("conn-a");
    let held = fx
        .pool
        .acquire(&record, &CancellationToken::new())
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        trigger.cancel();
    });

    let err = fx.pool.acquire(&record, &cancel).await.unwrap_err();
    assert!(matches!(err, CoreError::Cancelled { .. }));
    held.release().await;
}

#[tokio::test]
async fn test_invalidate_forces_fresh_session() {
    let fx = Fixture::new(settings(1));
    let record = fx.record("conn-a");
    let cancel = CancellationToken::new();

    let handle = fx.pool.acquire(&record, &cancel).await.unwrap();
    let before = handle.session_id();
    handle.release().await;

    fx.pool.invalidate("conn-a").await;
    assert_eq!(fx.state.closes.load(Ordering::SeqCst), 1);

    let handle = fx.pool.acquire(&record, &cancel).await.unwrap();
    assert_ne!(handle.session_id(), before);
    handle.release().await;
}

#[tokio::test]
async fn test_invalidate_closes_in_use_session_on_release() {
    let fx = Fixture::new(settings(1));
    let record = fx.record("conn-a");
    let cancel = CancellationToken::new();

    let handle = fx.pool.acquire(&record, &cancel).await.unwrap();
    fx.pool.invalidate("conn-a").await;
    handle.release().await;

    assert_eq!(fx.state.closes.load(Ordering::SeqCst), 1);
    assert_eq!(fx.pool.stats("conn-a").await.idle, 0);
}

#[tokio::test]
async fn test_timeout_marks_session_broken_and_frees_slot() {
    let fx = Fixture::new(settings(1));
    let record = fx.record("conn-a");
    let cancel = CancellationToken::new();
    fx.state.fetch_delay_ms.store(5_000, Ordering::SeqCst);

    let mut handle = fx.pool.acquire(&record, &cancel).await.unwrap();
    let slow_session = handle.session_id();
    let deadline = Deadline::new(Duration::from_millis(50), cancel.clone());
    let err = handle
        .fetch(&BoundStatement::new("SELECT 1"), 10, &deadline)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Timeout { .. }));
    assert!(handle.is_broken());
    handle.release().await;

    fx.state.fetch_delay_ms.store(0, Ordering::SeqCst);
    let mut handle = fx.pool.acquire(&record, &cancel).await.unwrap();
    assert_ne!(handle.session_id(), slow_session);
    let deadline = Deadline::new(Duration::from_secs(1), cancel.clone());
    let rows = handle
        .fetch(&BoundStatement::new("SELECT 1"), 10, &deadline)
        .await
        .unwrap();
    assert_eq!(rows.rows.len(), 1);
    handle.release().await;
}

#[tokio::test]
async fn test_failed_probe_reopens() {
    let fx = Fixture::new(settings(1));
    let record = fx.record("conn-a");
    let cancel = CancellationToken::new();

    let handle = fx.pool.acquire(&record, &cancel).await.unwrap();
    let before = handle.session_id();
    handle.release().await;

    fx.state.unhealthy.store(true, Ordering::SeqCst);
    let handle = fx.pool.acquire(&record, &cancel).await.unwrap();
    assert_ne!(handle.session_id(), before);
    assert_eq!(fx.state.opens.load(Ordering::SeqCst), 2);
    handle.release().await;
}

#[tokio::test]
async fn test_sweep_skips_sessions_in_use() {
    let fx = Fixture::new(PoolSettings {
        idle_ttl: Duration::ZERO,
        ..settings(2)
    });
    let record = fx.record("conn-a");
    let cancel = CancellationToken::new();

    let idle = fx.pool.acquire(&record, &cancel).await.unwrap();
    let busy = fx.pool.acquire(&record, &cancel).await.unwrap();
    idle.release().await;

    assert_eq!(fx.pool.sweep_idle().await, 1);
    assert_eq!(fx.pool.stats("conn-a").await, PoolStats { idle: 0, in_use: 1 });

    busy.release().await;
}

#[tokio::test]
async fn test_remove_fails_waiters() {
    let fx = Fixture::new(PoolSettings {
        acquire_timeout: Duration::from_secs(5),
        ..settings(1)
    });
    let record = fx.record("conn-a");
    let held = fx
        .pool
        .acquire(&record, &CancellationToken::new())
        .await
        .unwrap();

    let pool = Arc::clone(&fx.pool);
    let waiting_record = record.clone();
    let waiter = tokio::spawn(async move {
        pool.acquire(&waiting_record, &CancellationToken::new())
            .await
            .map(|h| h.session_id())
    });

    tokio::time::sleep(Duration::from_millis(30)).await;
    fx.pool.remove("conn-a").await;

    let result = waiter.await.unwrap();
    assert!(matches!(result, Err(CoreError::ConnectFailed { .. })));

    held.release().await;
    assert_eq!(fx.state.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_dropped_handle_returns_session() {
    let fx = Fixture::new(settings(1));
    let record = fx.record("conn-a");
    let cancel = CancellationToken::new();

    {
        let _handle = fx.pool.acquire(&record, &cancel).await.unwrap();
    }
    assert_eq!(fx.pool.stats("conn-a").await, PoolStats { idle: 1, in_use: 0 });

    let handle = fx.pool.acquire(&record, &cancel).await.unwrap();
    handle.release().await;
}

#[tokio::test]
async fn test_failed_connect_retried_once() {
    let fx = Fixture::new(settings(1));
    let record = fx.record("conn-a");
    fx.state.connect_failures.store(1, Ordering::SeqCst);

    let handle = fx
        .pool
        .acquire(&record, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(fx.state.opens.load(Ordering::SeqCst), 2);
    handle.release().await;
}

#[tokio::test]
async fn test_second_connect_failure_surfaces() {
    let fx = Fixture::new(settings(1));
    let record = fx.record("conn-a");
    fx.state.connect_failures.store(2, Ordering::SeqCst);

    let err = fx
        .pool
        .acquire(&record, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::ConnectFailed { .. }));
    assert_eq!(fx.state.opens.load(Ordering::SeqCst), 2);
    assert_eq!(fx.pool.stats("conn-a").await, PoolStats { idle: 0, in_use: 0 });

    // The slot is free again for the next caller
    let handle = fx
        .pool
        .acquire(&record, &CancellationToken::new())
        .await
        .unwrap();
    handle.release().await;
}

#[tokio::test]
async fn test_non_connect_errors_not_retried() {
    let fx = Fixture::new(settings(1));
    let cancel = CancellationToken::new();

    let foreign = CredentialStore::new(&[9u8; 32]).unwrap();
    let sealed = foreign
        .seal("conn-a", &ConnectionSecret::sqlite(":memory:"))
        .unwrap();
    let record = DbConnectionRecord::new("conn-a", "project-1", EngineType::Sqlite, sealed);
    let err = fx.pool.acquire(&record, &cancel).await.unwrap_err();
    assert!(matches!(err, CoreError::Internal { .. }));
    assert_eq!(fx.state.opens.load(Ordering::SeqCst), 0);

    fx.state.connect_internal_error.store(true, Ordering::SeqCst);
    let err = fx
        .pool
        .acquire(&fx.record("conn-b"), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Internal { .. }));
    assert_eq!(fx.state.opens.load(Ordering::SeqCst), 1);
}
