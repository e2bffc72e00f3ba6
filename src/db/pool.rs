//! Connection Pool Manager.
//!
//! Keeps a small bounded set of live sessions per DBConnection id. Each id has
//! its own `Slot` with a semaphore sized to the per-connection maximum, so a
//! saturated id only ever blocks callers of that same id.
//!
//! # Invariants
//!
//! - A live session is either idle in exactly one slot or owned by exactly one
//!   `PooledHandle`; it is never shared.
//! - Sessions opened before the latest `invalidate` are never handed out
//!   again; they are closed on their way back.
//! - The idle sweep only looks at idle sessions, never at in-use handles.
//!
//! Locks are held briefly and never across an `.await` on the engine.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::credentials::CredentialStore;
use crate::db::connector::{
    BoundStatement, ConnectorRegistry, LiveConnection, RawRows, SessionSettings,
};
use crate::db::engines::close_bounded;
use crate::error::{CoreError, CoreResult};
use crate::models::{DbConnectionRecord, EngineType};

/// Default maximum live sessions per DBConnection.
pub const DEFAULT_MAX_PER_CONNECTION: usize = 5;

/// Default time to wait for a free session before failing with `Timeout`.
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 10;

/// Default idle time after which the sweep closes a session.
pub const DEFAULT_IDLE_TTL_SECS: u64 = 600;

/// Default interval of the background idle sweep.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub max_per_connection: usize,
    pub acquire_timeout: Duration,
    pub idle_ttl: Duration,
    pub sweep_interval: Duration,
    pub session: SessionSettings,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_per_connection: DEFAULT_MAX_PER_CONNECTION,
            acquire_timeout: Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS),
            idle_ttl: Duration::from_secs(DEFAULT_IDLE_TTL_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            session: SessionSettings::default(),
        }
    }
}

/// Time budget and cancellation for one engine call.
#[derive(Debug, Clone)]
pub struct Deadline {
    pub timeout: Duration,
    pub cancel: CancellationToken,
}

impl Deadline {
    pub fn new(timeout: Duration, cancel: CancellationToken) -> Self {
        Self { timeout, cancel }
    }

    /// Run `fut` until it completes, times out, or is cancelled.
    async fn run<T>(
        &self,
        operation: &str,
        fut: impl std::future::Future<Output = CoreResult<T>>,
    ) -> CoreResult<T> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(CoreError::cancelled(operation)),
            res = timeout(self.timeout, fut) => match res {
                Ok(result) => result,
                Err(_) => Err(CoreError::timeout(operation, self.timeout)),
            },
        }
    }
}

struct IdleSession {
    conn: Box<dyn LiveConnection>,
    session_id: u64,
    generation: u64,
    idle_since: Instant,
}

/// Per-DBConnection state.
struct Slot {
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<IdleSession>>,
    generation: AtomicU64,
    in_use: AtomicUsize,
    removed: AtomicBool,
}

impl Slot {
    fn new(max: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max.max(1))),
            idle: Mutex::new(Vec::new()),
            generation: AtomicU64::new(0),
            in_use: AtomicUsize::new(0),
            removed: AtomicBool::new(false),
        }
    }

    fn pop_idle(&self) -> Option<IdleSession> {
        self.idle.lock().ok()?.pop()
    }

    /// Return a session to the idle list if it is still current.
    /// Gives the session back when it must be closed instead.
    fn push_idle(&self, session: IdleSession) -> Option<IdleSession> {
        if self.removed.load(Ordering::SeqCst)
            || session.generation != self.generation.load(Ordering::SeqCst)
        {
            return Some(session);
        }
        match self.idle.lock() {
            Ok(mut idle) => {
                idle.push(session);
                None
            }
            Err(_) => Some(session),
        }
    }

    fn drain_idle(&self) -> Vec<IdleSession> {
        self.idle
            .lock()
            .map(|mut idle| std::mem::take(&mut *idle))
            .unwrap_or_default()
    }

    fn idle_count(&self) -> usize {
        self.idle.lock().map(|idle| idle.len()).unwrap_or(0)
    }
}

/// Idle and in-use counts for one DBConnection id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub idle: usize,
    pub in_use: usize,
}

pub struct ConnectionPool {
    slots: RwLock<HashMap<String, Arc<Slot>>>,
    connectors: ConnectorRegistry,
    credentials: Arc<CredentialStore>,
    settings: PoolSettings,
    next_handle_id: AtomicU64,
    next_session_id: AtomicU64,
}

impl ConnectionPool {
    pub fn new(
        connectors: ConnectorRegistry,
        credentials: Arc<CredentialStore>,
        settings: PoolSettings,
    ) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            connectors,
            credentials,
            settings,
            next_handle_id: AtomicU64::new(1),
            next_session_id: AtomicU64::new(1),
        }
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    async fn slot_for(&self, connection_id: &str) -> Arc<Slot> {
        {
            let slots = self.slots.read().await;
            if let Some(slot) = slots.get(connection_id) {
                return Arc::clone(slot);
            }
        }
        let mut slots = self.slots.write().await;
        Arc::clone(
            slots
                .entry(connection_id.to_string())
                .or_insert_with(|| Arc::new(Slot::new(self.settings.max_per_connection))),
        )
    }

    /// Acquire exclusive use of a live session for `record`.
    ///
    /// Waits up to the acquire timeout when all sessions for this id are in
    /// use. Cached sessions are probed before being handed out; a failed probe
    /// or a failed first open is retried exactly once.
    pub async fn acquire(
        &self,
        record: &DbConnectionRecord,
        cancel: &CancellationToken,
    ) -> CoreResult<PooledHandle> {
        let slot = self.slot_for(&record.id).await;

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CoreError::cancelled("pool acquire")),
            res = timeout(self.settings.acquire_timeout, Arc::clone(&slot.permits).acquire_owned()) => {
                match res {
                    Ok(Ok(permit)) => permit,
                    Ok(Err(_)) => {
                        return Err(CoreError::connect_failed(
                            "Connection was removed while waiting",
                            "The connection no longer exists",
                        ));
                    }
                    Err(_) => {
                        warn!(
                            connection_id = %record.id,
                            timeout_secs = self.settings.acquire_timeout.as_secs(),
                            "Pool saturated; acquire timed out"
                        );
                        return Err(CoreError::timeout(
                            "pool acquire",
                            self.settings.acquire_timeout,
                        ));
                    }
                }
            }
        };

        let generation = slot.generation.load(Ordering::SeqCst);

        while let Some(idle) = slot.pop_idle() {
            if idle.generation != generation {
                close_bounded(idle.conn).await;
                continue;
            }
            let mut conn = idle.conn;
            let probe = timeout(PROBE_TIMEOUT, conn.ping()).await;
            if matches!(probe, Ok(Ok(()))) {
                debug!(
                    connection_id = %record.id,
                    session_id = idle.session_id,
                    "Reusing cached session"
                );
                return Ok(self.handle(record, slot, permit, conn, idle.session_id, generation));
            }
            debug!(
                connection_id = %record.id,
                session_id = idle.session_id,
                "Cached session failed liveness probe; reopening"
            );
            close_bounded(conn).await;
            let conn = self.open(record).await?;
            let session_id = self.next_session_id.fetch_add(1, Ordering::SeqCst);
            return Ok(self.handle(record, slot, permit, conn, session_id, generation));
        }

        let conn = match self.open(record).await {
            Ok(conn) => conn,
            Err(e @ CoreError::ConnectFailed { .. }) => {
                debug!(connection_id = %record.id, error = %e, "Connect failed; retrying once");
                self.open(record).await?
            }
            Err(e) => return Err(e),
        };
        let session_id = self.next_session_id.fetch_add(1, Ordering::SeqCst);
        Ok(self.handle(record, slot, permit, conn, session_id, generation))
    }

    /// Credentials are decrypted here and dropped as soon as the session is open.
    async fn open(&self, record: &DbConnectionRecord) -> CoreResult<Box<dyn LiveConnection>> {
        let connector = self.connectors.get(record.engine)?;
        let secret = self.credentials.open(&record.id, &record.credentials)?;
        let conn = connector.connect(&secret, &self.settings.session).await?;
        info!(
            connection_id = %record.id,
            engine = %record.engine,
            "Opened session"
        );
        Ok(conn)
    }

    fn handle(
        &self,
        record: &DbConnectionRecord,
        slot: Arc<Slot>,
        permit: OwnedSemaphorePermit,
        conn: Box<dyn LiveConnection>,
        session_id: u64,
        generation: u64,
    ) -> PooledHandle {
        slot.in_use.fetch_add(1, Ordering::SeqCst);
        PooledHandle {
            id: self.next_handle_id.fetch_add(1, Ordering::SeqCst),
            connection_id: record.id.clone(),
            engine: record.engine,
            session_id,
            generation,
            conn: Some(conn),
            slot,
            permit: Some(permit),
            broken: false,
        }
    }

    /// Force closure of every cached session of `connection_id`. Sessions
    /// currently in use are closed when released. The next `acquire` opens a
    /// fresh session.
    pub async fn invalidate(&self, connection_id: &str) {
        let slot = {
            let slots = self.slots.read().await;
            slots.get(connection_id).cloned()
        };
        let Some(slot) = slot else {
            return;
        };
        slot.generation.fetch_add(1, Ordering::SeqCst);
        let stale = slot.drain_idle();
        let closed = stale.len();
        for session in stale {
            close_bounded(session.conn).await;
        }
        info!(connection_id = %connection_id, closed, "Invalidated pooled sessions");
    }

    /// The DBConnection was deleted: close everything and forget the id.
    /// Waiters on this id fail with `ConnectFailed`.
    pub async fn remove(&self, connection_id: &str) {
        let slot = {
            let mut slots = self.slots.write().await;
            slots.remove(connection_id)
        };
        let Some(slot) = slot else {
            return;
        };
        slot.removed.store(true, Ordering::SeqCst);
        slot.generation.fetch_add(1, Ordering::SeqCst);
        slot.permits.close();
        for session in slot.drain_idle() {
            close_bounded(session.conn).await;
        }
        info!(connection_id = %connection_id, "Removed connection from pool");
    }

    /// Close idle sessions unused for longer than the idle TTL. Returns how
    /// many were closed.
    pub async fn sweep_idle(&self) -> usize {
        let slots: Vec<(String, Arc<Slot>)> = {
            let slots = self.slots.read().await;
            slots
                .iter()
                .map(|(id, slot)| (id.clone(), Arc::clone(slot)))
                .collect()
        };

        let ttl = self.settings.idle_ttl;
        let mut closed = 0;
        for (connection_id, slot) in slots {
            let generation = slot.generation.load(Ordering::SeqCst);
            let expired: Vec<IdleSession> = match slot.idle.lock() {
                Ok(mut idle) => {
                    let (expired, keep): (Vec<_>, Vec<_>) = std::mem::take(&mut *idle)
                        .into_iter()
                        .partition(|s| {
                            s.idle_since.elapsed() >= ttl || s.generation != generation
                        });
                    *idle = keep;
                    expired
                }
                Err(_) => continue,
            };
            if expired.is_empty() {
                continue;
            }
            debug!(
                connection_id = %connection_id,
                count = expired.len(),
                "Closing idle sessions"
            );
            closed += expired.len();
            for session in expired {
                close_bounded(session.conn).await;
            }
        }
        closed
    }

    /// Start the periodic idle sweep.
    ///
    /// This should be called once when the server starts. The task holds a
    /// weak reference and stops once the pool is dropped.
    pub fn start_idle_sweep(self: &Arc<Self>) -> JoinHandle<()> {
        let pool = Arc::downgrade(self);
        let period = self.settings.sweep_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // First tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(pool) = pool.upgrade() else {
                    break;
                };
                let closed = pool.sweep_idle().await;
                if closed > 0 {
                    info!(closed, "Idle sweep closed sessions");
                }
            }
        })
    }

    pub async fn stats(&self, connection_id: &str) -> PoolStats {
        let slots = self.slots.read().await;
        match slots.get(connection_id) {
            Some(slot) => PoolStats {
                idle: slot.idle_count(),
                in_use: slot.in_use.load(Ordering::SeqCst),
            },
            None => PoolStats {
                idle: 0,
                in_use: 0,
            },
        }
    }

    /// Close every cached session and forget all ids.
    pub async fn close_all(&self) {
        let slots: Vec<(String, Arc<Slot>)> = {
            let mut slots = self.slots.write().await;
            slots.drain().collect()
        };
        for (connection_id, slot) in slots {
            slot.removed.store(true, Ordering::SeqCst);
            slot.permits.close();
            for session in slot.drain_idle() {
                close_bounded(session.conn).await;
            }
            debug!(connection_id = %connection_id, "Closed pooled sessions");
        }
        info!("All pooled sessions closed");
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("connectors", &self.connectors)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Exclusive use of one live session.
///
/// Call `release().await` when done. Dropping the handle still returns the
/// session synchronously (or closes it on a background task if it is unusable),
/// so a panic or early return never leaks the slot.
pub struct PooledHandle {
    id: u64,
    connection_id: String,
    engine: EngineType,
    session_id: u64,
    generation: u64,
    conn: Option<Box<dyn LiveConnection>>,
    slot: Arc<Slot>,
    permit: Option<OwnedSemaphorePermit>,
    broken: bool,
}

impl PooledHandle {
    /// Process-unique id of this handle.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn engine(&self) -> EngineType {
        self.engine
    }

    /// Identity of the underlying live session. Changes whenever a new
    /// session is opened.
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Mark the session unusable; it is closed instead of cached on release.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    fn conn(&mut self) -> CoreResult<&mut Box<dyn LiveConnection>> {
        self.conn
            .as_mut()
            .ok_or_else(|| CoreError::internal("Pooled handle has no live session"))
    }

    fn settle<T>(&mut self, result: CoreResult<T>) -> CoreResult<T> {
        if let Err(e) = &result {
            if e.breaks_connection() {
                self.broken = true;
            }
        }
        result
    }

    /// Row-returning statement under a deadline. A timeout or cancellation
    /// aborts the engine call and marks the session broken.
    pub async fn fetch(
        &mut self,
        stmt: &BoundStatement,
        max_rows: usize,
        deadline: &Deadline,
    ) -> CoreResult<RawRows> {
        let result = {
            let conn = self.conn()?;
            deadline.run("query execution", conn.fetch(stmt, max_rows)).await
        };
        self.settle(result)
    }

    /// `fetch` inside a read-only transaction.
    pub async fn fetch_read_only(
        &mut self,
        stmt: &BoundStatement,
        max_rows: usize,
        deadline: &Deadline,
    ) -> CoreResult<RawRows> {
        let result = {
            let conn = self.conn()?;
            deadline
                .run("query execution", conn.fetch_read_only(stmt, max_rows))
                .await
        };
        self.settle(result)
    }

    /// Effect statements under a deadline (transactional for more than one).
    pub async fn execute(
        &mut self,
        stmts: &[BoundStatement],
        deadline: &Deadline,
    ) -> CoreResult<u64> {
        let result = {
            let conn = self.conn()?;
            deadline.run("statement execution", conn.execute(stmts)).await
        };
        self.settle(result)
    }

    fn take_session(&mut self) -> Option<IdleSession> {
        self.conn.take().map(|conn| IdleSession {
            conn,
            session_id: self.session_id,
            generation: self.generation,
            idle_since: Instant::now(),
        })
    }

    /// Return the session to the pool, or close it if it is broken or stale.
    pub async fn release(mut self) {
        if let Some(session) = self.take_session() {
            let to_close = if self.broken {
                Some(session)
            } else {
                self.slot.push_idle(session)
            };
            if let Some(session) = to_close {
                debug!(
                    connection_id = %self.connection_id,
                    session_id = session.session_id,
                    broken = self.broken,
                    "Closing session on release"
                );
                close_bounded(session.conn).await;
            }
        }
        self.slot.in_use.fetch_sub(1, Ordering::SeqCst);
        // Permit last, so the next waiter sees the returned session
        self.permit.take();
    }
}

impl Drop for PooledHandle {
    fn drop(&mut self) {
        if self.permit.is_none() {
            return;
        }
        if let Some(session) = self.take_session() {
            let to_close = if self.broken {
                Some(session)
            } else {
                self.slot.push_idle(session)
            };
            if let Some(session) = to_close {
                // Close gracefully if a runtime is around; dropping is the fallback
                if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                    runtime.spawn(close_bounded(session.conn));
                }
            }
            warn!(
                connection_id = %self.connection_id,
                handle_id = self.id,
                "Handle released via Drop - consider using explicit release()"
            );
        }
        self.slot.in_use.fetch_sub(1, Ordering::SeqCst);
        self.permit.take();
    }
}

impl std::fmt::Debug for PooledHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledHandle")
            .field("id", &self.id)
            .field("connection_id", &self.connection_id)
            .field("engine", &self.engine)
            .field("session_id", &self.session_id)
            .field("broken", &self.broken)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_settings_defaults() {
        let settings = PoolSettings::default();
        assert_eq!(settings.max_per_connection, DEFAULT_MAX_PER_CONNECTION);
        assert_eq!(settings.acquire_timeout, Duration::from_secs(10));
        assert_eq!(settings.idle_ttl, Duration::from_secs(600));
    }

    #[tokio::test]
    async fn test_deadline_timeout() {
        let deadline = Deadline::new(Duration::from_millis(20), CancellationToken::new());
        let result: CoreResult<()> = deadline
            .run("sleep", async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(CoreError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_deadline_cancel() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let deadline = Deadline::new(Duration::from_secs(5), cancel);
        let result: CoreResult<()> = deadline.run("op", std::future::pending()).await;
        assert!(matches!(result, Err(CoreError::Cancelled { .. })));
    }

    #[tokio::test]
    async fn test_stats_unknown_connection() {
        let credentials = Arc::new(CredentialStore::new(&[1u8; 32]).unwrap());
        let pool = ConnectionPool::new(
            ConnectorRegistry::empty(),
            credentials,
            PoolSettings::default(),
        );
        assert_eq!(pool.stats("nope").await, PoolStats { idle: 0, in_use: 0 });
        pool.invalidate("nope").await;
        pool.remove("nope").await;
    }
}
