//! Bounded connection pool with background reclamation.
//!
//! The pool keeps between zero and `max_active` live connections. Idle
//! connections wait in a LIFO stack; the oldest idle connection sits at the
//! front, where the reclamation task inspects it once per tick and closes it
//! when it has been idle longer than `max_lifetime`.
//!
//! Connections are checked out as [`PooledConnection`] guards and returned
//! to the pool when the guard is dropped. Closing a connection means
//! dropping it.
//!
//! # Example
//!
//! ```ignore
//! let pool = PoolBuilder::new()
//!     .min_active(1)
//!     .max_active(4)
//!     .max_lifetime(Duration::from_secs(300))
//!     .build(manager)
//!     .await?;
//!
//! let mut conn = pool.acquire().await?;
//! sqlx::query("SELECT 1").execute(&mut *conn).await?;
//! ```

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Constants
// =============================================================================

/// Number of tries an acquire makes before giving up with [`PoolError::Busy`].
pub const ACQUIRE_ATTEMPTS: u32 = 5;

/// Acquire timeout used by [`Pool::acquire`].
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default idle lifetime before a connection is reclaimed.
pub const DEFAULT_MAX_LIFETIME: Duration = Duration::from_secs(300);

/// Default interval between reclamation sweeps.
pub const DEFAULT_RECLAIM_INTERVAL: Duration = Duration::from_secs(1);

// =============================================================================
// Errors
// =============================================================================

/// Boxed backend error.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors returned by [`Pool`].
#[derive(Debug, Error)]
pub enum PoolError {
    /// Invalid sizing at construction.
    #[error("invalid pool config: {0}")]
    Config(String),

    /// Every acquire attempt timed out. The caller may retry.
    #[error("pool too busy")]
    Busy,

    /// The pool was closed.
    #[error("pool is closed")]
    Closed,

    /// The backend refused a new connection.
    #[error("connect failed: {0}")]
    Connect(#[source] BoxError),
}

// =============================================================================
// Connection Manager
// =============================================================================

/// Opens backend connections for a [`Pool`].
#[async_trait]
pub trait ManageConnection: Send + Sync + 'static {
    /// Live backend handle.
    type Connection: Send + 'static;

    /// Backend connect error.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Open a new connection.
    async fn connect(&self) -> Result<Self::Connection, Self::Error>;
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`Pool`].
#[derive(Debug, Clone)]
pub struct PoolBuilder {
    min_active: usize,
    max_active: usize,
    max_lifetime: Duration,
    reclaim_interval: Duration,
}

impl Default for PoolBuilder {
    fn default() -> Self {
        Self {
            min_active: 0,
            max_active: 1,
            max_lifetime: DEFAULT_MAX_LIFETIME,
            reclaim_interval: DEFAULT_RECLAIM_INTERVAL,
        }
    }
}

impl PoolBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connections opened eagerly at construction.
    pub fn min_active(mut self, min: usize) -> Self {
        self.min_active = min;
        self
    }

    /// Upper bound on live connections, idle and in use.
    pub fn max_active(mut self, max: usize) -> Self {
        self.max_active = max;
        self
    }

    /// Idle time after which a connection is reclaimed.
    pub fn max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = lifetime;
        self
    }

    /// Interval between reclamation sweeps.
    pub fn reclaim_interval(mut self, interval: Duration) -> Self {
        self.reclaim_interval = interval;
        self
    }

    /// Validate the sizing, open `min_active` connections and start reclamation.
    ///
    /// Must be called inside a Tokio runtime.
    ///
    /// # Errors
    /// [`PoolError::Config`] if `max_active == 0` or `max_active < min_active`.
    /// [`PoolError::Connect`] if any eager connection fails; connections
    /// opened before the failure are closed.
    pub async fn build<M: ManageConnection>(self, manager: M) -> Result<Pool<M>, PoolError> {
        if self.max_active == 0 {
            return Err(PoolError::Config(
                "max active connections must be positive".to_string(),
            ));
        }
        if self.max_active < self.min_active {
            return Err(PoolError::Config(format!(
                "max active connections ({}) must not be less than min ({})",
                self.max_active, self.min_active
            )));
        }
        if self.reclaim_interval.is_zero() {
            return Err(PoolError::Config(
                "reclaim interval must be positive".to_string(),
            ));
        }

        let mut idle = VecDeque::with_capacity(self.max_active);
        for _ in 0..self.min_active {
            // On error `idle` is dropped, closing what was opened so far.
            let conn = manager
                .connect()
                .await
                .map_err(|e| PoolError::Connect(Box::new(e)))?;
            idle.push_back(Idle {
                conn,
                last_used: Instant::now(),
            });
        }

        let shared = Arc::new(Shared {
            manager,
            state: Mutex::new(State {
                active: idle.len(),
                idle,
                in_use: 0,
                closed: false,
            }),
            config: self,
            released: Notify::new(),
            shutdown: CancellationToken::new(),
        });
        spawn_reclaimer(&shared);

        tracing::debug!(
            min_active = shared.config.min_active,
            max_active = shared.config.max_active,
            max_lifetime = ?shared.config.max_lifetime,
            "Connection pool created"
        );
        Ok(Pool { shared })
    }
}

// =============================================================================
// Shared State
// =============================================================================

struct Idle<C> {
    conn: C,
    last_used: Instant,
}

struct State<C> {
    /// Back is the most recently released connection.
    idle: VecDeque<Idle<C>>,
    /// Live connections, idle plus in use (plus reserved slots being opened).
    active: usize,
    in_use: usize,
    closed: bool,
}

struct Shared<M: ManageConnection> {
    manager: M,
    config: PoolBuilder,
    state: Mutex<State<M::Connection>>,
    released: Notify,
    shutdown: CancellationToken,
}

/// Outcome of one locked look at the pool.
enum Take<C> {
    Idle(C),
    Reserved,
    Wait,
}

impl<M: ManageConnection> Shared<M> {
    fn lock(&self) -> MutexGuard<'_, State<M::Connection>> {
        // Counters stay consistent across a panic in a holder; keep going.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn try_take(&self) -> Result<Take<M::Connection>, PoolError> {
        let mut state = self.lock();
        if state.closed {
            return Err(PoolError::Closed);
        }
        if let Some(idle) = state.idle.pop_back() {
            state.in_use += 1;
            return Ok(Take::Idle(idle.conn));
        }
        if state.active < self.config.max_active {
            state.active += 1;
            state.in_use += 1;
            return Ok(Take::Reserved);
        }
        Ok(Take::Wait)
    }

    fn unreserve(&self) {
        {
            let mut state = self.lock();
            state.active -= 1;
            state.in_use -= 1;
        }
        self.released.notify_one();
    }

    fn release(&self, conn: M::Connection, broken: bool) {
        let discarded = {
            let mut state = self.lock();
            state.in_use -= 1;
            if state.closed || broken || state.idle.len() >= self.config.max_active {
                state.active -= 1;
                Some(conn)
            } else {
                state.idle.push_back(Idle {
                    conn,
                    last_used: Instant::now(),
                });
                None
            }
        };

        if discarded.is_some() {
            tracing::debug!(broken, "Closing released connection");
        }
        drop(discarded);
        self.released.notify_one();
    }

    /// Close idle connections past their lifetime, oldest first.
    ///
    /// The lock is held per inspected connection only.
    fn reclaim_stale(&self) -> usize {
        let mut reclaimed = 0;
        loop {
            let stale = {
                let mut state = self.lock();
                if state.closed {
                    None
                } else {
                    match state.idle.front() {
                        Some(idle) if idle.last_used.elapsed() > self.config.max_lifetime => {
                            state.active -= 1;
                            state.idle.pop_front()
                        }
                        _ => None,
                    }
                }
            };

            match stale {
                Some(idle) => {
                    drop(idle);
                    reclaimed += 1;
                }
                None => break,
            }
        }
        if reclaimed > 0 {
            // Freed slots let blocked acquirers open fresh connections.
            self.released.notify_waiters();
        }
        reclaimed
    }
}

impl<M: ManageConnection> Drop for Shared<M> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn spawn_reclaimer<M: ManageConnection>(shared: &Arc<Shared<M>>) {
    let weak = Arc::downgrade(shared);
    let cancel = shared.shutdown.clone();
    let interval = shared.config.reclaim_interval;

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(shared) = weak.upgrade() else { break };
                    let reclaimed = shared.reclaim_stale();
                    if reclaimed > 0 {
                        tracing::debug!(reclaimed, "Closed inactive connections");
                    }
                }
            }
        }
        tracing::trace!("Pool reclamation task stopped");
    });
}

/// Un-reserves a slot unless the connect attempt succeeded.
///
/// Covers both a connect error and the acquiring future being dropped
/// mid-connect.
struct Reservation<'a, M: ManageConnection> {
    shared: &'a Shared<M>,
    armed: bool,
}

impl<M: ManageConnection> Drop for Reservation<'_, M> {
    fn drop(&mut self) {
        if self.armed {
            self.shared.unreserve();
        }
    }
}

// =============================================================================
// Pool
// =============================================================================

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolState {
    /// Live connections, idle plus in use.
    pub active: usize,
    pub in_use: usize,
    pub idle: usize,
    pub closed: bool,
}

/// Bounded pool of backend connections. Cheap to clone.
pub struct Pool<M: ManageConnection> {
    shared: Arc<Shared<M>>,
}

impl<M: ManageConnection> Clone for Pool<M> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<M: ManageConnection> std::fmt::Debug for Pool<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<M: ManageConnection> Pool<M> {
    /// Acquire with [`DEFAULT_ACQUIRE_TIMEOUT`].
    pub async fn acquire(&self) -> Result<PooledConnection<M>, PoolError> {
        self.acquire_timeout(DEFAULT_ACQUIRE_TIMEOUT).await
    }

    /// Acquire a connection, waiting at most `timeout` overall.
    ///
    /// Makes up to [`ACQUIRE_ATTEMPTS`] tries. Each try takes an idle
    /// connection, or opens a new one when below `max_active`, or waits up
    /// to `timeout / ACQUIRE_ATTEMPTS` for a release.
    ///
    /// # Errors
    /// [`PoolError::Closed`] after [`Pool::close`], [`PoolError::Busy`] once
    /// every try timed out, [`PoolError::Connect`] if opening failed.
    pub async fn acquire_timeout(&self, timeout: Duration) -> Result<PooledConnection<M>, PoolError> {
        let per_try = timeout / ACQUIRE_ATTEMPTS;

        for attempt in 1..=ACQUIRE_ATTEMPTS {
            // Register interest before looking, so a release between the
            // look and the wait still wakes us.
            let notified = self.shared.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.shared.try_take()? {
                Take::Idle(conn) => return Ok(PooledConnection::new(&self.shared, conn)),
                Take::Reserved => return self.open_reserved().await,
                Take::Wait => {}
            }

            if tokio::time::timeout(per_try, notified).await.is_err() {
                tracing::trace!(attempt, "No connection released within try timeout");
            }
        }

        tracing::warn!(timeout = ?timeout, "Connection pool exhausted");
        Err(PoolError::Busy)
    }

    async fn open_reserved(&self) -> Result<PooledConnection<M>, PoolError> {
        let mut reservation = Reservation {
            shared: &self.shared,
            armed: true,
        };
        let conn = self
            .shared
            .manager
            .connect()
            .await
            .map_err(|e| PoolError::Connect(Box::new(e)))?;
        reservation.armed = false;

        tracing::trace!("Opened new pooled connection");
        Ok(PooledConnection::new(&self.shared, conn))
    }

    /// Close the pool. Idempotent.
    ///
    /// Idle connections are closed now; checked-out connections are closed
    /// when their guards drop. Blocked acquirers fail with [`PoolError::Closed`].
    pub fn close(&self) {
        let drained: Vec<Idle<M::Connection>> = {
            let mut state = self.shared.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let drained: Vec<_> = state.idle.drain(..).collect();
            state.active -= drained.len();
            drained
        };

        self.shared.shutdown.cancel();
        self.shared.released.notify_waiters();
        tracing::debug!(closed = drained.len(), "Connection pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Snapshot of the pool counters.
    pub fn state(&self) -> PoolState {
        let state = self.shared.lock();
        PoolState {
            active: state.active,
            in_use: state.in_use,
            idle: state.idle.len(),
            closed: state.closed,
        }
    }

}

// =============================================================================
// Pooled Connection
// =============================================================================

/// A checked-out connection. Returned to the pool on drop.
pub struct PooledConnection<M: ManageConnection> {
    shared: Arc<Shared<M>>,
    conn: Option<M::Connection>,
    broken: bool,
}

impl<M: ManageConnection> PooledConnection<M> {
    fn new(shared: &Arc<Shared<M>>, conn: M::Connection) -> Self {
        Self {
            shared: Arc::clone(shared),
            conn: Some(conn),
            broken: false,
        }
    }

    /// Close this connection on release instead of pooling it.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }
}

impl<M: ManageConnection> std::fmt::Debug for PooledConnection<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("broken", &self.broken)
            .finish_non_exhaustive()
    }
}

impl<M: ManageConnection> Deref for PooledConnection<M> {
    type Target = M::Connection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("connection is present until drop")
    }
}

impl<M: ManageConnection> DerefMut for PooledConnection<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("connection is present until drop")
    }
}

impl<M: ManageConnection> Drop for PooledConnection<M> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.shared.release(conn, self.broken);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Error)]
    #[error("connection refused")]
    struct Refused;

    /// Hands out numbered connections and tracks how many are alive.
    #[derive(Clone, Default)]
    struct CountingManager {
        opened: Arc<AtomicUsize>,
        live: Arc<AtomicUsize>,
        fail_from: Option<usize>,
    }

    struct FakeConn {
        id: usize,
        live: Arc<AtomicUsize>,
    }

    impl Drop for FakeConn {
        fn drop(&mut self) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl ManageConnection for CountingManager {
        type Connection = FakeConn;
        type Error = Refused;

        async fn connect(&self) -> Result<FakeConn, Refused> {
            let id = self.opened.fetch_add(1, Ordering::SeqCst);
            if self.fail_from.is_some_and(|n| id >= n) {
                return Err(Refused);
            }
            self.live.fetch_add(1, Ordering::SeqCst);
            Ok(FakeConn {
                id,
                live: Arc::clone(&self.live),
            })
        }
    }

    impl CountingManager {
        fn live(&self) -> usize {
            self.live.load(Ordering::SeqCst)
        }

        fn opened(&self) -> usize {
            self.opened.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn test_build_opens_min_connections() {
        for (min, max) in [(0, 1), (1, 1), (2, 5), (5, 5)] {
            let manager = CountingManager::default();
            let pool = PoolBuilder::new()
                .min_active(min)
                .max_active(max)
                .build(manager.clone())
                .await
                .unwrap();

            let state = pool.state();
            assert_eq!(state.active, min);
            assert_eq!(state.idle, min);
            assert_eq!(state.in_use, 0);
            assert_eq!(manager.live(), min);
        }
    }

    #[tokio::test]
    async fn test_build_rejects_invalid_sizes() {
        let err = PoolBuilder::new()
            .min_active(3)
            .max_active(2)
            .build(CountingManager::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::Config(_)));

        let err = PoolBuilder::new()
            .max_active(0)
            .build(CountingManager::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::Config(_)));
    }

    #[tokio::test]
    async fn test_build_failure_closes_opened_connections() {
        let manager = CountingManager {
            fail_from: Some(2),
            ..Default::default()
        };
        let err = PoolBuilder::new()
            .min_active(3)
            .max_active(3)
            .build(manager.clone())
            .await
            .unwrap_err();

        assert!(matches!(err, PoolError::Connect(_)));
        assert_eq!(err.to_string(), "connect failed: connection refused");
        assert_eq!(manager.live(), 0);
    }

    #[tokio::test]
    async fn test_released_connection_is_reused() {
        let manager = CountingManager::default();
        let pool = PoolBuilder::new()
            .max_active(2)
            .build(manager.clone())
            .await
            .unwrap();

        let first_id = pool.acquire().await.unwrap().id;
        let conn = pool.acquire().await.unwrap();

        assert_eq!(conn.id, first_id);
        assert_eq!(manager.opened(), 1);
        assert_eq!(pool.state().in_use, 1);
        drop(conn);
        assert_eq!(
            pool.state(),
            PoolState {
                active: 1,
                in_use: 0,
                idle: 1,
                closed: false
            }
        );
    }

    #[tokio::test]
    async fn test_full_pool_times_out_busy() {
        let pool = PoolBuilder::new()
            .max_active(1)
            .build(CountingManager::default())
            .await
            .unwrap();
        let _held = pool.acquire().await.unwrap();

        let started = Instant::now();
        let err = pool
            .acquire_timeout(Duration::from_millis(250))
            .await
            .unwrap_err();

        assert!(matches!(err, PoolError::Busy));
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert_eq!(pool.state().active, 1);
    }

    #[tokio::test]
    async fn test_waiter_wakes_on_release() {
        let manager = CountingManager::default();
        let pool = PoolBuilder::new()
            .max_active(1)
            .build(manager.clone())
            .await
            .unwrap();
        let held = pool.acquire().await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire_timeout(Duration::from_secs(5)).await.map(|c| c.id) })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        let held_id = held.id;
        drop(held);

        assert_eq!(waiter.await.unwrap().unwrap(), held_id);
        assert_eq!(manager.opened(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_active_never_exceeds_max() {
        let manager = CountingManager::default();
        let pool = PoolBuilder::new()
            .max_active(3)
            .build(manager.clone())
            .await
            .unwrap();
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let pool = pool.clone();
                let manager = manager.clone();
                let peak = Arc::clone(&peak);
                tokio::spawn(async move {
                    for _ in 0..5 {
                        let conn = loop {
                            match pool.acquire_timeout(Duration::from_secs(2)).await {
                                Ok(conn) => break conn,
                                Err(PoolError::Busy) => continue,
                                Err(e) => panic!("unexpected pool error: {e}"),
                            }
                        };
                        let state = pool.state();
                        peak.fetch_max(state.active.max(manager.live()), Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(2)).await;
                        drop(conn);
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(pool.state().active <= 3);
        assert_eq!(pool.state().in_use, 0);
    }

    #[tokio::test]
    async fn test_stale_connection_reclaimed() {
        let manager = CountingManager::default();
        let pool = PoolBuilder::new()
            .min_active(1)
            .max_active(2)
            .max_lifetime(Duration::from_millis(50))
            .reclaim_interval(Duration::from_millis(20))
            .build(manager.clone())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(pool.state().active, 0);
        assert_eq!(manager.live(), 0);

        let conn = pool.acquire().await.unwrap();
        assert_eq!(conn.id, 1, "reclaimed connection must not be handed out");
        assert_eq!(manager.opened(), 2);
    }

    #[tokio::test]
    async fn test_fresh_connection_survives_sweep() {
        let manager = CountingManager::default();
        let pool = PoolBuilder::new()
            .min_active(1)
            .max_active(1)
            .max_lifetime(Duration::from_secs(60))
            .reclaim_interval(Duration::from_millis(10))
            .build(manager.clone())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(pool.state().idle, 1);
        assert_eq!(manager.live(), 1);
    }

    #[tokio::test]
    async fn test_release_after_close_closes_connection() {
        let manager = CountingManager::default();
        let pool = PoolBuilder::new()
            .min_active(2)
            .max_active(2)
            .build(manager.clone())
            .await
            .unwrap();
        let conn = pool.acquire().await.unwrap();

        pool.close();
        assert_eq!(manager.live(), 1, "idle connection closed on close");

        drop(conn);
        assert_eq!(manager.live(), 0);
        assert_eq!(pool.state().active, 0);
        assert_eq!(pool.state().idle, 0);

        // Second close is a no-op.
        pool.close();
        assert!(pool.is_closed());
    }

    #[tokio::test]
    async fn test_acquire_after_close_fails() {
        let pool = PoolBuilder::new()
            .max_active(1)
            .build(CountingManager::default())
            .await
            .unwrap();
        pool.close();

        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, PoolError::Closed));
    }

    #[tokio::test]
    async fn test_blocked_acquire_sees_close() {
        let pool = PoolBuilder::new()
            .max_active(1)
            .build(CountingManager::default())
            .await
            .unwrap();
        let _held = pool.acquire().await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire_timeout(Duration::from_secs(10)).await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        pool.close();

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake on close")
            .unwrap();
        assert!(matches!(result, Err(PoolError::Closed)));
    }

    #[tokio::test]
    async fn test_broken_connection_discarded() {
        let manager = CountingManager::default();
        let pool = PoolBuilder::new()
            .max_active(1)
            .build(manager.clone())
            .await
            .unwrap();

        let mut conn = pool.acquire().await.unwrap();
        conn.mark_broken();
        drop(conn);

        assert_eq!(pool.state().active, 0);
        assert_eq!(manager.live(), 0);
        assert_eq!(pool.acquire().await.unwrap().id, 1);
    }

    #[tokio::test]
    async fn test_pooled_connection_debug() {
        let pool = PoolBuilder::new()
            .max_active(1)
            .build(CountingManager::default())
            .await
            .unwrap();

        let mut conn = pool.acquire().await.unwrap();
        assert_eq!(format!("{conn:?}"), "PooledConnection { broken: false, .. }");
        conn.mark_broken();
        assert_eq!(format!("{conn:?}"), "PooledConnection { broken: true, .. }");

        // `unwrap_err` needs the Ok side to be Debug.
        let err = pool
            .acquire_timeout(Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::Busy));
    }

    #[tokio::test]
    async fn test_connect_failure_frees_slot() {
        let manager = CountingManager {
            fail_from: Some(0),
            ..Default::default()
        };
        let pool = PoolBuilder::new()
            .max_active(1)
            .build(manager.clone())
            .await
            .unwrap();

        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, PoolError::Connect(_)));
        assert_eq!(pool.state().active, 0);
        assert_eq!(pool.state().in_use, 0);
    }
}
