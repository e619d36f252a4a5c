//! Bounded per-origin connection pool.
//!
//! # Responsibilities
//! - Lend idle connections, skipping dead or idle-expired ones
//! - Open new connections through the factory up to the per-host limit
//! - Queue borrowers at capacity, bounded in count and waiting time
//! - Hand returned connections to the oldest waiter before idling them
//! - Pass capacity freed by a closed connection to the oldest waiter
//! - Keep busy/available/pending counters consistent under cancellation

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::observability::metrics::{MetricsSink, NoopMetrics};
use crate::origin::Origin;
use crate::pool::{
    BorrowedConnection, Connection, ConnectionFactory, ConnectionId, ConnectionPool,
    ConnectionPoolSettings, ConnectionSettings, PoolError, PoolStats,
};
use crate::transport::TransportError;

/// What a queued borrower is woken with.
enum Handoff {
    /// A returned connection, already counted busy.
    Connection(Arc<dyn Connection>),
    /// A reserved capacity slot; the waiter opens or reuses a connection.
    Slot,
}

type Waiter = oneshot::Sender<Handoff>;

struct IdleConnection {
    connection: Arc<dyn Connection>,
    since: Instant,
}

pub struct SimpleConnectionPool {
    origin: Origin,
    settings: ConnectionPoolSettings,
    factory: Arc<dyn ConnectionFactory>,
    metrics: Arc<dyn MetricsSink>,
    available: Mutex<VecDeque<IdleConnection>>,
    waiters: Mutex<VecDeque<Waiter>>,
    borrowed: DashMap<ConnectionId, Arc<dyn Connection>>,
    busy: AtomicUsize,
    closed: AtomicBool,
    connection_attempts: AtomicU64,
    connection_failures: AtomicU64,
    closed_connections: AtomicU64,
    terminated_connections: AtomicU64,
}

impl SimpleConnectionPool {
    pub fn new(origin: Origin, settings: ConnectionPoolSettings, factory: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            origin,
            settings,
            factory,
            metrics: Arc::new(NoopMetrics),
            available: Mutex::new(VecDeque::new()),
            waiters: Mutex::new(VecDeque::new()),
            borrowed: DashMap::new(),
            busy: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            connection_attempts: AtomicU64::new(0),
            connection_failures: AtomicU64::new(0),
            closed_connections: AtomicU64::new(0),
            terminated_connections: AtomicU64::new(0),
        }
    }

    /// Publish busy/available/pending gauges to `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn settings(&self) -> &ConnectionPoolSettings {
        &self.settings
    }

    async fn borrow(&self) -> Result<BorrowedConnection, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::PoolClosed {
                origin: self.origin.id().clone(),
            });
        }

        let result = if self.try_reserve() {
            self.borrow_reserved().await
        } else {
            self.wait_for_connection().await
        };
        self.publish_gauges();
        result
    }

    /// Take a capacity slot without ever overshooting the limit.
    fn try_reserve(&self) -> bool {
        let max = self.settings.max_connections_per_host;
        self.busy
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |busy| (busy < max).then_some(busy + 1))
            .is_ok()
    }

    async fn borrow_reserved(&self) -> Result<BorrowedConnection, TransportError> {
        let slot = BusySlot { pool: self, armed: true };
        let result = self.borrow_or_create().await;
        if result.is_ok() {
            slot.keep();
        }
        result
    }

    async fn borrow_or_create(&self) -> Result<BorrowedConnection, TransportError> {
        if let Some(connection) = self.next_idle_connection() {
            trace!(origin = %self.origin, connection = %connection.id(), "Reusing idle connection");
            return Ok(self.lend(connection));
        }

        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
        let settings = ConnectionSettings {
            connect_timeout: self.settings.connect_timeout,
        };
        match self.factory.create_connection(&self.origin, &settings).await {
            Ok(connection) => {
                debug!(origin = %self.origin, connection = %connection.id(), "Opened connection");
                Ok(self.lend(connection))
            }
            Err(e) => {
                self.connection_failures.fetch_add(1, Ordering::Relaxed);
                warn!(origin = %self.origin, error = %e, "Failed to open connection");
                Err(e)
            }
        }
    }

    async fn wait_for_connection(&self) -> Result<BorrowedConnection, TransportError> {
        let (tx, rx) = oneshot::channel();
        let reserved = {
            // Releases happen under this lock, so capacity freed since the
            // first attempt is seen here or the release finds us queued.
            let mut waiters = self.waiters.lock();
            if self.try_reserve() {
                true
            } else {
                waiters.retain(|waiter| !waiter.is_closed());
                if waiters.len() >= self.settings.max_pending_connections_per_host {
                    return Err(TransportError::MaxPendingConnectionsExceeded {
                        origin: self.origin.id().clone(),
                        pending: waiters.len(),
                        limit: self.settings.max_pending_connections_per_host,
                    });
                }
                waiters.push_back(tx);
                false
            }
        };
        if reserved {
            return self.borrow_reserved().await;
        }
        trace!(origin = %self.origin, "Waiting for a pooled connection");

        let mut waiting = Waiting {
            pool: self,
            rx: Some(rx),
        };
        let timeout = self.settings.pending_connection_timeout;
        let outcome = match waiting.rx.as_mut() {
            Some(rx) => tokio::time::timeout(timeout, rx).await,
            None => return Err(TransportError::PoolClosed { origin: self.origin.id().clone() }),
        };
        match outcome {
            Ok(Ok(Handoff::Connection(connection))) => {
                waiting.rx = None;
                Ok(BorrowedConnection::new(connection))
            }
            Ok(Ok(Handoff::Slot)) => {
                waiting.rx = None;
                trace!(origin = %self.origin, "Woken with a freed slot");
                self.borrow_reserved().await
            }
            Ok(Err(_)) => Err(TransportError::PoolClosed {
                origin: self.origin.id().clone(),
            }),
            Err(_) => Err(TransportError::MaxPendingConnectionTimeout {
                origin: self.origin.id().clone(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    fn next_idle_connection(&self) -> Option<Arc<dyn Connection>> {
        let mut stale = Vec::new();
        let found = {
            let mut available = self.available.lock();
            loop {
                match available.pop_front() {
                    None => break None,
                    Some(idle) if !idle.connection.is_connected() => {
                        self.terminated_connections.fetch_add(1, Ordering::Relaxed);
                        stale.push(idle.connection);
                    }
                    Some(idle) if self.is_expired(&idle) => {
                        self.closed_connections.fetch_add(1, Ordering::Relaxed);
                        stale.push(idle.connection);
                    }
                    Some(idle) => break Some(idle.connection),
                }
            }
        };
        for connection in stale {
            connection.close();
        }
        found
    }

    fn is_expired(&self, idle: &IdleConnection) -> bool {
        self.settings
            .max_idle_time
            .map(|max| idle.since.elapsed() > max)
            .unwrap_or(false)
    }

    fn lend(&self, connection: Arc<dyn Connection>) -> BorrowedConnection {
        self.borrowed.insert(connection.id(), connection.clone());
        BorrowedConnection::new(connection)
    }

    /// Give `handoff` to the oldest live waiter, or hand it back.
    fn hand_to_waiter(waiters: &mut VecDeque<Waiter>, mut handoff: Handoff) -> Option<Handoff> {
        while let Some(tx) = waiters.pop_front() {
            match tx.send(handoff) {
                Ok(()) => return None,
                Err(back) => handoff = back,
            }
        }
        Some(handoff)
    }

    /// Put a borrowed, still-connected connection back into circulation.
    fn recycle(&self, connection: Arc<dyn Connection>) {
        {
            let mut waiters = self.waiters.lock();
            let Some(Handoff::Connection(connection)) =
                Self::hand_to_waiter(&mut waiters, Handoff::Connection(connection))
            else {
                return;
            };
            self.borrowed.remove(&connection.id());
            self.available.lock().push_back(IdleConnection {
                connection,
                since: Instant::now(),
            });
            self.busy.fetch_sub(1, Ordering::AcqRel);
        }
        if self.closed.load(Ordering::Acquire) {
            self.close_available();
        }
    }

    /// Give up one busy slot, passing it to the oldest waiter if any.
    fn release_slot(&self) {
        let mut waiters = self.waiters.lock();
        if !self.closed.load(Ordering::Acquire) && Self::hand_to_waiter(&mut waiters, Handoff::Slot).is_none() {
            return;
        }
        self.busy.fetch_sub(1, Ordering::AcqRel);
    }

    fn retire(&self, connection: &Arc<dyn Connection>) {
        if self.borrowed.remove(&connection.id()).is_some() {
            self.release_slot();
        }
        connection.close();
    }

    fn close_available(&self) {
        let drained: Vec<IdleConnection> = self.available.lock().drain(..).collect();
        for idle in drained {
            idle.connection.close();
        }
    }

    fn not_borrowed(&self, id: ConnectionId) -> PoolError {
        PoolError::NotBorrowed {
            connection: id,
            origin: self.origin.id().clone(),
        }
    }

    fn pending(&self) -> usize {
        self.waiters.lock().iter().filter(|w| !w.is_closed()).count()
    }

    fn publish_gauges(&self) {
        let labels = [
            ("app_id", self.origin.app_id().to_string()),
            ("origin_id", self.origin.id().to_string()),
        ];
        let stats = self.stats();
        self.metrics.set_gauge("connection_pool_busy", &labels, stats.busy as f64);
        self.metrics.set_gauge("connection_pool_available", &labels, stats.available as f64);
        self.metrics.set_gauge("connection_pool_pending", &labels, stats.pending as f64);
    }
}

impl ConnectionPool for SimpleConnectionPool {
    fn origin(&self) -> &Origin {
        &self.origin
    }

    fn borrow_connection(&self) -> BoxFuture<'_, Result<BorrowedConnection, TransportError>> {
        Box::pin(self.borrow())
    }

    fn return_connection(&self, connection: BorrowedConnection) -> Result<(), PoolError> {
        let connection = connection.into_inner();
        let id = connection.id();
        if !self.borrowed.contains_key(&id) {
            return Err(self.not_borrowed(id));
        }

        if self.closed.load(Ordering::Acquire) {
            self.closed_connections.fetch_add(1, Ordering::Relaxed);
            self.retire(&connection);
        } else if !connection.is_connected() {
            trace!(origin = %self.origin, connection = %id, "Returned connection is dead");
            self.terminated_connections.fetch_add(1, Ordering::Relaxed);
            self.retire(&connection);
        } else {
            trace!(origin = %self.origin, connection = %id, "Connection returned");
            self.recycle(connection);
        }
        self.publish_gauges();
        Ok(())
    }

    fn close_connection(&self, connection: BorrowedConnection) -> Result<(), PoolError> {
        let connection = connection.into_inner();
        let id = connection.id();
        if self.borrowed.remove(&id).is_none() {
            return Err(self.not_borrowed(id));
        }
        self.release_slot();
        self.closed_connections.fetch_add(1, Ordering::Relaxed);
        connection.close();
        debug!(origin = %self.origin, connection = %id, "Connection closed");
        self.publish_gauges();
        Ok(())
    }

    fn is_exhausted(&self) -> bool {
        self.pending() >= self.settings.max_pending_connections_per_host
    }

    fn stats(&self) -> PoolStats {
        let available = self.available.lock().len();
        PoolStats {
            busy: self.busy.load(Ordering::Acquire),
            available,
            pending: self.pending(),
            connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
            connection_failures: self.connection_failures.load(Ordering::Relaxed),
            closed_connections: self.closed_connections.load(Ordering::Relaxed),
            terminated_connections: self.terminated_connections.load(Ordering::Relaxed),
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // Dropping the senders fails every waiter with PoolClosed.
        self.waiters.lock().clear();
        self.close_available();
        for entry in self.borrowed.iter() {
            entry.value().close();
        }
        debug!(origin = %self.origin, "Connection pool closed");
    }
}

/// Gives back a reserved capacity slot unless the borrow succeeded.
struct BusySlot<'a> {
    pool: &'a SimpleConnectionPool,
    armed: bool,
}

impl BusySlot<'_> {
    fn keep(mut self) {
        self.armed = false;
    }
}

impl Drop for BusySlot<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.pool.release_slot();
        }
    }
}

/// A queued borrower. Whatever is handed over after the borrower gave up
/// goes back into circulation instead of leaking.
struct Waiting<'a> {
    pool: &'a SimpleConnectionPool,
    rx: Option<oneshot::Receiver<Handoff>>,
}

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        if let Some(mut rx) = self.rx.take() {
            rx.close();
            match rx.try_recv() {
                Ok(Handoff::Connection(connection)) => self.pool.recycle(connection),
                Ok(Handoff::Slot) => self.pool.release_slot(),
                Err(_) => {}
            }
        }
    }
}
