//! Per-origin connection pooling subsystem.
//!
//! # Data Flow
//! ```text
//! Host client needs a connection
//!     → simple.rs (borrow: reuse idle, create via factory, or queue)
//!     → connection.rs (Connection::write → 0 or 1 response)
//!     → return (back to idle / next waiter) or close (destroyed)
//!     → http1.rs (factory: TCP connect + HTTP/1.1 handshake)
//! ```
//!
//! # Design Decisions
//! - A borrowed connection is a move-only handle, so it can be returned or
//!   closed at most once
//! - Counters are atomics; idle set and waiters sit behind short locks never
//!   held across I/O
//! - Waiters are served in FIFO order and bounded in number and time

pub mod connection;
pub mod http1;
pub mod simple;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::Serialize;
use thiserror::Error;

use crate::origin::{Origin, OriginId};
use crate::transport::TransportError;

pub use connection::{Connection, ConnectionFactory, ConnectionId, ConnectionSettings};
pub use http1::HttpConnectionFactory;
pub use simple::SimpleConnectionPool;

/// Pool sizing and timing.
#[derive(Debug, Clone)]
pub struct ConnectionPoolSettings {
    pub max_connections_per_host: usize,
    pub max_pending_connections_per_host: usize,
    pub connect_timeout: Duration,
    pub pending_connection_timeout: Duration,
    /// Idle connections older than this are closed instead of reused.
    pub max_idle_time: Option<Duration>,
}

impl Default for ConnectionPoolSettings {
    fn default() -> Self {
        Self {
            max_connections_per_host: 50,
            max_pending_connections_per_host: 25,
            connect_timeout: Duration::from_millis(2000),
            pending_connection_timeout: Duration::from_millis(2000),
            max_idle_time: None,
        }
    }
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub busy: usize,
    pub available: usize,
    pub pending: usize,
    pub connection_attempts: u64,
    pub connection_failures: u64,
    pub closed_connections: u64,
    pub terminated_connections: u64,
}

/// Contract violations on return or close.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("connection {connection} was not borrowed from the pool for {origin}")]
    NotBorrowed {
        connection: ConnectionId,
        origin: OriginId,
    },
}

/// A connection on loan from a pool.
///
/// Not `Clone`: handing it back to the pool consumes it.
pub struct BorrowedConnection {
    connection: Arc<dyn Connection>,
}

impl BorrowedConnection {
    pub(crate) fn new(connection: Arc<dyn Connection>) -> Self {
        Self { connection }
    }

    pub fn id(&self) -> ConnectionId {
        self.connection.id()
    }

    pub fn origin(&self) -> &Origin {
        self.connection.origin()
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    pub(crate) fn into_inner(self) -> Arc<dyn Connection> {
        self.connection
    }
}

impl fmt::Debug for BorrowedConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BorrowedConnection")
            .field("id", &self.id())
            .field("origin", &self.origin().id())
            .finish()
    }
}

/// Pool of reusable connections to a single origin.
pub trait ConnectionPool: Send + Sync {
    fn origin(&self) -> &Origin;

    /// Obtain a connection, waiting for one if the pool is at capacity.
    fn borrow_connection(&self) -> BoxFuture<'_, Result<BorrowedConnection, TransportError>>;

    /// Make a borrowed connection available for reuse.
    fn return_connection(&self, connection: BorrowedConnection) -> Result<(), PoolError>;

    /// Destroy a borrowed connection instead of returning it.
    fn close_connection(&self, connection: BorrowedConnection) -> Result<(), PoolError>;

    /// True when no more borrowers may queue.
    fn is_exhausted(&self) -> bool;

    fn stats(&self) -> PoolStats;

    /// Fail all waiters and close every connection.
    fn close(&self);
}
