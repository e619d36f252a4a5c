//! Connection contract and identity.
//!
//! # Responsibilities
//! - Define what a pooled transport channel must offer
//! - Generate unique connection IDs for tracing and pool bookkeeping
//! - Define the factory that opens connections for a pool

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;

use crate::http::{LiveRequest, LiveResponse};
use crate::origin::Origin;
use crate::transport::TransportError;

/// Relaxed ordering is enough: IDs only need to be unique.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A live transport channel to one origin.
pub trait Connection: Send + Sync {
    fn id(&self) -> ConnectionId;

    fn origin(&self) -> &Origin;

    /// False once the peer or the local side has torn the channel down.
    fn is_connected(&self) -> bool;

    /// Write one request.
    ///
    /// Resolves to `Ok(Some(response))` when response headers arrive,
    /// `Ok(None)` when the exchange ended without any response, or an error
    /// raised before a response was seen.
    fn write(&self, request: LiveRequest) -> BoxFuture<'static, Result<Option<LiveResponse>, TransportError>>;

    /// Tear the channel down. Idempotent.
    fn close(&self);
}

/// Settings handed to the factory for each new connection.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionSettings {
    pub connect_timeout: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(2000),
        }
    }
}

/// Opens new connections to an origin.
pub trait ConnectionFactory: Send + Sync {
    fn create_connection(
        &self,
        origin: &Origin,
        settings: &ConnectionSettings,
    ) -> BoxFuture<'static, Result<Arc<dyn Connection>, TransportError>>;
}
