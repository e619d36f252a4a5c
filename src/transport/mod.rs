//! Single-origin transport subsystem.
//!
//! # Data Flow
//! ```text
//! Backend service client picks a RemoteHost
//!     → host_client.rs (pre-header: borrow, write, await headers under timeout)
//!     → lease.rs (connection held until the body reaches a terminal state)
//!     → post-header: body end → return, body cancel → close
//!     → body.rs (hyper bodies ↔ ByteStream)
//! ```
//!
//! # Design Decisions
//! - Every failure before response headers is a `TransportError` eligible for retry
//! - Once headers are seen, faults travel inside the body stream and are not retried
//! - The connection's fate is decided exactly once, by whichever of body end,
//!   body cancel or header-phase failure happens first

pub mod body;
pub mod host_client;
pub mod lease;

use std::sync::Arc;

use futures_util::future::BoxFuture;
use thiserror::Error;

use crate::http::{LiveRequest, LiveResponse, RequestContext};
use crate::origin::{Origin, OriginId};
use crate::stream::BoxError;

pub use host_client::{HostHttpClient, PooledHostFactory};
pub use lease::ConnectionLease;

type Cause = Arc<dyn std::error::Error + Send + Sync>;

/// Failure before any response header was received.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("origin {origin} unreachable: {cause}")]
    OriginUnreachable { origin: OriginId, cause: Cause },

    #[error("no response from origin {origin}")]
    NoResponse { origin: OriginId },

    #[error("no response from origin {origin} within {timeout_ms} ms")]
    ResponseTimeout { origin: OriginId, timeout_ms: u64 },

    #[error("maximum pending connections exceeded for origin {origin}: pending={pending} limit={limit}")]
    MaxPendingConnectionsExceeded {
        origin: OriginId,
        pending: usize,
        limit: usize,
    },

    #[error("no connection to origin {origin} became available within {timeout_ms} ms")]
    MaxPendingConnectionTimeout { origin: OriginId, timeout_ms: u64 },

    #[error("connection pool for origin {origin} is closed")]
    PoolClosed { origin: OriginId },

    #[error("connection to origin {origin} lost: {cause}")]
    TransportLost { origin: OriginId, cause: Cause },

    #[error("request for origin {origin} could not be sent: {cause}")]
    InvalidRequest { origin: OriginId, cause: Cause },
}

impl TransportError {
    pub fn unreachable(origin: &OriginId, cause: impl Into<BoxError>) -> Self {
        TransportError::OriginUnreachable {
            origin: origin.clone(),
            cause: Arc::from(cause.into()),
        }
    }

    pub fn lost(origin: &OriginId, cause: impl Into<BoxError>) -> Self {
        TransportError::TransportLost {
            origin: origin.clone(),
            cause: Arc::from(cause.into()),
        }
    }

    pub fn invalid_request(origin: &OriginId, cause: impl Into<BoxError>) -> Self {
        TransportError::InvalidRequest {
            origin: origin.clone(),
            cause: Arc::from(cause.into()),
        }
    }

    /// The origin the failure is recorded against.
    pub fn origin(&self) -> &OriginId {
        match self {
            TransportError::OriginUnreachable { origin, .. }
            | TransportError::NoResponse { origin }
            | TransportError::ResponseTimeout { origin, .. }
            | TransportError::MaxPendingConnectionsExceeded { origin, .. }
            | TransportError::MaxPendingConnectionTimeout { origin, .. }
            | TransportError::PoolClosed { origin }
            | TransportError::TransportLost { origin, .. }
            | TransportError::InvalidRequest { origin, .. } => origin,
        }
    }

    /// Whether another origin might succeed where this one failed.
    ///
    /// A request the HTTP layer refuses to encode fails the same way
    /// everywhere.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransportError::InvalidRequest { .. })
    }
}

/// Request-handling entry point of one origin.
pub trait HostClient: Send + Sync {
    /// Send one request; resolves once response headers arrive.
    fn send_request(
        &self,
        request: LiveRequest,
        context: &RequestContext,
    ) -> BoxFuture<'static, Result<LiveResponse, TransportError>>;

    /// Requests currently in flight, used by load balancing.
    fn load_balancing_metric(&self) -> usize;

    /// Release pooled resources. Called when the origin is removed.
    fn close(&self);
}

/// Creates the host client for a newly added origin.
pub trait HostClientFactory: Send + Sync {
    fn create_host_client(&self, origin: &Origin) -> Arc<dyn HostClient>;
}
