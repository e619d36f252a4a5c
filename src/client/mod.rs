//! Backend service client subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound request for one backend service
//!     → aggregate request body (bounded, so every attempt can replay it)
//!     → apply URL rewrites
//!     → preference from cookies (restriction cookie wins over sticky cookie)
//!     → loop:
//!         load balancer (preference + avoid list) → RemoteHost
//!         host client → response headers   ⇒ finish response, done
//!         pre-header failure               ⇒ avoid origin, ask retry policy
//!     → attempt ceiling reached            ⇒ NoAvailableHosts
//! ```
//!
//! # Design Decisions
//! - Attempts are strictly sequential; a request never fans out
//! - Non-2xx responses are successful exchanges and are never retried
//! - Dropping the request future cancels the in-flight attempt and stops the loop

pub mod backend_service;

use thiserror::Error;

use crate::origin::AppId;
use crate::stream::StreamError;
use crate::transport::TransportError;

pub use backend_service::{BackendService, BackendServiceClient, StickySessionConfig, ORIGIN_ID_HEADER};

/// Failure surfaced to the caller of a backend service.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// Nothing left to try: the load balancer had no eligible origin or the
    /// attempt ceiling was reached.
    #[error("no hosts available for application {app_id}")]
    NoAvailableHosts { app_id: AppId },

    /// The last attempt failed and the retry policy declined another.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The request body could not be buffered.
    #[error("request content rejected: {0}")]
    Content(#[from] StreamError),
}
