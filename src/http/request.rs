//! Request values and per-request context.
//!
//! # Responsibilities
//! - Define the request type that flows through the dispatch core
//! - Generate a unique request ID as early as possible
//! - Carry request-scoped metadata explicitly, by reference
//!
//! # Design Decisions
//! - The request is the `http` crate's value type with a streaming body
//! - Context is a plain struct passed by reference, never mutated downstream

use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

use http::header::HOST;
use http::{HeaderValue, Request};
use uuid::Uuid;

use crate::stream::ByteStream;

/// Header carrying the request ID to origins.
pub const X_REQUEST_ID: &str = "x-request-id";

/// A request whose body is a [`ByteStream`].
pub type LiveRequest = Request<ByteStream>;

/// Unique identifier of one inbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Request-scoped metadata.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: RequestId,
    pub client_address: Option<SocketAddr>,
    pub received_at: Instant,
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            request_id: RequestId::new(),
            client_address: None,
            received_at: Instant::now(),
        }
    }

    pub fn with_client_address(mut self, address: SocketAddr) -> Self {
        self.client_address = Some(address);
        self
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Set the `Host` header unless the request already carries one.
pub fn ensure_host_header(request: &mut LiveRequest, host_and_port: &str) {
    if request.headers().contains_key(HOST) {
        return;
    }
    if let Ok(value) = HeaderValue::from_str(host_and_port) {
        request.headers_mut().insert(HOST, value);
    }
}

/// Replace the `Host` header.
pub fn override_host_header(request: &mut LiveRequest, host_and_port: &str) {
    if let Ok(value) = HeaderValue::from_str(host_and_port) {
        request.headers_mut().insert(HOST, value);
    }
}
