//! HTTP message subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound request (server.rs, axum)
//!     → request.rs (LiveRequest, request id, RequestContext)
//!     → rewrite.rs (ordered URL rewrite rules)
//!     → cookies.rs (sticky-session / restriction preference)
//!     → [backend service client dispatches to an origin]
//!     → response.rs (served-by marker, bodiless exchanges, header conflicts)
//!     → Send to client
//! ```
//!
//! # Design Decisions
//! - Messages are `http` crate types with a `ByteStream` body; no wrapper types
//! - Header transforms are free functions so any layer can apply them

pub mod cookies;
pub mod request;
pub mod response;
pub mod rewrite;
pub mod server;

pub use cookies::{request_cookie, sticky_cookie_name, sticky_set_cookie};
pub use request::{
    ensure_host_header, override_host_header, LiveRequest, RequestContext, RequestId, X_REQUEST_ID,
};
pub use response::{
    is_bodiless, is_chunked, remove_body, remove_conflicting_content_length, served_by, LiveResponse, ServedBy,
};
pub use rewrite::{RewriteRule, RewriteRules};
pub use server::{HttpServer, ServiceRoute};
