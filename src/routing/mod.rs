//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request path
//!     → router.rs (longest matching prefix)
//!     → matcher.rs (path prefix condition)
//!     → Return: backend service or NoMatch
//!
//! Route compilation (at startup):
//!     BackendServiceConfig[] (path_prefix)
//!     → Sort by prefix length, longest first
//!     → Freeze as immutable Router
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - No regex in hot path (prefix matching only)
//! - Deterministic: same input always matches same route

pub mod matcher;
pub mod router;

pub use matcher::PathPrefixMatcher;
pub use router::Router;
