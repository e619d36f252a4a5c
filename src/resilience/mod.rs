//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Backend service client attempt fails before response headers:
//!     → retries.rs (policy decides: retry? which origin would be next? how long to wait?)
//!     → backoff.rs (optional jittered exponential delay between attempts)
//!     → back to load balancer with the failed origin avoided
//! ```
//!
//! # Design Decisions
//! - Only pre-header failures reach the policy; a response, whatever its
//!   status, ends the retry loop
//! - The policy is advisory; the client enforces a hard attempt ceiling of its own
//! - Policies are trait objects picked at configuration time

pub mod backoff;
pub mod retries;

pub use backoff::{calculate_backoff, Backoff};
pub use retries::{AlwaysRetry, RetryContext, RetryNTimes, RetryOutcome, RetryPolicy};
