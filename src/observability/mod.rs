//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Dispatch core produces:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (MetricsSink: counters, gauges, timers)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//!     → InMemoryMetrics in tests
//! ```
//!
//! # Design Decisions
//! - Components receive an `Arc<dyn MetricsSink>` instead of reaching for a
//!   global, so tests can assert on exactly what was recorded
//! - Request ID flows through all log events of a request

pub mod logging;
pub mod metrics;

pub use metrics::{InMemoryMetrics, MetricsSink, NoopMetrics, RecorderMetrics};
