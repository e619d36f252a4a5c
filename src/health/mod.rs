//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Per-origin timer
//!     → Probe origin over HTTP
//!     → Consecutive success/failure thresholds
//!     → monitor.rs listeners (origin_healthy / origin_unhealthy)
//!
//! State machine (state.rs):
//!     ACTIVE ←→ INACTIVE   (health reports)
//!     ACTIVE/INACTIVE → DISABLED → INACTIVE   (operator commands)
//! ```
//!
//! # Design Decisions
//! - Monitors only report; the inventory owns origin state
//! - State transitions require consecutive successes/failures
//! - Without a monitor, origins stay ACTIVE and health reports are ignored

pub mod active;
pub mod monitor;
pub mod state;

pub use active::{HealthCheckSettings, HttpHealthCheckMonitor};
pub use monitor::{NoOriginHealthStatusMonitor, OriginHealthListener, OriginHealthStatusMonitor};
pub use state::{OriginEvent, OriginState};
