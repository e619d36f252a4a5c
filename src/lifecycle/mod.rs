//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Validate → Build backend services (inventories, clients) → Start listener
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop health probes and watchers → Close inventories → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then origins, then listener
//! - Background tasks subscribe to one broadcast shutdown signal

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::shutdown_signal;
pub use startup::{build_services, BackendServices, ServiceHandle, StartupError};
