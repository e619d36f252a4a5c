//! Client-side dispatch core of a reverse proxy.
//!
//! Takes an inbound request for an application, picks one of the
//! application's origins, sends the request over a pooled connection and
//! streams the response back, retrying pre-header failures on other origins.

// Content and connections
pub mod origin;
pub mod pool;
pub mod stream;
pub mod transport;

// Dispatch
pub mod client;
pub mod load_balancer;
pub mod resilience;
pub mod routing;

// Origin management
pub mod health;
pub mod inventory;

// Surfaces and cross-cutting concerns
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;

#[cfg(test)]
mod testing;

pub use client::{BackendServiceClient, ClientError};
pub use config::ProxyConfig;
pub use inventory::OriginsInventory;
pub use lifecycle::Shutdown;
