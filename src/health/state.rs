//! Origin health state machine.
//!
//! # States
//! - Active: origin receives traffic
//! - Inactive: excluded from load balancing, still health-checked
//! - Disabled: excluded from load balancing and not health-checked
//!
//! # State Transitions
//! ```text
//! Active   → Inactive: health check reports unhealthy
//! Inactive → Active:   health check reports healthy
//! Active   → Disabled: disable command
//! Inactive → Disabled: disable command
//! Disabled → Inactive: enable command (must pass a health check to serve again)
//! ```
//! Any other event leaves the state unchanged.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OriginState {
    Active,
    Inactive,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginEvent {
    Healthy,
    Unhealthy,
    Enable,
    Disable,
}

impl OriginState {
    /// State after `event`; inappropriate events leave it unchanged.
    pub fn on_event(self, event: OriginEvent) -> OriginState {
        use OriginEvent::*;
        use OriginState::*;

        match (self, event) {
            (Active, Unhealthy) => Inactive,
            (Inactive, Healthy) => Active,
            (Active | Inactive, Disable) => Disabled,
            (Disabled, Enable) => Inactive,
            (state, _) => state,
        }
    }

    /// Value of the per-origin status gauge.
    pub fn gauge_value(self) -> f64 {
        match self {
            OriginState::Active => 1.0,
            OriginState::Inactive => 0.0,
            OriginState::Disabled => -1.0,
        }
    }

    pub fn is_monitored(self) -> bool {
        self != OriginState::Disabled
    }
}

impl fmt::Display for OriginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OriginState::Active => "ACTIVE",
            OriginState::Inactive => "INACTIVE",
            OriginState::Disabled => "DISABLED",
        };
        f.write_str(name)
    }
}
