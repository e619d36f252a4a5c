//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Backend service client builds Preferences (cookie preference, avoid list)
//!     → restriction.rs (origin-restriction cookie: pattern subset, random pick)
//!     → sticky.rs (sticky-session cookie: preferred origin if still active)
//!     → base strategy over the active origin set:
//!         - round_robin.rs (rotate through origins)
//!         - least_conn.rs (pick origin with fewest in-flight requests)
//!     → RemoteHost or None
//! ```
//!
//! # Design Decisions
//! - Strategies read the active set from `ActiveOrigins`; the inventory
//!   owns health state, strategies never see inactive origins
//! - Avoided origins are never chosen, so a retry cannot revisit one
//! - Preference strategies wrap a delegate and fall back to it

pub mod least_conn;
pub mod restriction;
pub mod round_robin;
pub mod sticky;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::origin::{Origin, OriginId};
use crate::transport::HostClient;

pub use least_conn::LeastRequests;
pub use restriction::OriginRestriction;
pub use round_robin::RoundRobin;
pub use sticky::StickySession;

/// An origin bound to its request-handling entry point.
#[derive(Clone)]
pub struct RemoteHost {
    origin: Origin,
    client: Arc<dyn HostClient>,
}

impl RemoteHost {
    pub fn new(origin: Origin, client: Arc<dyn HostClient>) -> Self {
        Self { origin, client }
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn id(&self) -> &OriginId {
        self.origin.id()
    }

    pub fn client(&self) -> &Arc<dyn HostClient> {
        &self.client
    }

    pub fn load_balancing_metric(&self) -> usize {
        self.client.load_balancing_metric()
    }
}

impl fmt::Debug for RemoteHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteHost").field("origin", &self.origin).finish()
    }
}

/// Hints for one choice.
#[derive(Debug, Clone, Default)]
pub struct Preferences {
    /// Origin id or restriction pattern taken from a request cookie.
    pub preferred_origins: Option<String>,
    /// Origins already tried for this request.
    pub avoid_origins: Vec<OriginId>,
}

impl Preferences {
    pub fn avoids(&self, id: &OriginId) -> bool {
        self.avoid_origins.iter().any(|avoided| avoided == id)
    }
}

/// Source of the currently selectable origins.
pub trait ActiveOrigins: Send + Sync {
    fn snapshot(&self) -> Arc<Vec<RemoteHost>>;
}

/// A fixed origin set.
#[derive(Debug, Clone, Default)]
pub struct StaticOrigins {
    hosts: Arc<Vec<RemoteHost>>,
}

impl StaticOrigins {
    pub fn new(hosts: Vec<RemoteHost>) -> Self {
        Self { hosts: Arc::new(hosts) }
    }
}

impl ActiveOrigins for StaticOrigins {
    fn snapshot(&self) -> Arc<Vec<RemoteHost>> {
        self.hosts.clone()
    }
}

/// Load balancer trait for selecting an origin.
pub trait LoadBalancer: Send + Sync {
    /// Choose a host, or `None` when nothing eligible remains.
    fn choose(&self, preferences: &Preferences) -> Option<RemoteHost>;
}

/// Base selection algorithm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingStrategy {
    #[default]
    RoundRobin,
    LeastRequests,
}

/// Assemble the strategy chain for one backend service.
pub fn build_load_balancer(
    strategy: LoadBalancingStrategy,
    origins: Arc<dyn ActiveOrigins>,
    sticky_sessions: bool,
    restriction_cookie: bool,
) -> Arc<dyn LoadBalancer> {
    let mut balancer: Arc<dyn LoadBalancer> = match strategy {
        LoadBalancingStrategy::RoundRobin => Arc::new(RoundRobin::new(origins.clone())),
        LoadBalancingStrategy::LeastRequests => Arc::new(LeastRequests::new(origins.clone())),
    };
    if sticky_sessions {
        balancer = Arc::new(StickySession::new(origins.clone(), balancer));
    }
    if restriction_cookie {
        balancer = Arc::new(OriginRestriction::new(origins, balancer));
    }
    balancer
}
