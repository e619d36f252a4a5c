//! Least-requests load balancing strategy.

use std::sync::Arc;

use crate::load_balancer::{ActiveOrigins, LoadBalancer, Preferences, RemoteHost};

/// Least requests selector.
/// Selects the origin with the fewest requests in flight.
pub struct LeastRequests {
    origins: Arc<dyn ActiveOrigins>,
}

impl LeastRequests {
    pub fn new(origins: Arc<dyn ActiveOrigins>) -> Self {
        Self { origins }
    }
}

impl LoadBalancer for LeastRequests {
    fn choose(&self, preferences: &Preferences) -> Option<RemoteHost> {
        // In case of tie, the first one is selected (stability)
        self.origins
            .snapshot()
            .iter()
            .filter(|host| !preferences.avoids(host.id()))
            .min_by_key(|host| host.load_balancing_metric())
            .cloned()
    }
}
