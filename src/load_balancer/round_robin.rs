//! Round-robin load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::load_balancer::{ActiveOrigins, LoadBalancer, Preferences, RemoteHost};

/// Round-robin selector.
/// Stores an internal counter to rotate through origins.
pub struct RoundRobin {
    origins: Arc<dyn ActiveOrigins>,
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new(origins: Arc<dyn ActiveOrigins>) -> Self {
        Self {
            origins,
            counter: AtomicUsize::new(0),
        }
    }
}

impl LoadBalancer for RoundRobin {
    fn choose(&self, preferences: &Preferences) -> Option<RemoteHost> {
        let hosts = self.origins.snapshot();
        if hosts.is_empty() {
            return None;
        }

        // Bounded scan so an all-avoided set terminates.
        let start = self.counter.fetch_add(1, Ordering::Relaxed);
        let len = hosts.len();
        (0..len)
            .map(|i| &hosts[(start + i) % len])
            .find(|host| !preferences.avoids(host.id()))
            .cloned()
    }
}
