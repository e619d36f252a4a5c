//! Sticky-session strategy.
//!
//! Sends a client back to the origin named in its sticky-session cookie for
//! as long as that origin stays active. Otherwise the delegate decides.

use std::sync::Arc;

use crate::load_balancer::{ActiveOrigins, LoadBalancer, Preferences, RemoteHost};

pub struct StickySession {
    origins: Arc<dyn ActiveOrigins>,
    delegate: Arc<dyn LoadBalancer>,
}

impl StickySession {
    pub fn new(origins: Arc<dyn ActiveOrigins>, delegate: Arc<dyn LoadBalancer>) -> Self {
        Self { origins, delegate }
    }
}

impl LoadBalancer for StickySession {
    fn choose(&self, preferences: &Preferences) -> Option<RemoteHost> {
        if let Some(preferred) = preferences.preferred_origins.as_deref() {
            let sticky = self
                .origins
                .snapshot()
                .iter()
                .find(|host| host.id().as_str() == preferred && !preferences.avoids(host.id()))
                .cloned();
            if sticky.is_some() {
                return sticky;
            }
        }
        self.delegate.choose(preferences)
    }
}
