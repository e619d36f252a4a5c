//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe each monitored origin over HTTP
//! - Apply consecutive success/failure thresholds
//! - Report verdicts to registered listeners

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use axum::body::Body;
use axum::http::Request;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, oneshot};
use tokio::time;
use tracing::{debug, warn};

use crate::health::{OriginHealthListener, OriginHealthStatusMonitor};
use crate::lifecycle::Shutdown;
use crate::origin::Origin;

#[derive(Debug, Clone)]
pub struct HealthCheckSettings {
    /// Path probed on every origin.
    pub uri: String,
    pub interval: Duration,
    pub timeout: Duration,
    pub healthy_threshold: u32,
    pub unhealthy_threshold: u32,
}

impl Default for HealthCheckSettings {
    fn default() -> Self {
        Self {
            uri: "/".to_string(),
            interval: Duration::from_millis(5000),
            timeout: Duration::from_millis(2000),
            healthy_threshold: 2,
            unhealthy_threshold: 2,
        }
    }
}

type Listeners = Arc<RwLock<Vec<Weak<dyn OriginHealthListener>>>>;

/// Probes origins with `GET <uri>`; any 2xx counts as a success.
pub struct HttpHealthCheckMonitor {
    settings: HealthCheckSettings,
    client: Client<HttpConnector, Body>,
    listeners: Listeners,
    probes: Mutex<HashMap<Origin, oneshot::Sender<()>>>,
    shutdown: Arc<Shutdown>,
}

impl HttpHealthCheckMonitor {
    pub fn new(settings: HealthCheckSettings, shutdown: Arc<Shutdown>) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(settings.timeout));
        let client = Client::builder(TokioExecutor::new()).build(connector);

        Self {
            settings,
            client,
            listeners: Arc::new(RwLock::new(Vec::new())),
            probes: Mutex::new(HashMap::new()),
            shutdown,
        }
    }

    pub fn monitored_count(&self) -> usize {
        self.probes.lock().len()
    }

    fn start_probe(&self, origin: Origin) -> oneshot::Sender<()> {
        let (stop_tx, stop_rx) = oneshot::channel();
        let probe = OriginProbe {
            origin,
            settings: self.settings.clone(),
            client: self.client.clone(),
            listeners: self.listeners.clone(),
            successes: 0,
            failures: 0,
        };
        tokio::spawn(probe.run(stop_rx, self.shutdown.subscribe()));
        stop_tx
    }
}

impl OriginHealthStatusMonitor for HttpHealthCheckMonitor {
    fn monitor(&self, origins: &[Origin]) {
        let mut probes = self.probes.lock();
        for origin in origins {
            if !probes.contains_key(origin) {
                let stop = self.start_probe(origin.clone());
                probes.insert(origin.clone(), stop);
            }
        }
    }

    fn stop_monitoring(&self, origins: &[Origin]) {
        let mut probes = self.probes.lock();
        for origin in origins {
            if let Some(stop) = probes.remove(origin) {
                let _ = stop.send(());
            }
        }
    }

    fn add_listener(&self, listener: Weak<dyn OriginHealthListener>) {
        self.listeners.write().push(listener);
    }
}

impl Drop for HttpHealthCheckMonitor {
    fn drop(&mut self) {
        for (_, stop) in self.probes.lock().drain() {
            let _ = stop.send(());
        }
    }
}

struct OriginProbe {
    origin: Origin,
    settings: HealthCheckSettings,
    client: Client<HttpConnector, Body>,
    listeners: Listeners,
    successes: u32,
    failures: u32,
}

impl OriginProbe {
    async fn run(mut self, mut stop: oneshot::Receiver<()>, mut shutdown: broadcast::Receiver<()>) {
        debug!(origin = %self.origin, uri = %self.settings.uri, "Health probe starting");

        let mut ticker = time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let healthy = self.check().await;
                    self.record(healthy);
                }
                _ = &mut stop => break,
                _ = shutdown.recv() => break,
            }
        }

        debug!(origin = %self.origin, "Health probe stopped");
    }

    async fn check(&self) -> bool {
        let uri = format!("http://{}{}", self.origin.host_and_port(), self.settings.uri);
        let request = match Request::builder()
            .method("GET")
            .uri(&uri)
            .header("user-agent", "origin-dispatch-health-check")
            .body(Body::empty())
        {
            Ok(req) => req,
            Err(e) => {
                warn!(origin = %self.origin, uri = %uri, error = %e, "Failed to build health check request");
                return false;
            }
        };

        match time::timeout(self.settings.timeout, self.client.request(request)).await {
            Ok(Ok(response)) => {
                let success = response.status().is_success();
                if !success {
                    warn!(origin = %self.origin, status = %response.status(), "Health check failed: non-success status");
                }
                success
            }
            Ok(Err(e)) => {
                warn!(origin = %self.origin, error = %e, "Health check failed: connection error");
                false
            }
            Err(_) => {
                warn!(origin = %self.origin, "Health check failed: timeout");
                false
            }
        }
    }

    fn record(&mut self, healthy: bool) {
        if healthy {
            self.successes = self.successes.saturating_add(1);
            self.failures = 0;
            if self.successes >= self.settings.healthy_threshold {
                self.announce(|l, o| l.origin_healthy(o));
            }
        } else {
            self.failures = self.failures.saturating_add(1);
            self.successes = 0;
            if self.failures >= self.settings.unhealthy_threshold {
                self.announce(|l, o| l.origin_unhealthy(o));
            }
        }
    }

    fn announce(&self, report: impl Fn(&dyn OriginHealthListener, &Origin)) {
        let listeners: Vec<Arc<dyn OriginHealthListener>> =
            self.listeners.read().iter().filter_map(Weak::upgrade).collect();
        for listener in listeners {
            report(listener.as_ref(), &self.origin);
        }
    }
}
