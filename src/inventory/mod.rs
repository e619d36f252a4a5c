//! Origins inventory subsystem.
//!
//! # Data Flow
//! ```text
//! Configuration (set_origins) ──┐
//! Health monitor reports ───────┼→ per-origin state machine (health::state)
//! Command bus (enable/disable) ─┘        │
//!                                        ├→ active set (ArcSwap) → load balancer
//!                                        ├→ origin_status gauge
//!                                        └→ snapshot → listeners + bus
//! ```
//!
//! # Design Decisions
//! - Every mutation runs under one short lock; readers see the active set
//!   through a lock-free swap published after the mutation
//! - One notification per actual change, none for no-op events
//! - Nothing changes after close

pub mod commands;
pub mod snapshot;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::health::{OriginEvent, OriginHealthListener, OriginHealthStatusMonitor, OriginState};
use crate::load_balancer::{ActiveOrigins, RemoteHost};
use crate::observability::metrics::MetricsSink;
use crate::origin::{AppId, Origin, OriginId};
use crate::transport::HostClientFactory;

pub use commands::{OriginCommand, OriginCommandBus};
pub use snapshot::OriginsSnapshot;

const LISTENER_CAPACITY: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InventoryError {
    #[error("origin set for application {app_id} is empty")]
    EmptyOrigins { app_id: AppId },

    #[error("inventory for application {app_id} is closed")]
    Closed { app_id: AppId },
}

struct MonitoredOrigin {
    host: RemoteHost,
    state: OriginState,
}

impl MonitoredOrigin {
    fn origin(&self) -> &Origin {
        self.host.origin()
    }
}

/// Origins of one application and their states.
pub struct OriginsInventory {
    app_id: AppId,
    monitor: Arc<dyn OriginHealthStatusMonitor>,
    host_factory: Arc<dyn HostClientFactory>,
    metrics: Arc<dyn MetricsSink>,
    bus: OriginCommandBus,
    origins: Mutex<Vec<MonitoredOrigin>>,
    active: ArcSwap<Vec<RemoteHost>>,
    listeners: broadcast::Sender<OriginsSnapshot>,
    closed: AtomicBool,
    command_task: Mutex<Option<JoinHandle<()>>>,
}

impl OriginsInventory {
    /// Create an inventory, register it with `monitor` and subscribe it to `bus`.
    ///
    /// Must be called within a tokio runtime.
    pub fn new(
        app_id: AppId,
        monitor: Arc<dyn OriginHealthStatusMonitor>,
        host_factory: Arc<dyn HostClientFactory>,
        metrics: Arc<dyn MetricsSink>,
        bus: OriginCommandBus,
    ) -> Arc<Self> {
        let (listeners, _) = broadcast::channel(LISTENER_CAPACITY);
        let inventory = Arc::new(Self {
            app_id,
            monitor,
            host_factory,
            metrics,
            bus,
            origins: Mutex::new(Vec::new()),
            active: ArcSwap::from_pointee(Vec::new()),
            listeners,
            closed: AtomicBool::new(false),
            command_task: Mutex::new(None),
        });

        let listener: Weak<dyn OriginHealthListener> = Arc::downgrade(&inventory) as Weak<dyn OriginHealthListener>;
        inventory.monitor.add_listener(listener);

        let task = tokio::spawn(Self::consume_commands(
            Arc::downgrade(&inventory),
            inventory.bus.subscribe_commands(),
        ));
        *inventory.command_task.lock() = Some(task);

        inventory
    }

    async fn consume_commands(inventory: Weak<Self>, mut commands: broadcast::Receiver<OriginCommand>) {
        loop {
            match commands.recv().await {
                Ok(command) => match inventory.upgrade() {
                    Some(inventory) => inventory.on_command(&command),
                    None => break,
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Origin command consumer lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    pub fn app_id(&self) -> &AppId {
        &self.app_id
    }

    /// Reconcile the inventory with a new origin set.
    pub fn set_origins(&self, new_origins: Vec<Origin>) -> Result<(), InventoryError> {
        if new_origins.is_empty() {
            return Err(InventoryError::EmptyOrigins {
                app_id: self.app_id.clone(),
            });
        }

        let mut origins = self.origins.lock();
        if self.is_closed() {
            return Err(InventoryError::Closed {
                app_id: self.app_id.clone(),
            });
        }

        let mut previous: Vec<MonitoredOrigin> = std::mem::take(&mut *origins);
        let mut updated = Vec::with_capacity(new_origins.len());
        let mut changed = false;

        for origin in new_origins {
            if updated.iter().any(|m: &MonitoredOrigin| m.origin().id() == origin.id()) {
                continue;
            }
            match previous.iter().position(|m| m.origin().id() == origin.id()) {
                Some(index) => {
                    let existing = previous.remove(index);
                    if existing.origin() == &origin {
                        info!(app_id = %self.app_id, origin_id = %origin.id(), "Existing origin has been left unchanged");
                        updated.push(existing);
                    } else {
                        self.retire(&existing);
                        let replacement = self.admit(origin);
                        info!(app_id = %self.app_id, origin = %replacement.origin(), "Existing origin has been updated");
                        updated.push(replacement);
                        changed = true;
                    }
                }
                None => {
                    let added = self.admit(origin);
                    info!(app_id = %self.app_id, origin_id = %added.origin().id(), "New origin added and activated");
                    updated.push(added);
                    changed = true;
                }
            }
        }

        for removed in previous {
            self.retire(&removed);
            info!(app_id = %self.app_id, origin_id = %removed.origin().id(), "Existing origin has been removed");
            changed = true;
        }

        *origins = updated;
        if changed {
            self.publish(&origins);
        }
        Ok(())
    }

    fn admit(&self, origin: Origin) -> MonitoredOrigin {
        let client = self.host_factory.create_host_client(&origin);
        let monitored = MonitoredOrigin {
            host: RemoteHost::new(origin, client),
            state: OriginState::Active,
        };
        self.record_state(&monitored);
        self.monitor.monitor(std::slice::from_ref(monitored.origin()));
        monitored
    }

    fn retire(&self, monitored: &MonitoredOrigin) {
        self.monitor.stop_monitoring(std::slice::from_ref(monitored.origin()));
        monitored.host.client().close();
    }

    fn record_state(&self, monitored: &MonitoredOrigin) {
        self.metrics.set_gauge(
            "origin_status",
            &[
                ("app_id", self.app_id.to_string()),
                ("origin_id", monitored.origin().id().to_string()),
            ],
            monitored.state.gauge_value(),
        );
    }

    /// Health monitor verdict: the origin passed its checks.
    pub fn origin_healthy(&self, origin: &Origin) {
        if self.monitor.is_probing() {
            self.handle(origin.id(), OriginEvent::Healthy);
        }
    }

    /// Health monitor verdict: the origin failed its checks.
    pub fn origin_unhealthy(&self, origin: &Origin) {
        if self.monitor.is_probing() {
            self.handle(origin.id(), OriginEvent::Unhealthy);
        }
    }

    /// Apply an operator command. Commands for other applications are ignored.
    pub fn on_command(&self, command: &OriginCommand) {
        match command {
            OriginCommand::EnableOrigin { app_id, origin_id } if app_id == &self.app_id => {
                self.handle(origin_id, OriginEvent::Enable)
            }
            OriginCommand::DisableOrigin { app_id, origin_id } if app_id == &self.app_id => {
                self.handle(origin_id, OriginEvent::Disable)
            }
            OriginCommand::GetOriginsInventorySnapshot => {
                if !self.is_closed() {
                    let origins = self.origins.lock();
                    self.publish(&origins);
                }
            }
            _ => {}
        }
    }

    fn handle(&self, origin_id: &OriginId, event: OriginEvent) {
        let mut origins = self.origins.lock();
        if self.is_closed() {
            return;
        }
        let Some(monitored) = origins.iter_mut().find(|m| m.origin().id() == origin_id) else {
            debug!(app_id = %self.app_id, origin_id = %origin_id, ?event, "Event for unknown origin ignored");
            return;
        };

        let from = monitored.state;
        let to = from.on_event(event);
        if from == to {
            return;
        }
        monitored.state = to;
        info!(app_id = %self.app_id, origin_id = %origin_id, from = %from, to = %to, "Origin state change");

        if to == OriginState::Disabled {
            self.monitor.stop_monitoring(std::slice::from_ref(monitored.origin()));
        } else if from == OriginState::Disabled {
            self.monitor.monitor(std::slice::from_ref(monitored.origin()));
        }
        self.record_state(monitored);
        self.publish(&origins);
    }

    /// Swap in the new active set and notify listeners.
    fn publish(&self, origins: &[MonitoredOrigin]) {
        let active: Vec<RemoteHost> = origins
            .iter()
            .filter(|m| m.state == OriginState::Active)
            .map(|m| m.host.clone())
            .collect();
        self.active.store(Arc::new(active));

        let snapshot = self.build_snapshot(origins);
        let _ = self.listeners.send(snapshot.clone());
        self.bus.post_snapshot(snapshot);
    }

    fn build_snapshot(&self, origins: &[MonitoredOrigin]) -> OriginsSnapshot {
        let in_state = |state: OriginState| -> Vec<Origin> {
            origins
                .iter()
                .filter(|m| m.state == state)
                .map(|m| m.origin().clone())
                .collect()
        };
        OriginsSnapshot {
            app_id: self.app_id.clone(),
            active: in_state(OriginState::Active),
            inactive: in_state(OriginState::Inactive),
            disabled: in_state(OriginState::Disabled),
        }
    }

    pub fn origin_count(&self, state: OriginState) -> usize {
        self.origins.lock().iter().filter(|m| m.state == state).count()
    }

    /// Current origins grouped by state.
    pub fn inventory_snapshot(&self) -> OriginsSnapshot {
        self.build_snapshot(&self.origins.lock())
    }

    pub fn origins(&self) -> Vec<Origin> {
        self.origins.lock().iter().map(|m| m.origin().clone()).collect()
    }

    /// Receive a snapshot after every change.
    pub fn subscribe(&self) -> broadcast::Receiver<OriginsSnapshot> {
        self.listeners.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop monitoring, close every host client and leave the command bus.
    pub fn close(&self) {
        let mut origins = self.origins.lock();
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for monitored in origins.iter() {
            self.retire(monitored);
            info!(app_id = %self.app_id, origin_id = %monitored.origin().id(), "Existing origin has been removed");
        }
        origins.clear();
        self.publish(&origins);

        if let Some(task) = self.command_task.lock().take() {
            task.abort();
        }
    }
}

impl ActiveOrigins for OriginsInventory {
    fn snapshot(&self) -> Arc<Vec<RemoteHost>> {
        self.active.load_full()
    }
}

impl OriginHealthListener for OriginsInventory {
    fn origin_healthy(&self, origin: &Origin) {
        OriginsInventory::origin_healthy(self, origin)
    }

    fn origin_unhealthy(&self, origin: &Origin) {
        OriginsInventory::origin_unhealthy(self, origin)
    }
}

impl Drop for OriginsInventory {
    fn drop(&mut self) {
        if let Some(task) = self.command_task.get_mut().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::health::NoOriginHealthStatusMonitor;
    use crate::observability::InMemoryMetrics;
    use crate::testing::{test_origin, FakeHostFactory};

    /// Records monitor calls; tests deliver health verdicts by hand.
    #[derive(Default)]
    struct RecordingMonitor {
        monitored: Mutex<Vec<String>>,
        stopped: Mutex<Vec<String>>,
        listeners: Mutex<Vec<Weak<dyn OriginHealthListener>>>,
    }

    impl OriginHealthStatusMonitor for RecordingMonitor {
        fn monitor(&self, origins: &[Origin]) {
            self.monitored.lock().extend(origins.iter().map(|o| o.id().to_string()));
        }

        fn stop_monitoring(&self, origins: &[Origin]) {
            self.stopped.lock().extend(origins.iter().map(|o| o.id().to_string()));
        }

        fn add_listener(&self, listener: Weak<dyn OriginHealthListener>) {
            self.listeners.lock().push(listener);
        }
    }

    impl RecordingMonitor {
        fn report(&self, origin: &Origin, healthy: bool) {
            for listener in self.listeners.lock().iter().filter_map(Weak::upgrade) {
                if healthy {
                    listener.origin_healthy(origin);
                } else {
                    listener.origin_unhealthy(origin);
                }
            }
        }

        fn monitor_calls(&self, id: &str) -> usize {
            self.monitored.lock().iter().filter(|m| *m == id).count()
        }

        fn stop_calls(&self, id: &str) -> usize {
            self.stopped.lock().iter().filter(|m| *m == id).count()
        }
    }

    struct Fixture {
        monitor: Arc<RecordingMonitor>,
        factory: Arc<FakeHostFactory>,
        metrics: Arc<InMemoryMetrics>,
        bus: OriginCommandBus,
        inventory: Arc<OriginsInventory>,
    }

    impl Fixture {
        fn new() -> Self {
            let monitor = Arc::new(RecordingMonitor::default());
            let factory = Arc::new(FakeHostFactory::new());
            let metrics = Arc::new(InMemoryMetrics::new());
            let bus = OriginCommandBus::new();
            let inventory = OriginsInventory::new(
                AppId::new("shop"),
                monitor.clone(),
                factory.clone(),
                metrics.clone(),
                bus.clone(),
            );
            Self {
                monitor,
                factory,
                metrics,
                bus,
                inventory,
            }
        }

        fn active_ids(&self) -> Vec<String> {
            self.inventory.snapshot().iter().map(|h| h.id().to_string()).collect()
        }

        fn status(&self, id: &str) -> Option<f64> {
            self.metrics.gauge("origin_status", &[("app_id", "shop"), ("origin_id", id)])
        }
    }

    fn disable(id: &str) -> OriginCommand {
        OriginCommand::disable(AppId::new("shop"), OriginId::new(id))
    }

    fn enable(id: &str) -> OriginCommand {
        OriginCommand::enable(AppId::new("shop"), OriginId::new(id))
    }

    #[tokio::test]
    async fn new_origins_start_active_and_monitored() {
        let f = Fixture::new();
        f.inventory
            .set_origins(vec![test_origin("shop", "s1", 8001), test_origin("shop", "s2", 8002)])
            .unwrap();

        assert_eq!(f.active_ids(), vec!["s1", "s2"]);
        assert_eq!(f.inventory.origin_count(OriginState::Active), 2);
        assert_eq!(f.monitor.monitor_calls("s1"), 1);
        assert_eq!(f.status("s1"), Some(1.0));
    }

    #[tokio::test]
    async fn unhealthy_origin_leaves_the_active_set_but_stays_monitored() {
        let f = Fixture::new();
        let s1 = test_origin("shop", "s1", 8001);
        f.inventory.set_origins(vec![s1.clone(), test_origin("shop", "s2", 8002)]).unwrap();

        f.monitor.report(&s1, false);

        assert_eq!(f.active_ids(), vec!["s2"]);
        assert_eq!(f.inventory.origin_count(OriginState::Inactive), 1);
        assert_eq!(f.monitor.stop_calls("s1"), 0);
        assert_eq!(f.status("s1"), Some(0.0));

        f.monitor.report(&s1, true);
        assert_eq!(f.active_ids(), vec!["s1", "s2"]);
        assert_eq!(f.status("s1"), Some(1.0));
    }

    #[tokio::test]
    async fn repeated_healthy_reports_notify_nothing() {
        let f = Fixture::new();
        let s1 = test_origin("shop", "s1", 8001);
        f.inventory.set_origins(vec![s1.clone()]).unwrap();
        let mut rx = f.inventory.subscribe();

        f.monitor.report(&s1, true);
        f.monitor.report(&s1, true);
        assert!(rx.try_recv().is_err());

        f.monitor.report(&s1, false);
        assert_eq!(rx.try_recv().unwrap().inactive.len(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn disable_stops_monitoring_and_enable_requires_a_health_check() {
        let f = Fixture::new();
        let s1 = test_origin("shop", "s1", 8001);
        f.inventory.set_origins(vec![s1.clone()]).unwrap();

        f.inventory.on_command(&disable("s1"));
        assert_eq!(f.inventory.origin_count(OriginState::Disabled), 1);
        assert_eq!(f.monitor.stop_calls("s1"), 1);
        assert_eq!(f.status("s1"), Some(-1.0));
        assert!(f.active_ids().is_empty());

        f.monitor.report(&s1, true);
        assert_eq!(f.inventory.origin_count(OriginState::Disabled), 1);

        f.inventory.on_command(&enable("s1"));
        assert_eq!(f.inventory.origin_count(OriginState::Inactive), 1);
        assert_eq!(f.monitor.monitor_calls("s1"), 2);
        assert!(f.active_ids().is_empty());

        f.monitor.report(&s1, true);
        assert_eq!(f.active_ids(), vec!["s1"]);
    }

    #[tokio::test]
    async fn commands_for_other_applications_are_ignored() {
        let f = Fixture::new();
        f.inventory.set_origins(vec![test_origin("shop", "s1", 8001)]).unwrap();
        let mut rx = f.inventory.subscribe();

        f.inventory
            .on_command(&OriginCommand::disable(AppId::new("other"), OriginId::new("s1")));

        assert_eq!(f.inventory.origin_count(OriginState::Active), 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn commands_arrive_over_the_bus() {
        let f = Fixture::new();
        f.inventory.set_origins(vec![test_origin("shop", "s1", 8001)]).unwrap();
        assert_eq!(f.bus.command_subscribers(), 1);

        f.bus.publish(disable("s1"));

        for _ in 0..100 {
            if f.inventory.origin_count(OriginState::Disabled) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(f.inventory.origin_count(OriginState::Disabled), 1);
    }

    #[tokio::test]
    async fn snapshot_command_republishes() {
        let f = Fixture::new();
        f.inventory.set_origins(vec![test_origin("shop", "s1", 8001)]).unwrap();
        let mut bus_snapshots = f.bus.subscribe_snapshots();

        f.inventory.on_command(&OriginCommand::GetOriginsInventorySnapshot);

        let snapshot = bus_snapshots.try_recv().unwrap();
        assert_eq!(snapshot.app_id.as_str(), "shop");
        assert_eq!(snapshot.origins(OriginState::Active).len(), 1);
    }

    #[tokio::test]
    async fn health_reports_are_ignored_without_a_probing_monitor() {
        let factory = Arc::new(FakeHostFactory::new());
        let inventory = OriginsInventory::new(
            AppId::new("shop"),
            Arc::new(NoOriginHealthStatusMonitor),
            factory,
            Arc::new(InMemoryMetrics::new()),
            OriginCommandBus::new(),
        );
        let s1 = test_origin("shop", "s1", 8001);
        inventory.set_origins(vec![s1.clone()]).unwrap();

        inventory.origin_unhealthy(&s1);

        assert_eq!(inventory.origin_count(OriginState::Active), 1);
    }

    #[tokio::test]
    async fn reconciliation_keeps_replaces_and_removes() {
        let f = Fixture::new();
        f.inventory
            .set_origins(vec![
                test_origin("shop", "keep", 8001),
                test_origin("shop", "move", 8002),
                test_origin("shop", "drop", 8003),
            ])
            .unwrap();
        let kept = f.factory.client("keep").unwrap();
        let moved = f.factory.client("move").unwrap();
        let dropped = f.factory.client("drop").unwrap();
        let mut rx = f.inventory.subscribe();

        f.inventory
            .set_origins(vec![
                test_origin("shop", "keep", 8001),
                test_origin("shop", "move", 9002),
                test_origin("shop", "new", 8004),
            ])
            .unwrap();

        assert!(!kept.was_closed());
        assert!(moved.was_closed());
        assert!(dropped.was_closed());
        assert_eq!(f.factory.clients("keep").len(), 1);
        assert_eq!(f.factory.clients("move").len(), 2);
        assert_eq!(f.monitor.stop_calls("drop"), 1);
        assert_eq!(f.active_ids(), vec!["keep", "move", "new"]);
        assert_eq!(rx.try_recv().unwrap().active.len(), 3);

        let port = f.inventory.origins().iter().find(|o| o.id().as_str() == "move").unwrap().port();
        assert_eq!(port, 9002);
    }

    #[tokio::test]
    async fn unchanged_origin_set_notifies_nothing() {
        let f = Fixture::new();
        let origins = vec![test_origin("shop", "s1", 8001)];
        f.inventory.set_origins(origins.clone()).unwrap();
        let mut rx = f.inventory.subscribe();

        f.inventory.set_origins(origins).unwrap();

        assert!(rx.try_recv().is_err());
        assert_eq!(f.factory.created(), 1);
    }

    #[tokio::test]
    async fn empty_origin_set_is_rejected() {
        let f = Fixture::new();
        assert_eq!(
            f.inventory.set_origins(Vec::new()),
            Err(InventoryError::EmptyOrigins {
                app_id: AppId::new("shop")
            })
        );
    }

    #[tokio::test]
    async fn nothing_changes_after_close() {
        let f = Fixture::new();
        let s1 = test_origin("shop", "s1", 8001);
        f.inventory.set_origins(vec![s1.clone()]).unwrap();
        let client = f.factory.client("s1").unwrap();

        f.inventory.close();

        assert!(client.was_closed());
        assert_eq!(f.monitor.stop_calls("s1"), 1);
        assert!(f.active_ids().is_empty());
        assert!(matches!(
            f.inventory.set_origins(vec![s1.clone()]),
            Err(InventoryError::Closed { .. })
        ));

        f.monitor.report(&s1, false);
        f.inventory.on_command(&disable("s1"));
        assert_eq!(f.inventory.origins().len(), 0);

        for _ in 0..100 {
            if f.bus.command_subscribers() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(f.bus.command_subscribers(), 0);
    }
}
