//! Health-status monitor contract.

use std::sync::Weak;

use crate::origin::Origin;

/// Receives health verdicts for monitored origins.
pub trait OriginHealthListener: Send + Sync {
    fn origin_healthy(&self, origin: &Origin);
    fn origin_unhealthy(&self, origin: &Origin);
}

/// Watches origins and reports their health to listeners.
pub trait OriginHealthStatusMonitor: Send + Sync {
    fn monitor(&self, origins: &[Origin]);

    fn stop_monitoring(&self, origins: &[Origin]);

    /// Listeners are held weakly; a dropped listener stops receiving reports.
    fn add_listener(&self, listener: Weak<dyn OriginHealthListener>);

    /// False for a monitor that never probes, whose origins must stay active.
    fn is_probing(&self) -> bool {
        true
    }
}

/// Monitor used when health checks are not configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOriginHealthStatusMonitor;

impl OriginHealthStatusMonitor for NoOriginHealthStatusMonitor {
    fn monitor(&self, _origins: &[Origin]) {}

    fn stop_monitoring(&self, _origins: &[Origin]) {}

    fn add_listener(&self, _listener: Weak<dyn OriginHealthListener>) {}

    fn is_probing(&self) -> bool {
        false
    }
}
