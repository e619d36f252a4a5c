//! Startup orchestration.
//!
//! # Responsibilities
//! - Build one origins inventory and one backend service client per
//!   configured application, in configuration order
//! - Start health monitoring for applications that ask for it
//! - Reconcile origin sets when the configuration file changes
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Applications added or removed at runtime need a restart; only origin
//!   sets are reconciled live

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use http::HeaderName;
use thiserror::Error;

use crate::client::{BackendService, BackendServiceClient, StickySessionConfig};
use crate::config::{BackendServiceConfig, ProxyConfig};
use crate::health::{HttpHealthCheckMonitor, NoOriginHealthStatusMonitor, OriginHealthStatusMonitor};
use crate::http::{RewriteRule, RewriteRules, ServiceRoute};
use crate::inventory::{InventoryError, OriginCommandBus, OriginsInventory};
use crate::lifecycle::Shutdown;
use crate::load_balancer::{build_load_balancer, ActiveOrigins};
use crate::observability::MetricsSink;
use crate::pool::HttpConnectionFactory;
use crate::resilience::{Backoff, RetryNTimes};
use crate::transport::PooledHostFactory;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("service {service}: invalid rewrite pattern '{pattern}': {source}")]
    InvalidRewrite {
        service: String,
        pattern: String,
        source: regex::Error,
    },

    #[error("service {service}: invalid origin id header '{header}'")]
    InvalidHeaderName { service: String, header: String },

    #[error(transparent)]
    Inventory(#[from] InventoryError),
}

/// The running pieces of one application.
pub struct ServiceHandle {
    pub config: BackendServiceConfig,
    pub inventory: Arc<OriginsInventory>,
    pub client: Arc<BackendServiceClient>,
}

/// Every application the proxy serves.
pub struct BackendServices {
    services: Vec<ServiceHandle>,
}

impl BackendServices {
    pub fn get(&self, id: &str) -> Option<&ServiceHandle> {
        self.services.iter().find(|s| s.config.id == id)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Routes for the inbound server.
    pub fn routes(&self) -> Vec<ServiceRoute> {
        self.services
            .iter()
            .map(|s| ServiceRoute::new(s.config.path_prefix.clone(), s.client.clone()))
            .collect()
    }

    /// Apply the origin sets of a reloaded configuration.
    pub fn reconcile(&self, config: &ProxyConfig) {
        let running: HashMap<&str, &ServiceHandle> =
            self.services.iter().map(|s| (s.config.id.as_str(), s)).collect();

        for service_config in &config.backend_services {
            let Some(handle) = running.get(service_config.id.as_str()) else {
                tracing::warn!(app_id = %service_config.id, "New application ignored until restart");
                continue;
            };
            match handle.inventory.set_origins(service_config.to_origins()) {
                Ok(()) => tracing::info!(
                    app_id = %service_config.id,
                    origins = service_config.origins.len(),
                    "Origins reconciled"
                ),
                Err(e) => tracing::error!(app_id = %service_config.id, error = %e, "Origin reconciliation failed"),
            }
        }

        for handle in &self.services {
            if !config.backend_services.iter().any(|s| s.id == handle.config.id) {
                tracing::warn!(app_id = %handle.config.id, "Application removed from configuration, still serving until restart");
            }
        }
    }

    /// Stop monitoring and close every origin's pool.
    pub fn close(&self) {
        for handle in &self.services {
            handle.inventory.close();
        }
    }
}

/// Build inventories and clients for every configured application.
pub fn build_services(
    config: &ProxyConfig,
    metrics: Arc<dyn MetricsSink>,
    shutdown: Arc<Shutdown>,
    bus: OriginCommandBus,
) -> Result<BackendServices, StartupError> {
    let mut services = Vec::with_capacity(config.backend_services.len());
    for service_config in &config.backend_services {
        let handle = build_service(service_config, metrics.clone(), shutdown.clone(), bus.clone())?;
        tracing::info!(
            app_id = %service_config.id,
            path_prefix = %service_config.path_prefix,
            origins = service_config.origins.len(),
            load_balancing = ?service_config.load_balancing,
            health_checks = service_config.health_check.is_some(),
            "Backend service ready"
        );
        services.push(handle);
    }
    Ok(BackendServices { services })
}

fn build_service(
    config: &BackendServiceConfig,
    metrics: Arc<dyn MetricsSink>,
    shutdown: Arc<Shutdown>,
    bus: OriginCommandBus,
) -> Result<ServiceHandle, StartupError> {
    let app_id = config.app_id();
    let service = backend_service(config)?;

    let host_factory = Arc::new(PooledHostFactory::new(
        Arc::new(HttpConnectionFactory::new()),
        config.connection_pool.to_settings(),
        config.response_timeout(),
        metrics.clone(),
    ));
    let monitor: Arc<dyn OriginHealthStatusMonitor> = match &config.health_check {
        Some(health_check) => Arc::new(HttpHealthCheckMonitor::new(health_check.to_settings(), shutdown)),
        None => Arc::new(NoOriginHealthStatusMonitor),
    };

    let inventory = OriginsInventory::new(app_id, monitor, host_factory, metrics.clone(), bus);
    inventory.set_origins(config.to_origins())?;

    let active: Arc<dyn ActiveOrigins> = inventory.clone();
    let load_balancer = build_load_balancer(
        config.load_balancing,
        active,
        config.sticky_session.enabled,
        config.origin_restriction_cookie.is_some(),
    );
    let retry_policy = RetryNTimes::new(config.retry.policy_attempts)
        .with_backoff(Backoff::new(config.retry.base_delay_ms, config.retry.max_delay_ms));

    let client = BackendServiceClient::new(service, load_balancer, Arc::new(retry_policy), metrics);

    Ok(ServiceHandle {
        config: config.clone(),
        inventory,
        client: Arc::new(client),
    })
}

fn backend_service(config: &BackendServiceConfig) -> Result<BackendService, StartupError> {
    let rules = config
        .rewrites
        .iter()
        .map(|r| {
            RewriteRule::new(&r.url_pattern, r.replacement.clone()).map_err(|source| StartupError::InvalidRewrite {
                service: config.id.clone(),
                pattern: r.url_pattern.clone(),
                source,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let origin_id_header =
        HeaderName::from_bytes(config.origin_id_header.as_bytes()).map_err(|_| StartupError::InvalidHeaderName {
            service: config.id.clone(),
            header: config.origin_id_header.clone(),
        })?;

    let mut service = BackendService::new(config.app_id());
    service.sticky_session = StickySessionConfig {
        enabled: config.sticky_session.enabled,
        timeout: Duration::from_secs(config.sticky_session.timeout_seconds),
    };
    service.origin_restriction_cookie = config.origin_restriction_cookie.clone();
    service.origin_id_header = origin_id_header;
    service.override_host_header = config.override_host_header;
    service.rewrites = RewriteRules::new(rules);
    service.max_attempts = config.retry.max_attempts;
    service.max_request_body_bytes = config.max_request_body_bytes;
    Ok(service)
}
