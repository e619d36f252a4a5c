//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::health::HealthCheckSettings;
use crate::load_balancer::LoadBalancingStrategy;
use crate::origin::{AppId, Origin, OriginId, TlsSettings};
use crate::pool::ConnectionPoolSettings;

/// Root configuration for the reverse proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Applications and their origins.
    pub backend_services: Vec<BackendServiceConfig>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// One application: its origins and the policies used to reach them.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendServiceConfig {
    /// Application id.
    pub id: String,

    /// Requests whose path starts with this prefix go to this service.
    pub path_prefix: String,

    pub origins: Vec<OriginConfig>,

    pub connection_pool: ConnectionPoolConfig,

    /// Time allowed between writing a request and receiving response headers.
    pub response_timeout_ms: u64,

    pub sticky_session: StickySessionSettings,

    /// Cookie carrying origin restriction patterns.
    pub origin_restriction_cookie: Option<String>,

    /// Response header naming the origin that served the request.
    pub origin_id_header: String,

    pub retry: RetryConfig,

    pub load_balancing: LoadBalancingStrategy,

    /// Active health checks; absent means origins are never probed.
    pub health_check: Option<HealthCheckConfig>,

    /// Rewrite the Host header to the chosen origin.
    pub override_host_header: bool,

    pub rewrites: Vec<RewriteConfig>,

    /// Largest request body buffered for replay across attempts.
    pub max_request_body_bytes: usize,
}

impl Default for BackendServiceConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            path_prefix: "/".to_string(),
            origins: Vec::new(),
            connection_pool: ConnectionPoolConfig::default(),
            response_timeout_ms: 1000,
            sticky_session: StickySessionSettings::default(),
            origin_restriction_cookie: None,
            origin_id_header: "X-Origin-Id".to_string(),
            retry: RetryConfig::default(),
            load_balancing: LoadBalancingStrategy::default(),
            health_check: None,
            override_host_header: false,
            rewrites: Vec::new(),
            max_request_body_bytes: 1024 * 1024,
        }
    }
}

impl BackendServiceConfig {
    pub fn app_id(&self) -> AppId {
        AppId::new(self.id.clone())
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    /// Configured origins bound to this application.
    pub fn to_origins(&self) -> Vec<Origin> {
        let app_id = self.app_id();
        self.origins
            .iter()
            .map(|o| {
                let origin = Origin::new(app_id.clone(), OriginId::new(o.id.clone()), o.host.clone(), o.port);
                match &o.tls {
                    Some(tls) => origin.with_tls(tls.clone()),
                    None => origin,
                }
            })
            .collect()
    }
}

/// Origin server address.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OriginConfig {
    pub id: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub tls: Option<TlsSettings>,
}

/// Connection pool sizing per origin.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionPoolConfig {
    pub max_connections_per_host: usize,
    pub max_pending_connections_per_host: usize,
    pub connect_timeout_ms: u64,
    pub pending_connection_timeout_ms: u64,
    /// Idle connections older than this are closed instead of reused.
    pub max_idle_time_ms: Option<u64>,
}

impl Default for ConnectionPoolConfig {
    fn default() -> Self {
        Self {
            max_connections_per_host: 50,
            max_pending_connections_per_host: 25,
            connect_timeout_ms: 2000,
            pending_connection_timeout_ms: 2000,
            max_idle_time_ms: None,
        }
    }
}

impl ConnectionPoolConfig {
    pub fn to_settings(&self) -> ConnectionPoolSettings {
        ConnectionPoolSettings {
            max_connections_per_host: self.max_connections_per_host,
            max_pending_connections_per_host: self.max_pending_connections_per_host,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            pending_connection_timeout: Duration::from_millis(self.pending_connection_timeout_ms),
            max_idle_time: self.max_idle_time_ms.map(Duration::from_millis),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StickySessionSettings {
    pub enabled: bool,
    pub timeout_seconds: u64,
}

impl Default for StickySessionSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout_seconds: 43200,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts the retry policy authorizes, the first one included.
    pub policy_attempts: u32,

    /// Hard ceiling on attempts per request, whatever the policy says.
    pub max_attempts: u32,

    /// Base delay between attempts; 0 retries immediately.
    pub base_delay_ms: u64,

    /// Maximum delay between attempts.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            policy_attempts: 3,
            max_attempts: 3,
            base_delay_ms: 0,
            max_delay_ms: 1000,
        }
    }
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Path to probe.
    pub uri: String,

    pub interval_ms: u64,

    pub timeout_ms: u64,

    /// Consecutive successes before an origin is reported healthy.
    pub healthy_threshold: u32,

    /// Consecutive failures before an origin is reported unhealthy.
    pub unhealthy_threshold: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            uri: "/".to_string(),
            interval_ms: 5000,
            timeout_ms: 2000,
            healthy_threshold: 2,
            unhealthy_threshold: 2,
        }
    }
}

impl HealthCheckConfig {
    pub fn to_settings(&self) -> HealthCheckSettings {
        HealthCheckSettings {
            uri: self.uri.clone(),
            interval: Duration::from_millis(self.interval_ms),
            timeout: Duration::from_millis(self.timeout_ms),
            healthy_threshold: self.healthy_threshold,
            unhealthy_threshold: self.unhealthy_threshold,
        }
    }
}

/// URL rewrite rule.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RewriteConfig {
    pub url_pattern: String,
    pub replacement: String,
}
