//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Unique application ids and unique origin ids per application
//! - Validate value ranges (limits > 0, at least one attempt)
//! - Reject rewrite and restriction settings that cannot work
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;

use http::header::HeaderName;
use regex::Regex;
use thiserror::Error;

use crate::config::schema::{BackendServiceConfig, ProxyConfig};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("backend service id must not be empty")]
    EmptyServiceId,

    #[error("duplicate backend service id '{0}'")]
    DuplicateServiceId(String),

    #[error("backend service '{0}' has no origins")]
    NoOrigins(String),

    #[error("backend service '{service}' has duplicate origin id '{origin}'")]
    DuplicateOriginId { service: String, origin: String },

    #[error("backend service '{service}': {field} must be greater than zero")]
    NotPositive { service: String, field: &'static str },

    #[error("backend service '{service}': invalid rewrite pattern '{pattern}'")]
    InvalidRewrite { service: String, pattern: String },

    #[error("backend service '{service}': invalid header name '{header}'")]
    InvalidHeaderName { service: String, header: String },

    #[error("backend service '{service}': path prefix '{prefix}' must start with '/'")]
    InvalidPathPrefix { service: String, prefix: String },
}

/// Validate the whole configuration, collecting every problem found.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let mut ids = HashSet::new();

    for service in &config.backend_services {
        if service.id.is_empty() {
            errors.push(ValidationError::EmptyServiceId);
        } else if !ids.insert(service.id.as_str()) {
            errors.push(ValidationError::DuplicateServiceId(service.id.clone()));
        }
        validate_service(service, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_service(service: &BackendServiceConfig, errors: &mut Vec<ValidationError>) {
    let name = service.id.clone();

    if service.origins.is_empty() {
        errors.push(ValidationError::NoOrigins(name.clone()));
    }
    let mut origin_ids = HashSet::new();
    for origin in &service.origins {
        if !origin_ids.insert(origin.id.as_str()) {
            errors.push(ValidationError::DuplicateOriginId {
                service: name.clone(),
                origin: origin.id.clone(),
            });
        }
    }

    if !service.path_prefix.starts_with('/') {
        errors.push(ValidationError::InvalidPathPrefix {
            service: name.clone(),
            prefix: service.path_prefix.clone(),
        });
    }

    let pool = &service.connection_pool;
    let positive = [
        ("max_connections_per_host", pool.max_connections_per_host as u64),
        ("connect_timeout_ms", pool.connect_timeout_ms),
        ("pending_connection_timeout_ms", pool.pending_connection_timeout_ms),
        ("response_timeout_ms", service.response_timeout_ms),
        ("retry.max_attempts", service.retry.max_attempts as u64),
        ("max_request_body_bytes", service.max_request_body_bytes as u64),
    ];
    for (field, value) in positive {
        if value == 0 {
            errors.push(ValidationError::NotPositive {
                service: name.clone(),
                field,
            });
        }
    }
    if let Some(health) = &service.health_check {
        if health.interval_ms == 0 {
            errors.push(ValidationError::NotPositive {
                service: name.clone(),
                field: "health_check.interval_ms",
            });
        }
    }

    for rewrite in &service.rewrites {
        if Regex::new(&rewrite.url_pattern).is_err() {
            errors.push(ValidationError::InvalidRewrite {
                service: name.clone(),
                pattern: rewrite.url_pattern.clone(),
            });
        }
    }

    if HeaderName::from_bytes(service.origin_id_header.as_bytes()).is_err() {
        errors.push(ValidationError::InvalidHeaderName {
            service: name,
            header: service.origin_id_header.clone(),
        });
    }
}
