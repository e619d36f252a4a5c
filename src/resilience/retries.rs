//! Retry policies.
//!
//! # Responsibilities
//! - Decide whether a failed attempt may be retried
//! - Name the origin the load balancer would offer next
//! - Supply the delay to wait before the next attempt
//!
//! # Design Decisions
//! - A missing error means the load balancer found no host; that is worth
//!   another look since the active set may have changed
//! - Errors that would fail the same way on any origin are never retried

use std::time::Duration;

use crate::load_balancer::{LoadBalancer, Preferences, RemoteHost};
use crate::origin::AppId;
use crate::resilience::Backoff;
use crate::transport::TransportError;

/// State of one logical request across its attempts.
#[derive(Debug)]
pub struct RetryContext<'a> {
    pub app_id: &'a AppId,
    /// Failed attempts so far, including the one being evaluated.
    pub retry_count: u32,
    /// `None` when the attempt failed because no host was available.
    pub last_error: Option<&'a TransportError>,
    pub previous_origins: &'a [RemoteHost],
}

impl RetryContext<'_> {
    fn last_error_retryable(&self) -> bool {
        self.last_error.map_or(true, TransportError::is_retryable)
    }
}

/// Verdict of a retry policy.
#[derive(Debug, Clone)]
pub struct RetryOutcome {
    pub should_retry: bool,
    pub next_origin: Option<RemoteHost>,
    pub delay: Duration,
}

impl RetryOutcome {
    pub fn stop() -> Self {
        Self {
            should_retry: false,
            next_origin: None,
            delay: Duration::ZERO,
        }
    }
}

pub trait RetryPolicy: Send + Sync {
    fn evaluate(
        &self,
        context: &RetryContext<'_>,
        load_balancer: &dyn LoadBalancer,
        preferences: &Preferences,
    ) -> RetryOutcome;
}

fn next_origin(
    context: &RetryContext<'_>,
    load_balancer: &dyn LoadBalancer,
    preferences: &Preferences,
) -> Option<RemoteHost> {
    let mut avoiding = preferences.clone();
    for host in context.previous_origins {
        if !avoiding.avoids(host.id()) {
            avoiding.avoid_origins.push(host.id().clone());
        }
    }
    load_balancer
        .choose(&avoiding)
        .filter(|host| !context.previous_origins.iter().any(|prev| prev.id() == host.id()))
}

/// Retries retryable failures until `max_attempts` attempts have been made.
///
/// `RetryNTimes::new(1)` never retries; `RetryNTimes::new(3)` allows the
/// first attempt plus two retries.
#[derive(Debug, Clone)]
pub struct RetryNTimes {
    max_attempts: u32,
    backoff: Backoff,
}

impl RetryNTimes {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::none(),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl RetryPolicy for RetryNTimes {
    fn evaluate(
        &self,
        context: &RetryContext<'_>,
        load_balancer: &dyn LoadBalancer,
        preferences: &Preferences,
    ) -> RetryOutcome {
        let should_retry = context.retry_count < self.max_attempts && context.last_error_retryable();
        if !should_retry {
            return RetryOutcome::stop();
        }
        RetryOutcome {
            should_retry,
            next_origin: next_origin(context, load_balancer, preferences),
            delay: self.backoff.delay(context.retry_count),
        }
    }
}

/// Authorizes every retryable failure; only the client's attempt ceiling stops it.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysRetry;

impl RetryPolicy for AlwaysRetry {
    fn evaluate(
        &self,
        context: &RetryContext<'_>,
        load_balancer: &dyn LoadBalancer,
        preferences: &Preferences,
    ) -> RetryOutcome {
        if !context.last_error_retryable() {
            return RetryOutcome::stop();
        }
        RetryOutcome {
            should_retry: true,
            next_origin: next_origin(context, load_balancer, preferences),
            delay: Duration::ZERO,
        }
    }
}
