//! Request dispatch to one origin over its connection pool.
//!
//! # Responsibilities
//! - Borrow a connection and write the request
//! - Bound the wait for response headers with the response timeout
//! - Close the connection on every pre-header failure or cancellation
//! - Tie the connection's return to the response body's terminal event
//! - Count in-flight requests for least-requests load balancing
//! - Record per-origin latency and status metrics

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use http::HeaderValue;
use tracing::{debug, warn};

use crate::http::{ensure_host_header, LiveRequest, LiveResponse, RequestContext, ServedBy, X_REQUEST_ID};
use crate::observability::metrics::MetricsSink;
use crate::origin::Origin;
use crate::pool::{ConnectionFactory, ConnectionPool, ConnectionPoolSettings, SimpleConnectionPool};
use crate::transport::{ConnectionLease, HostClient, HostClientFactory, TransportError};

/// Sends requests to a single origin.
pub struct HostHttpClient {
    origin: Origin,
    pool: Arc<dyn ConnectionPool>,
    response_timeout: Duration,
    ongoing: Arc<AtomicUsize>,
    metrics: Arc<dyn MetricsSink>,
}

impl HostHttpClient {
    pub fn new(pool: Arc<dyn ConnectionPool>, response_timeout: Duration, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            origin: pool.origin().clone(),
            pool,
            response_timeout,
            ongoing: Arc::new(AtomicUsize::new(0)),
            metrics,
        }
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn pool(&self) -> &Arc<dyn ConnectionPool> {
        &self.pool
    }
}

impl HostClient for HostHttpClient {
    fn send_request(
        &self,
        mut request: LiveRequest,
        context: &RequestContext,
    ) -> BoxFuture<'static, Result<LiveResponse, TransportError>> {
        ensure_host_header(&mut request, &self.origin.host_and_port());
        if !request.headers().contains_key(X_REQUEST_ID) {
            if let Ok(value) = HeaderValue::from_str(&context.request_id.to_string()) {
                request.headers_mut().insert(X_REQUEST_ID, value);
            }
        }

        let ongoing = Arc::new(OngoingRequest::start(self.ongoing.clone()));
        let pool = self.pool.clone();
        let origin = self.origin.clone();
        let response_timeout = self.response_timeout;
        let metrics = self.metrics.clone();
        let request_id = context.request_id;

        Box::pin(async move {
            let borrowed = pool.borrow_connection().await?;
            let connection = borrowed.connection().clone();
            let lease = Arc::new(ConnectionLease::new(pool, borrowed));
            let started = Instant::now();

            let response = match tokio::time::timeout(response_timeout, connection.write(request)).await {
                Ok(Ok(Some(response))) => response,
                Ok(Ok(None)) => {
                    lease.abandon();
                    warn!(request_id = %request_id, origin = %origin, "Origin closed the exchange without a response");
                    return Err(TransportError::NoResponse {
                        origin: origin.id().clone(),
                    });
                }
                Ok(Err(e)) => {
                    lease.abandon();
                    warn!(request_id = %request_id, origin = %origin, error = %e, "Request to origin failed");
                    return Err(e);
                }
                Err(_) => {
                    lease.abandon();
                    warn!(
                        request_id = %request_id,
                        origin = %origin,
                        timeout_ms = response_timeout.as_millis() as u64,
                        "Timed out waiting for response headers"
                    );
                    return Err(TransportError::ResponseTimeout {
                        origin: origin.id().clone(),
                        timeout_ms: response_timeout.as_millis() as u64,
                    });
                }
            };

            let labels = [
                ("app_id", origin.app_id().to_string()),
                ("origin_id", origin.id().to_string()),
            ];
            metrics.record_duration("origin_request_latency_seconds", &labels, started.elapsed());
            metrics.increment_counter(
                "origins_response_total",
                &[
                    ("app_id", origin.app_id().to_string()),
                    ("origin_id", origin.id().to_string()),
                    ("status", response.status().as_u16().to_string()),
                ],
            );
            debug!(
                request_id = %request_id,
                origin = %origin,
                status = response.status().as_u16(),
                "Response headers received"
            );

            let (mut parts, body) = response.into_parts();
            parts.extensions.insert(ServedBy(origin.id().clone()));

            let on_end = lease.clone();
            let end_guard = ongoing.clone();
            let body = body
                .do_on_end(move |_| {
                    on_end.release();
                    drop(end_guard);
                })
                .do_on_cancel(move || {
                    lease.abandon();
                    drop(ongoing);
                });

            Ok(LiveResponse::from_parts(parts, body))
        })
    }

    fn load_balancing_metric(&self) -> usize {
        self.ongoing.load(Ordering::Relaxed)
    }

    fn close(&self) {
        self.pool.close();
    }
}

/// Counts one in-flight request for as long as it lives.
#[derive(Debug)]
struct OngoingRequest {
    counter: Arc<AtomicUsize>,
}

impl OngoingRequest {
    fn start(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self { counter }
    }
}

impl Drop for OngoingRequest {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Builds a pooled [`HostHttpClient`] for each origin.
pub struct PooledHostFactory {
    connection_factory: Arc<dyn ConnectionFactory>,
    pool_settings: ConnectionPoolSettings,
    response_timeout: Duration,
    metrics: Arc<dyn MetricsSink>,
}

impl PooledHostFactory {
    pub fn new(
        connection_factory: Arc<dyn ConnectionFactory>,
        pool_settings: ConnectionPoolSettings,
        response_timeout: Duration,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            connection_factory,
            pool_settings,
            response_timeout,
            metrics,
        }
    }
}

impl HostClientFactory for PooledHostFactory {
    fn create_host_client(&self, origin: &Origin) -> Arc<dyn HostClient> {
        let pool = SimpleConnectionPool::new(
            origin.clone(),
            self.pool_settings.clone(),
            self.connection_factory.clone(),
        )
        .with_metrics(self.metrics.clone());
        Arc::new(HostHttpClient::new(
            Arc::new(pool),
            self.response_timeout,
            self.metrics.clone(),
        ))
    }
}
