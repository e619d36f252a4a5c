//! Origin selection and bounded retry for one backend service.
//!
//! # Responsibilities
//! - Turn one inbound request into exactly one response or one error
//! - Derive the load-balancing preference from request cookies
//! - Retry pre-header failures on other origins under a retry policy
//! - Enforce a hard attempt ceiling independent of the policy
//! - Decorate responses (sticky cookie, origin id header, body sanitising)
//! - Count cancelled requests per application and origin

use std::sync::Arc;
use std::time::Duration;

use http::header::{HeaderName, SET_COOKIE};
use http::{HeaderMap, HeaderValue, Method, Request, Uri, Version};
use tracing::{debug, error, warn};

use crate::client::ClientError;
use crate::http::{
    is_bodiless, override_host_header, remove_body, remove_conflicting_content_length, request_cookie,
    sticky_cookie_name, sticky_set_cookie, LiveRequest, LiveResponse, RequestContext, RewriteRules, ServedBy,
};
use crate::load_balancer::{LoadBalancer, Preferences, RemoteHost};
use crate::observability::metrics::MetricsSink;
use crate::origin::{AppId, OriginId};
use crate::resilience::{RetryContext, RetryPolicy};
use crate::stream::{Buffer, ByteStream};

/// Default response header naming the origin that served the request.
pub const ORIGIN_ID_HEADER: &str = "x-origin-id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StickySessionConfig {
    pub enabled: bool,
    pub timeout: Duration,
}

impl Default for StickySessionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout: Duration::from_secs(12 * 60 * 60),
        }
    }
}

/// Static settings of one backend service.
#[derive(Debug, Clone)]
pub struct BackendService {
    pub app_id: AppId,
    pub sticky_session: StickySessionConfig,
    pub origin_restriction_cookie: Option<String>,
    pub origin_id_header: HeaderName,
    pub override_host_header: bool,
    pub rewrites: RewriteRules,
    pub max_attempts: u32,
    pub max_request_body_bytes: usize,
}

impl BackendService {
    pub fn new(app_id: AppId) -> Self {
        Self {
            app_id,
            sticky_session: StickySessionConfig::default(),
            origin_restriction_cookie: None,
            origin_id_header: HeaderName::from_static(ORIGIN_ID_HEADER),
            override_host_header: false,
            rewrites: RewriteRules::default(),
            max_attempts: 3,
            max_request_body_bytes: 1024 * 1024,
        }
    }
}

pub struct BackendServiceClient {
    service: BackendService,
    load_balancer: Arc<dyn LoadBalancer>,
    retry_policy: Arc<dyn RetryPolicy>,
    metrics: Arc<dyn MetricsSink>,
}

impl BackendServiceClient {
    pub fn new(
        service: BackendService,
        load_balancer: Arc<dyn LoadBalancer>,
        retry_policy: Arc<dyn RetryPolicy>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            service,
            load_balancer,
            retry_policy,
            metrics,
        }
    }

    pub fn app_id(&self) -> &AppId {
        &self.service.app_id
    }

    pub fn service(&self) -> &BackendService {
        &self.service
    }

    /// Dispatch `request` to one of the service's origins.
    pub async fn send_request(&self, request: LiveRequest, context: &RequestContext) -> Result<LiveResponse, ClientError> {
        let app_id = &self.service.app_id;
        let mut cancelled = CancellationGuard::new(app_id.clone(), self.metrics.clone());

        let (parts, body) = request.into_parts();
        let content = match body.aggregate(self.service.max_request_body_bytes).await {
            Ok(content) => content,
            Err(e) => {
                cancelled.disarm();
                error!(request_id = %context.request_id, app_id = %app_id, error = %e, "Request content rejected");
                return Err(ClientError::Content(e));
            }
        };
        let mut template = RequestTemplate {
            method: parts.method,
            uri: parts.uri,
            version: parts.version,
            headers: parts.headers,
            content,
        };
        self.rewrite(&mut template, context);

        let preferred_origins = self.preferred_origins(&template.headers);
        let mut previous: Vec<RemoteHost> = Vec::new();
        let mut attempt: u32 = 0;
        let mut next_host: Option<RemoteHost> = None;

        loop {
            if attempt >= self.service.max_attempts {
                cancelled.disarm();
                error!(
                    request_id = %context.request_id,
                    app_id = %app_id,
                    attempts = attempt,
                    "Retry ceiling reached, no hosts available"
                );
                return Err(ClientError::NoAvailableHosts { app_id: app_id.clone() });
            }

            let preferences = Preferences {
                preferred_origins: preferred_origins.clone(),
                avoid_origins: origin_ids(&previous),
            };

            // The retry policy's pick stands in for a fresh choice.
            let chosen = next_host
                .take()
                .filter(|host| !preferences.avoids(host.id()))
                .or_else(|| self.load_balancer.choose(&preferences));
            let failure = match chosen {
                Some(host) => {
                    cancelled.attempting(host.id().clone());
                    let mut request = template.build();
                    if self.service.override_host_header {
                        override_host_header(&mut request, &host.origin().host_and_port());
                    }
                    let result = host.client().send_request(request, context).await;
                    previous.push(host.clone());
                    match result {
                        Ok(response) => {
                            cancelled.disarm();
                            return Ok(self.finish_response(&template.method, &host, response));
                        }
                        Err(e) => {
                            warn!(
                                request_id = %context.request_id,
                                app_id = %app_id,
                                origin_id = %host.id(),
                                attempt = attempt + 1,
                                error = %e,
                                "Attempt failed before response headers"
                            );
                            Some(e)
                        }
                    }
                }
                None => None,
            };

            attempt += 1;
            let retry_context = RetryContext {
                app_id,
                retry_count: attempt,
                last_error: failure.as_ref(),
                previous_origins: &previous,
            };
            // Cookie preferences still bind the origin the policy names.
            let retry_preferences = Preferences {
                preferred_origins: preferred_origins.clone(),
                avoid_origins: origin_ids(&previous),
            };
            let outcome = self
                .retry_policy
                .evaluate(&retry_context, self.load_balancer.as_ref(), &retry_preferences);

            if !outcome.should_retry {
                cancelled.disarm();
                let error = match failure {
                    Some(e) => ClientError::Transport(e),
                    None => ClientError::NoAvailableHosts { app_id: app_id.clone() },
                };
                error!(request_id = %context.request_id, app_id = %app_id, error = %error, "Request failed");
                return Err(error);
            }

            debug!(
                request_id = %context.request_id,
                app_id = %app_id,
                next_origin = ?outcome.next_origin.as_ref().map(|h| h.id().to_string()),
                delay_ms = outcome.delay.as_millis() as u64,
                "Retrying request"
            );
            if !outcome.delay.is_zero() {
                tokio::time::sleep(outcome.delay).await;
            }
            next_host = outcome.next_origin;
        }
    }

    fn rewrite(&self, template: &mut RequestTemplate, context: &RequestContext) {
        let Some(path_and_query) = template.uri.path_and_query().map(|pq| pq.as_str().to_string()) else {
            return;
        };
        let Some(rewritten) = self.service.rewrites.rewrite(&path_and_query) else {
            return;
        };
        match rewritten.parse::<Uri>() {
            Ok(uri) => template.uri = uri,
            Err(e) => warn!(
                request_id = %context.request_id,
                rewritten = %rewritten,
                error = %e,
                "Ignoring rewrite that produced an invalid URI"
            ),
        }
    }

    fn preferred_origins(&self, headers: &HeaderMap) -> Option<String> {
        self.service
            .origin_restriction_cookie
            .as_deref()
            .and_then(|name| request_cookie(headers, name))
            .or_else(|| request_cookie(headers, &sticky_cookie_name(&self.service.app_id)))
    }

    fn finish_response(&self, method: &Method, host: &RemoteHost, response: LiveResponse) -> LiveResponse {
        let status = response.status();
        if status.as_u16() >= 400 {
            self.metrics.increment_counter(
                "origins_response_status_total",
                &[
                    ("app_id", self.service.app_id.to_string()),
                    ("status", status.as_u16().to_string()),
                ],
            );
        }

        let mut response = if is_bodiless(method, status) {
            remove_body(response)
        } else {
            response
        };
        response = remove_conflicting_content_length(response);

        if self.service.sticky_session.enabled {
            if let Some(cookie) = sticky_set_cookie(&self.service.app_id, host.id(), self.service.sticky_session.timeout) {
                response.headers_mut().append(SET_COOKIE, cookie);
            }
        }
        if let Ok(value) = HeaderValue::from_str(host.id().as_str()) {
            response.headers_mut().insert(self.service.origin_id_header.clone(), value);
        }
        response.extensions_mut().insert(ServedBy(host.id().clone()));
        response
    }
}

fn origin_ids(hosts: &[RemoteHost]) -> Vec<OriginId> {
    hosts.iter().map(|h| h.id().clone()).collect()
}

/// Request head plus buffered content, rebuilt for every attempt.
struct RequestTemplate {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    content: Buffer,
}

impl RequestTemplate {
    fn build(&self) -> LiveRequest {
        let body = if self.content.is_empty() {
            ByteStream::empty()
        } else {
            ByteStream::from_buffers(vec![self.content.retain()])
        };
        let mut request = Request::new(body);
        *request.method_mut() = self.method.clone();
        *request.uri_mut() = self.uri.clone();
        *request.version_mut() = self.version;
        *request.headers_mut() = self.headers.clone();
        request
    }
}

/// Counts the request as cancelled if dropped before an outcome.
struct CancellationGuard {
    app_id: AppId,
    origin: Option<OriginId>,
    metrics: Arc<dyn MetricsSink>,
    armed: bool,
}

impl CancellationGuard {
    fn new(app_id: AppId, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            app_id,
            origin: None,
            metrics,
            armed: true,
        }
    }

    fn attempting(&mut self, origin: OriginId) {
        self.origin = Some(origin);
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CancellationGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.metrics
            .increment_counter("origins_requests_cancelled_total", &[("app_id", self.app_id.to_string())]);
        if let Some(origin) = &self.origin {
            self.metrics.increment_counter(
                "origins_requests_cancelled_total",
                &[("app_id", self.app_id.to_string()), ("origin_id", origin.to_string())],
            );
        }
        debug!(app_id = %self.app_id, origin_id = ?self.origin.as_ref().map(|o| o.to_string()), "Request cancelled");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::atomic::{AtomicU32, Ordering};

    use futures_util::StreamExt;
    use http::header::{CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
    use http::StatusCode;

    use crate::client::ClientError;
    use crate::http::{served_by, RewriteRule};
    use crate::load_balancer::{ActiveOrigins, RoundRobin, StaticOrigins};
    use crate::observability::InMemoryMetrics;
    use crate::resilience::{AlwaysRetry, RetryNTimes, RetryOutcome};
    use crate::stream::StreamError;
    use crate::testing::{fake_host, FakeHostClient, HostBehaviour};
    use crate::transport::TransportError;

    struct Fixture {
        hosts: Vec<(RemoteHost, Arc<FakeHostClient>)>,
        metrics: Arc<InMemoryMetrics>,
    }

    impl Fixture {
        fn new(behaviours: Vec<(&str, HostBehaviour)>) -> Self {
            Self {
                hosts: behaviours
                    .into_iter()
                    .map(|(id, behaviour)| fake_host("shop", id, behaviour))
                    .collect(),
                metrics: Arc::new(InMemoryMetrics::new()),
            }
        }

        fn client_with(&self, service: BackendService, policy: Arc<dyn RetryPolicy>) -> BackendServiceClient {
            let origins: Arc<dyn ActiveOrigins> =
                Arc::new(StaticOrigins::new(self.hosts.iter().map(|(h, _)| h.clone()).collect()));
            BackendServiceClient::new(service, Arc::new(RoundRobin::new(origins)), policy, self.metrics.clone())
        }

        fn client(&self, policy: Arc<dyn RetryPolicy>) -> BackendServiceClient {
            self.client_with(BackendService::new(AppId::new("shop")), policy)
        }

        fn calls(&self, i: usize) -> usize {
            self.hosts[i].1.calls()
        }
    }

    fn get(uri: &str) -> LiveRequest {
        Request::builder().uri(uri).body(ByteStream::empty()).unwrap()
    }

    async fn body_text(response: LiveResponse) -> String {
        let mut body = response.into_body();
        let mut text = Vec::new();
        while let Some(chunk) = body.next().await {
            text.extend_from_slice(chunk.unwrap().content());
        }
        String::from_utf8(text).unwrap()
    }

    #[tokio::test]
    async fn returns_first_successful_response() {
        let fixture = Fixture::new(vec![("s1", HostBehaviour::status(200)), ("s2", HostBehaviour::status(200))]);
        let client = fixture.client(Arc::new(RetryNTimes::new(2)));

        let response = client.send_request(get("/"), &RequestContext::new()).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[ORIGIN_ID_HEADER], "s1");
        assert_eq!(served_by(&response).unwrap().as_str(), "s1");
        assert_eq!(fixture.calls(1), 0);
    }

    #[tokio::test]
    async fn fails_over_to_next_origin() {
        let fixture = Fixture::new(vec![("s1", HostBehaviour::Fail), ("s2", HostBehaviour::status(200))]);
        let client = fixture.client(Arc::new(RetryNTimes::new(2)));

        let response = client.send_request(get("/"), &RequestContext::new()).await.unwrap();

        assert_eq!(response.headers()[ORIGIN_ID_HEADER], "s2");
        assert_eq!(fixture.calls(0), 1);
        assert_eq!(fixture.calls(1), 1);
    }

    #[tokio::test]
    async fn error_statuses_are_not_retried() {
        let fixture = Fixture::new(vec![("s1", HostBehaviour::status(503)), ("s2", HostBehaviour::status(200))]);
        let client = fixture.client(Arc::new(AlwaysRetry));

        let response = client.send_request(get("/"), &RequestContext::new()).await.unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(fixture.calls(1), 0);
        assert_eq!(
            fixture
                .metrics
                .counter("origins_response_status_total", &[("app_id", "shop"), ("status", "503")]),
            1
        );
    }

    #[tokio::test]
    async fn attempt_ceiling_stops_an_always_retrying_policy() {
        let fixture = Fixture::new(vec![
            ("s1", HostBehaviour::Fail),
            ("s2", HostBehaviour::Fail),
            ("s3", HostBehaviour::Fail),
            ("s4", HostBehaviour::status(200)),
        ]);
        let client = fixture.client(Arc::new(AlwaysRetry));

        let error = client.send_request(get("/"), &RequestContext::new()).await.unwrap_err();

        assert!(matches!(error, ClientError::NoAvailableHosts { ref app_id } if app_id.as_str() == "shop"));
        assert_eq!(fixture.calls(0) + fixture.calls(1) + fixture.calls(2), 3);
        assert_eq!(fixture.calls(3), 0);
    }

    #[tokio::test]
    async fn declined_retry_surfaces_last_failure() {
        let fixture = Fixture::new(vec![
            ("s1", HostBehaviour::Fail),
            ("s2", HostBehaviour::Fail),
            ("s3", HostBehaviour::status(200)),
        ]);
        let client = fixture.client(Arc::new(RetryNTimes::new(2)));

        let error = client.send_request(get("/"), &RequestContext::new()).await.unwrap_err();

        match error {
            ClientError::Transport(TransportError::OriginUnreachable { origin, .. }) => assert_eq!(origin.as_str(), "s2"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(fixture.calls(2), 0);
    }

    #[tokio::test]
    async fn retry_goes_to_the_origin_the_policy_named() {
        let fixture = Fixture::new(vec![
            ("s1", HostBehaviour::Fail),
            ("s2", HostBehaviour::status(200)),
            ("s3", HostBehaviour::status(200)),
        ]);
        let client = fixture.client(Arc::new(RetryNTimes::new(2)));

        let response = client.send_request(get("/"), &RequestContext::new()).await.unwrap();

        assert_eq!(response.headers()[ORIGIN_ID_HEADER], "s2");
        assert_eq!(fixture.calls(2), 0);

        let response = client.send_request(get("/"), &RequestContext::new()).await.unwrap();
        assert_eq!(response.headers()[ORIGIN_ID_HEADER], "s3");
    }

    struct PinnedPolicy {
        next: RemoteHost,
    }

    impl RetryPolicy for PinnedPolicy {
        fn evaluate(&self, _: &RetryContext<'_>, _: &dyn LoadBalancer, _: &Preferences) -> RetryOutcome {
            RetryOutcome {
                should_retry: true,
                next_origin: Some(self.next.clone()),
                delay: Duration::ZERO,
            }
        }
    }

    #[tokio::test]
    async fn named_origin_is_used_without_consulting_the_balancer() {
        let fixture = Fixture::new(vec![
            ("s1", HostBehaviour::Fail),
            ("s2", HostBehaviour::status(200)),
            ("s3", HostBehaviour::status(200)),
        ]);
        let policy = Arc::new(PinnedPolicy {
            next: fixture.hosts[2].0.clone(),
        });
        let client = fixture.client(policy);

        let response = client.send_request(get("/"), &RequestContext::new()).await.unwrap();

        assert_eq!(response.headers()[ORIGIN_ID_HEADER], "s3");
        assert_eq!(fixture.calls(0), 1);
        assert_eq!(fixture.calls(1), 0);
    }

    struct RecordingPolicy {
        seen: parking_lot::Mutex<Vec<Vec<String>>>,
        evaluations: AtomicU32,
    }

    impl RetryPolicy for RecordingPolicy {
        fn evaluate(&self, context: &RetryContext<'_>, _: &dyn LoadBalancer, preferences: &Preferences) -> RetryOutcome {
            self.evaluations.fetch_add(1, Ordering::SeqCst);
            assert_eq!(context.retry_count, self.evaluations.load(Ordering::SeqCst));
            assert_eq!(preferences.avoid_origins.len(), context.previous_origins.len());
            self.seen
                .lock()
                .push(context.previous_origins.iter().map(|h| h.id().to_string()).collect());
            RetryOutcome {
                should_retry: true,
                next_origin: None,
                delay: Duration::ZERO,
            }
        }
    }

    #[tokio::test]
    async fn every_attempted_origin_is_avoided_once() {
        let fixture = Fixture::new(vec![
            ("s1", HostBehaviour::Fail),
            ("s2", HostBehaviour::Fail),
            ("s3", HostBehaviour::Fail),
        ]);
        let policy = Arc::new(RecordingPolicy {
            seen: parking_lot::Mutex::new(Vec::new()),
            evaluations: AtomicU32::new(0),
        });
        let mut service = BackendService::new(AppId::new("shop"));
        service.max_attempts = 10;
        let client = fixture.client_with(service, policy.clone());

        let error = client.send_request(get("/"), &RequestContext::new()).await.unwrap_err();

        assert!(matches!(error, ClientError::NoAvailableHosts { .. }));
        let seen = policy.seen.lock().clone();
        assert_eq!(seen[0], vec!["s1"]);
        assert_eq!(seen[1], vec!["s1", "s2"]);
        assert_eq!(seen[2], vec!["s1", "s2", "s3"]);
        assert!(seen[3..].iter().all(|prev| prev.len() == 3));
        for i in 0..3 {
            assert_eq!(fixture.calls(i), 1);
        }
    }

    #[tokio::test]
    async fn empty_origin_set_is_no_available_hosts() {
        let fixture = Fixture::new(vec![]);
        let client = fixture.client(Arc::new(RetryNTimes::new(1)));

        let error = client.send_request(get("/"), &RequestContext::new()).await.unwrap_err();

        assert!(matches!(error, ClientError::NoAvailableHosts { .. }));
    }

    #[tokio::test]
    async fn restriction_cookie_wins_over_sticky_cookie() {
        let fixture = Fixture::new(vec![
            ("s1", HostBehaviour::status(200)),
            ("s2", HostBehaviour::status(200)),
            ("s3", HostBehaviour::status(200)),
        ]);
        let mut service = BackendService::new(AppId::new("shop"));
        service.origin_restriction_cookie = Some("restrict".to_string());
        let client = fixture.client_with(service, Arc::new(RetryNTimes::new(2)));

        assert_eq!(
            client.preferred_origins(&cookie_headers("styx_origin_shop=s1; restrict=s3")).as_deref(),
            Some("s3")
        );
        assert_eq!(
            client.preferred_origins(&cookie_headers("styx_origin_shop=s1")).as_deref(),
            Some("s1")
        );
        assert_eq!(client.preferred_origins(&HeaderMap::new()), None);
    }

    fn cookie_headers(cookie: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::COOKIE, HeaderValue::from_str(cookie).unwrap());
        headers
    }

    #[tokio::test]
    async fn sticky_sessions_set_cookie() {
        let fixture = Fixture::new(vec![("s1", HostBehaviour::status(200))]);
        let mut service = BackendService::new(AppId::new("shop"));
        service.sticky_session = StickySessionConfig {
            enabled: true,
            timeout: Duration::from_secs(43200),
        };
        let client = fixture.client_with(service, Arc::new(RetryNTimes::new(2)));

        let response = client.send_request(get("/"), &RequestContext::new()).await.unwrap();

        assert_eq!(
            response.headers()[SET_COOKIE],
            "styx_origin_shop=s1; Max-Age=43200; Path=/; HttpOnly"
        );
    }

    #[tokio::test]
    async fn head_response_body_is_removed() {
        let fixture = Fixture::new(vec![(
            "s1",
            HostBehaviour::Respond {
                status: 200,
                headers: vec![("transfer-encoding", "chunked")],
                body: "should not be seen",
            },
        )]);
        let client = fixture.client(Arc::new(RetryNTimes::new(2)));
        let request = Request::builder()
            .method(Method::HEAD)
            .uri("/")
            .body(ByteStream::empty())
            .unwrap();

        let response = client.send_request(request, &RequestContext::new()).await.unwrap();

        assert_eq!(response.headers()[CONTENT_LENGTH], "0");
        assert!(!response.headers().contains_key(TRANSFER_ENCODING));
        assert_eq!(body_text(response).await, "");
    }

    #[tokio::test]
    async fn chunked_response_loses_content_length() {
        let fixture = Fixture::new(vec![(
            "s1",
            HostBehaviour::Respond {
                status: 200,
                headers: vec![("transfer-encoding", "chunked"), ("content-length", "5")],
                body: "hello",
            },
        )]);
        let client = fixture.client(Arc::new(RetryNTimes::new(2)));

        let response = client.send_request(get("/"), &RequestContext::new()).await.unwrap();

        assert!(!response.headers().contains_key(CONTENT_LENGTH));
        assert_eq!(body_text(response).await, "hello");
    }

    #[tokio::test]
    async fn request_body_is_replayed_on_retry() {
        let fixture = Fixture::new(vec![("s1", HostBehaviour::Fail), ("s2", HostBehaviour::status(200))]);
        let client = fixture.client(Arc::new(RetryNTimes::new(2)));
        let request = Request::builder()
            .method(Method::POST)
            .uri("/orders")
            .body(ByteStream::from_buffers(vec![Buffer::from("ab"), Buffer::from("cd")]))
            .unwrap();

        client.send_request(request, &RequestContext::new()).await.unwrap();

        assert_eq!(fixture.hosts[0].1.last_request().unwrap().body, "abcd");
        assert_eq!(fixture.hosts[1].1.last_request().unwrap().body, "abcd");
        assert_eq!(fixture.hosts[1].1.last_request().unwrap().method, Method::POST);
    }

    #[tokio::test]
    async fn oversized_request_body_is_rejected() {
        let fixture = Fixture::new(vec![("s1", HostBehaviour::status(200))]);
        let mut service = BackendService::new(AppId::new("shop"));
        service.max_request_body_bytes = 3;
        let client = fixture.client_with(service, Arc::new(RetryNTimes::new(2)));
        let request = Request::builder()
            .method(Method::POST)
            .uri("/")
            .body(ByteStream::from("too long"))
            .unwrap();

        let error = client.send_request(request, &RequestContext::new()).await.unwrap_err();

        assert!(matches!(error, ClientError::Content(StreamError::ContentOverflow { limit: 3 })));
        assert_eq!(fixture.calls(0), 0);
    }

    #[tokio::test]
    async fn rewrites_and_host_override_apply() {
        let fixture = Fixture::new(vec![("s1", HostBehaviour::status(200))]);
        let mut service = BackendService::new(AppId::new("shop"));
        service.rewrites = RewriteRules::new(vec![RewriteRule::new("/old/(.*)", "/new/$1").unwrap()]);
        service.override_host_header = true;
        let client = fixture.client_with(service, Arc::new(RetryNTimes::new(2)));
        let request = Request::builder()
            .uri("/old/items?id=7")
            .header(HOST, "public.example")
            .body(ByteStream::empty())
            .unwrap();

        client.send_request(request, &RequestContext::new()).await.unwrap();

        let recorded = fixture.hosts[0].1.last_request().unwrap();
        assert_eq!(recorded.uri, "/new/items?id=7");
        assert_eq!(recorded.headers[HOST], "localhost:9000");
    }

    #[tokio::test]
    async fn cancellation_counts_against_app_and_origin() {
        let fixture = Fixture::new(vec![("s1", HostBehaviour::Hang)]);
        let client = fixture.client(Arc::new(RetryNTimes::new(2)));
        let context = RequestContext::new();

        let pending = client.send_request(get("/"), &context);
        let timed_out = tokio::time::timeout(Duration::from_millis(20), pending).await;

        assert!(timed_out.is_err());
        assert_eq!(
            fixture
                .metrics
                .counter("origins_requests_cancelled_total", &[("app_id", "shop")]),
            1
        );
        assert_eq!(
            fixture.metrics.counter(
                "origins_requests_cancelled_total",
                &[("app_id", "shop"), ("origin_id", "s1")]
            ),
            1
        );
    }

    #[tokio::test]
    async fn completed_requests_are_not_counted_as_cancelled() {
        let fixture = Fixture::new(vec![("s1", HostBehaviour::Fail)]);
        let client = fixture.client(Arc::new(RetryNTimes::new(1)));

        let _ = client.send_request(get("/"), &RequestContext::new()).await;
        let _ = client.send_request(get("/"), &RequestContext::new()).await;

        assert_eq!(fixture.metrics.counter_total("origins_requests_cancelled_total"), 0);
    }

    #[test]
    fn fail_behaviour_is_a_connect_failure() {
        let error = TransportError::unreachable(&OriginId::new("s1"), io::Error::new(io::ErrorKind::Other, "x"));
        assert!(error.is_retryable());
    }
}
