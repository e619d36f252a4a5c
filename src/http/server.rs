//! Inbound HTTP server.
//!
//! # Responsibilities
//! - Create the Axum router with a catch-all proxy handler
//! - Wire up tracing middleware
//! - Route each request to a backend service by longest path prefix
//! - Bridge axum bodies to and from `ByteStream`
//! - Map dispatch failures to gateway status codes

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router as AxumRouter,
};
use http::HeaderValue;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::client::{BackendServiceClient, ClientError};
use crate::http::{RequestContext, X_REQUEST_ID};
use crate::routing::Router;
use crate::stream::StreamError;
use crate::transport::body::{from_body, ByteStreamBody};

/// A backend service reachable under a path prefix.
#[derive(Clone)]
pub struct ServiceRoute {
    pub path_prefix: String,
    pub client: Arc<BackendServiceClient>,
}

impl ServiceRoute {
    pub fn new(path_prefix: impl Into<String>, client: Arc<BackendServiceClient>) -> Self {
        Self {
            path_prefix: path_prefix.into(),
            client,
        }
    }
}

/// Application state injected into handlers.
#[derive(Clone)]
struct AppState {
    routes: Arc<Router<Arc<BackendServiceClient>>>,
}

/// HTTP server for the reverse proxy.
pub struct HttpServer {
    router: AxumRouter,
}

impl HttpServer {
    pub fn new(routes: Vec<ServiceRoute>) -> Self {
        let routes = Router::new(
            routes
                .into_iter()
                .map(|route| (route.path_prefix, route.client)),
        );
        tracing::info!(routes = routes.len(), "Service routes compiled");

        let state = AppState {
            routes: Arc::new(routes),
        };
        Self {
            router: Self::build_router(state),
        }
    }

    fn build_router(state: AppState) -> AxumRouter {
        AxumRouter::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
    }

    /// The router, for serving without a listener.
    pub fn router(&self) -> AxumRouter {
        self.router.clone()
    }

    /// Accept connections until `shutdown` resolves, then drain.
    pub async fn run<F>(self, listener: TcpListener, shutdown: F) -> Result<(), std::io::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let mut context = RequestContext::new();
    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        context = context.with_client_address(*addr);
    }

    let mut response = dispatch(&state, request, &context).await;
    if let Ok(value) = HeaderValue::from_str(&context.request_id.to_string()) {
        response.headers_mut().insert(X_REQUEST_ID, value);
    }
    response
}

async fn dispatch(state: &AppState, request: Request<Body>, context: &RequestContext) -> Response {
    let path = request.uri().path().to_string();
    let Some(client) = state.routes.route(&path) else {
        tracing::warn!(request_id = %context.request_id, path = %path, "No route matched");
        return (StatusCode::NOT_FOUND, "No matching route found").into_response();
    };

    tracing::debug!(
        request_id = %context.request_id,
        app_id = %client.app_id(),
        method = %request.method(),
        path = %path,
        "Proxying request"
    );

    let (parts, body) = request.into_parts();
    let request = Request::from_parts(parts, from_body(body));

    match client.send_request(request, context).await {
        Ok(response) => {
            let (parts, body) = response.into_parts();
            Response::from_parts(parts, Body::new(ByteStreamBody::new(body)))
        }
        Err(e) => error_response(&e),
    }
}

fn error_response(error: &ClientError) -> Response {
    let status = match error {
        ClientError::NoAvailableHosts { .. } => StatusCode::SERVICE_UNAVAILABLE,
        ClientError::Transport(_) => StatusCode::BAD_GATEWAY,
        ClientError::Content(StreamError::ContentOverflow { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
        ClientError::Content(_) => StatusCode::BAD_REQUEST,
    };
    (status, error.to_string()).into_response()
}
