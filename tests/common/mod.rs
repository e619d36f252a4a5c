//! Shared utilities for integration testing.
//!
//! Mock origins bind ephemeral ports so tests can run in parallel.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{body::Body, http::Request, response::IntoResponse, routing::any, Router};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use origin_dispatch::config::{parse_config, ProxyConfig};
use origin_dispatch::inventory::OriginCommandBus;
use origin_dispatch::lifecycle::{build_services, BackendServices, Shutdown};
use origin_dispatch::observability::InMemoryMetrics;

/// A well-behaved keep-alive origin answering every request with `body`.
pub async fn start_mock_origin(body: &'static str) -> (SocketAddr, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let app = Router::new().fallback(any(move |request: Request<Body>| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            let echoed = request
                .headers()
                .get("x-request-id")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            ([("x-echo-request-id", echoed)], body).into_response()
        }
    }));
    (serve(app).await, hits)
}

/// An origin whose status and body come from `f`, called once per request.
pub async fn start_programmable_origin<F>(f: F) -> SocketAddr
where
    F: Fn() -> (u16, String) + Clone + Send + Sync + 'static,
{
    let app = Router::new().fallback(any(move || {
        let f = f.clone();
        async move {
            let (status, body) = f();
            let status = axum::http::StatusCode::from_u16(status).unwrap_or(axum::http::StatusCode::OK);
            (status, body).into_response()
        }
    }));
    serve(app).await
}

async fn serve(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

/// Accepts connections, reads the request and closes without answering.
pub async fn start_dropping_origin() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else { break };
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    addr
}

/// Accepts connections and reads requests but never answers.
pub async fn start_silent_origin() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else { break };
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                while let Ok(n) = socket.read(&mut buf).await {
                    if n == 0 {
                        break;
                    }
                }
                tokio::time::sleep(Duration::from_secs(60)).await;
            });
        }
    });
    addr
}

/// A port nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// TOML for one origin entry of the last declared service.
pub fn origin_toml(id: &str, addr: SocketAddr) -> String {
    format!(
        "\n[[backend_services.origins]]\nid = \"{}\"\nhost = \"127.0.0.1\"\nport = {}\n",
        id,
        addr.port()
    )
}

pub fn config(toml: &str) -> ProxyConfig {
    parse_config(toml).unwrap()
}

pub struct Stack {
    pub services: BackendServices,
    pub metrics: Arc<InMemoryMetrics>,
    pub shutdown: Arc<Shutdown>,
    pub bus: OriginCommandBus,
}

impl Stack {
    pub fn build(config: &ProxyConfig) -> Self {
        let metrics = Arc::new(InMemoryMetrics::new());
        let shutdown = Arc::new(Shutdown::new());
        let bus = OriginCommandBus::new();
        let services = build_services(config, metrics.clone(), shutdown.clone(), bus.clone()).unwrap();
        Self {
            services,
            metrics,
            shutdown,
            bus,
        }
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        self.shutdown.trigger();
        self.services.close();
    }
}
