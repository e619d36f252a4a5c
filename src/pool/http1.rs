//! HTTP/1.1 connections over plain TCP.
//!
//! # Responsibilities
//! - Connect to the origin within the connect timeout
//! - Perform the hyper client handshake and drive the connection in a task
//! - Translate hyper outcomes into the 0-or-1 response contract
//!
//! # Design Decisions
//! - Wire parsing is hyper's; this module only adapts it
//! - Encrypted origins need a TLS-capable factory and are refused here

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use http::uri::Uri;
use hyper::client::conn::http1::{self, SendRequest};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tracing::debug;

use crate::http::{LiveRequest, LiveResponse};
use crate::origin::Origin;
use crate::pool::{Connection, ConnectionFactory, ConnectionId, ConnectionSettings};
use crate::transport::body::{from_body, ByteStreamBody};
use crate::transport::TransportError;

/// Opens one HTTP/1.1 connection per call.
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpConnectionFactory;

impl HttpConnectionFactory {
    pub fn new() -> Self {
        Self
    }
}

impl ConnectionFactory for HttpConnectionFactory {
    fn create_connection(
        &self,
        origin: &Origin,
        settings: &ConnectionSettings,
    ) -> BoxFuture<'static, Result<Arc<dyn Connection>, TransportError>> {
        let origin = origin.clone();
        let connect_timeout = settings.connect_timeout;

        Box::pin(async move {
            if origin.tls().is_some() {
                return Err(TransportError::unreachable(
                    origin.id(),
                    "encrypted origins require a TLS-capable connection factory",
                ));
            }

            let address = origin.host_and_port();
            let stream = match tokio::time::timeout(connect_timeout, TcpStream::connect(&address)).await {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => return Err(TransportError::unreachable(origin.id(), e)),
                Err(_) => {
                    return Err(TransportError::unreachable(
                        origin.id(),
                        format!("connect timed out after {} ms", connect_timeout.as_millis()),
                    ))
                }
            };
            let _ = stream.set_nodelay(true);

            let (sender, driver) = http1::handshake::<_, ByteStreamBody>(TokioIo::new(stream))
                .await
                .map_err(|e| TransportError::unreachable(origin.id(), e))?;

            let id = ConnectionId::new();
            let connected = Arc::new(AtomicBool::new(true));
            let flag = connected.clone();
            let task = tokio::spawn(async move {
                if let Err(e) = driver.await {
                    debug!(connection = %id, error = %e, "Connection ended with error");
                }
                flag.store(false, Ordering::Release);
            });

            debug!(connection = %id, origin = %origin, "HTTP/1.1 connection established");
            let connection: Arc<dyn Connection> = Arc::new(HttpConnection {
                id,
                origin,
                sender: Arc::new(Mutex::new(sender)),
                connected,
                driver: task.abort_handle(),
            });
            Ok(connection)
        })
    }
}

struct HttpConnection {
    id: ConnectionId,
    origin: Origin,
    sender: Arc<Mutex<SendRequest<ByteStreamBody>>>,
    connected: Arc<AtomicBool>,
    driver: AbortHandle,
}

impl Connection for HttpConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn origin(&self) -> &Origin {
        &self.origin
    }

    fn is_connected(&self) -> bool {
        if !self.connected.load(Ordering::Acquire) {
            return false;
        }
        self.sender
            .try_lock()
            .map(|sender| !sender.is_closed())
            .unwrap_or(true)
    }

    fn write(&self, request: LiveRequest) -> BoxFuture<'static, Result<Option<LiveResponse>, TransportError>> {
        let sender = self.sender.clone();
        let connected = self.connected.clone();
        let origin = self.origin.id().clone();

        Box::pin(async move {
            let request = into_origin_form(request.map(ByteStreamBody::new));
            let response = {
                let mut sender = sender.lock().await;
                if let Err(e) = sender.ready().await {
                    connected.store(false, Ordering::Release);
                    return Err(TransportError::lost(&origin, e));
                }
                sender.send_request(request)
            };

            match response.await {
                Ok(response) => Ok(Some(response.map(from_body))),
                Err(e) if e.is_incomplete_message() || e.is_canceled() => {
                    connected.store(false, Ordering::Release);
                    Ok(None)
                }
                Err(e) if e.is_user() => Err(TransportError::invalid_request(&origin, e)),
                Err(e) => {
                    connected.store(false, Ordering::Release);
                    Err(TransportError::lost(&origin, e))
                }
            }
        })
    }

    fn close(&self) {
        self.connected.store(false, Ordering::Release);
        self.driver.abort();
    }
}

/// HTTP/1.1 origin servers expect `path?query` in the request line.
fn into_origin_form<B>(mut request: http::Request<B>) -> http::Request<B> {
    if request.uri().authority().is_some() {
        let path = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());
        if let Ok(uri) = path.parse::<Uri>() {
            *request.uri_mut() = uri;
        }
    }
    request
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::origin::{AppId, OriginId, TlsSettings};
    use crate::stream::ByteStream;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn origin_at(port: u16) -> Origin {
        Origin::new(AppId::new("shop"), OriginId::new("s1"), "127.0.0.1", port)
    }

    #[test]
    fn absolute_uris_become_origin_form() {
        let request = http::Request::builder()
            .uri("http://example.org:8080/a/b?c=d")
            .body(())
            .unwrap();
        assert_eq!(into_origin_form(request).uri(), "/a/b?c=d");
    }

    #[tokio::test]
    async fn tls_origins_are_refused() {
        let origin = origin_at(1).with_tls(TlsSettings::default());
        let result = HttpConnectionFactory::new()
            .create_connection(&origin, &ConnectionSettings::default())
            .await;
        assert!(matches!(result, Err(TransportError::OriginUnreachable { .. })));
    }

    #[tokio::test]
    async fn refused_connect_is_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let settings = ConnectionSettings {
            connect_timeout: Duration::from_millis(500),
        };
        let result = HttpConnectionFactory::new()
            .create_connection(&origin_at(port), &settings)
            .await;
        assert!(matches!(result, Err(TransportError::OriginUnreachable { .. })));
    }

    #[tokio::test]
    async fn request_and_response_cross_the_wire() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let _ = socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello")
                .await;
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let connection = HttpConnectionFactory::new()
            .create_connection(&origin_at(port), &ConnectionSettings::default())
            .await
            .unwrap();
        let request = http::Request::builder()
            .uri("/greeting")
            .header("host", format!("127.0.0.1:{}", port))
            .body(ByteStream::empty())
            .unwrap();

        let response = connection.write(request).await.unwrap().unwrap();
        assert_eq!(response.status(), 200);
        let body = response.into_body().aggregate(100).await.unwrap();
        assert_eq!(body.content(), b"hello");
        assert!(connection.is_connected());

        connection.close();
        assert!(!connection.is_connected());
    }

    #[tokio::test]
    async fn closed_without_response_yields_none() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            drop(socket);
        });

        let connection = HttpConnectionFactory::new()
            .create_connection(&origin_at(port), &ConnectionSettings::default())
            .await
            .unwrap();
        let request = http::Request::builder()
            .uri("/")
            .header("host", "127.0.0.1")
            .body(ByteStream::empty())
            .unwrap();

        assert!(connection.write(request).await.unwrap().is_none());
        assert!(!connection.is_connected());
    }
}
