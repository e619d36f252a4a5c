//! Scripted fakes shared by unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::future::{self, BoxFuture};
use futures_util::FutureExt;
use http::{HeaderMap, Response};
use parking_lot::Mutex;

use crate::http::{LiveRequest, LiveResponse, RequestContext, ServedBy};
use crate::load_balancer::RemoteHost;
use crate::origin::{AppId, Origin, OriginId};
use crate::pool::{Connection, ConnectionFactory, ConnectionId, ConnectionSettings};
use crate::stream::{Buffer, ByteStream, StreamError};
use crate::transport::{HostClient, HostClientFactory, TransportError};

pub fn test_origin(app: &str, id: &str, port: u16) -> Origin {
    Origin::new(AppId::new(app), OriginId::new(id), "localhost", port)
}

/// What a [`FakeConnection`] does with a written request.
#[derive(Debug, Clone)]
pub enum WriteBehaviour {
    Respond { status: u16, chunks: Vec<&'static str> },
    RespondThenFail { status: u16 },
    NoResponse,
    Fail,
    Hang,
}

impl WriteBehaviour {
    pub fn respond(status: u16, chunks: &[&'static str]) -> Self {
        WriteBehaviour::Respond {
            status,
            chunks: chunks.to_vec(),
        }
    }
}

pub struct FakeConnection {
    id: ConnectionId,
    origin: Origin,
    behaviour: WriteBehaviour,
    connected: AtomicBool,
    closed: AtomicBool,
    requests: Mutex<Vec<HeaderMap>>,
}

impl FakeConnection {
    pub fn new(origin: Origin, behaviour: WriteBehaviour) -> Self {
        Self {
            id: ConnectionId::new(),
            origin,
            behaviour,
            connected: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Simulate the peer going away.
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn was_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn last_request_headers(&self) -> HeaderMap {
        self.requests.lock().last().cloned().unwrap_or_default()
    }
}

impl Connection for FakeConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn origin(&self) -> &Origin {
        &self.origin
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn write(&self, request: LiveRequest) -> BoxFuture<'static, Result<Option<LiveResponse>, TransportError>> {
        let (parts, _body) = request.into_parts();
        self.requests.lock().push(parts.headers);

        let origin = self.origin.id().clone();
        match self.behaviour.clone() {
            WriteBehaviour::Respond { status, chunks } => {
                let body = ByteStream::from_buffers(chunks.into_iter().map(Buffer::from).collect());
                let response = Response::builder().status(status).body(body);
                Box::pin(future::ready(
                    response
                        .map(Some)
                        .map_err(|e| TransportError::invalid_request(&origin, e)),
                ))
            }
            WriteBehaviour::RespondThenFail { status } => {
                let body = ByteStream::from("partial").concat(ByteStream::error(StreamError::upstream("reset")));
                let response = Response::builder().status(status).body(body);
                Box::pin(future::ready(
                    response
                        .map(Some)
                        .map_err(|e| TransportError::invalid_request(&origin, e)),
                ))
            }
            WriteBehaviour::NoResponse => Box::pin(future::ready(Ok(None))),
            WriteBehaviour::Fail => Box::pin(future::ready(Err(TransportError::lost(&origin, "connection reset")))),
            WriteBehaviour::Hang => Box::pin(future::pending()),
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }
}

pub struct FakeConnectionFactory {
    behaviour: Mutex<WriteBehaviour>,
    fail: AtomicBool,
    connections: Mutex<Vec<Arc<FakeConnection>>>,
}

impl FakeConnectionFactory {
    pub fn new() -> Self {
        Self::with_behaviour(WriteBehaviour::respond(200, &["ok"]))
    }

    pub fn with_behaviour(behaviour: WriteBehaviour) -> Self {
        Self {
            behaviour: Mutex::new(behaviour),
            fail: AtomicBool::new(false),
            connections: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_connects(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn created(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn connection(&self, index: usize) -> Arc<FakeConnection> {
        self.connections.lock()[index].clone()
    }
}

impl ConnectionFactory for FakeConnectionFactory {
    fn create_connection(
        &self,
        origin: &Origin,
        _settings: &ConnectionSettings,
    ) -> BoxFuture<'static, Result<Arc<dyn Connection>, TransportError>> {
        if self.fail.load(Ordering::SeqCst) {
            return Box::pin(future::ready(Err(TransportError::unreachable(
                origin.id(),
                "connection refused",
            ))));
        }
        let connection = Arc::new(FakeConnection::new(origin.clone(), self.behaviour.lock().clone()));
        self.connections.lock().push(connection.clone());
        let connection: Arc<dyn Connection> = connection;
        Box::pin(future::ready(Ok(connection)))
    }
}

/// What a [`FakeHostClient`] answers.
#[derive(Debug, Clone)]
pub enum HostBehaviour {
    Respond {
        status: u16,
        headers: Vec<(&'static str, &'static str)>,
        body: &'static str,
    },
    Fail,
    Hang,
}

impl HostBehaviour {
    pub fn status(status: u16) -> Self {
        HostBehaviour::Respond {
            status,
            headers: Vec::new(),
            body: "ok",
        }
    }
}

pub struct FakeHostClient {
    origin: Origin,
    behaviour: HostBehaviour,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    closed: AtomicBool,
    requests: Mutex<Vec<RecordedRequest>>,
}

/// Request line and headers as seen by a fake host.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: http::Method,
    pub uri: http::Uri,
    pub headers: HeaderMap,
    pub body: String,
}

impl FakeHostClient {
    pub fn new(origin: Origin, behaviour: HostBehaviour) -> Self {
        Self {
            origin,
            behaviour,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_in_flight(&self, value: usize) {
        self.in_flight.store(value, Ordering::SeqCst);
    }

    pub fn was_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<RecordedRequest> {
        self.requests.lock().last().cloned()
    }
}

impl HostClient for FakeHostClient {
    fn send_request(
        &self,
        request: LiveRequest,
        _context: &RequestContext,
    ) -> BoxFuture<'static, Result<LiveResponse, TransportError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (parts, body) = request.into_parts();
        let body = body
            .aggregate(usize::MAX)
            .now_or_never()
            .and_then(Result::ok)
            .map(|content| String::from_utf8_lossy(content.content()).into_owned())
            .unwrap_or_default();
        self.requests.lock().push(RecordedRequest {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body,
        });

        let origin = self.origin.id().clone();
        match self.behaviour.clone() {
            HostBehaviour::Respond { status, headers, body } => {
                let mut builder = Response::builder().status(status).extension(ServedBy(origin.clone()));
                for (name, value) in headers {
                    builder = builder.header(name, value);
                }
                let result = builder
                    .body(ByteStream::from(body))
                    .map_err(|e| TransportError::invalid_request(&origin, e));
                Box::pin(future::ready(result))
            }
            HostBehaviour::Fail => Box::pin(future::ready(Err(TransportError::unreachable(
                &origin,
                "connection refused",
            )))),
            HostBehaviour::Hang => Box::pin(future::pending()),
        }
    }

    fn load_balancing_metric(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// A remote host backed by a [`FakeHostClient`].
pub fn fake_host(app: &str, id: &str, behaviour: HostBehaviour) -> (RemoteHost, Arc<FakeHostClient>) {
    let origin = test_origin(app, id, 9000);
    let client = Arc::new(FakeHostClient::new(origin.clone(), behaviour));
    (RemoteHost::new(origin, client.clone()), client)
}

/// Creates one [`FakeHostClient`] per origin and remembers them.
#[derive(Default)]
pub struct FakeHostFactory {
    created: Mutex<Vec<Arc<FakeHostClient>>>,
}

impl FakeHostFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created(&self) -> usize {
        self.created.lock().len()
    }

    /// Most recent client created for `id`.
    pub fn client(&self, id: &str) -> Option<Arc<FakeHostClient>> {
        self.created
            .lock()
            .iter()
            .rev()
            .find(|c| c.origin.id().as_str() == id)
            .cloned()
    }

    /// Every client ever created for `id`, oldest first.
    pub fn clients(&self, id: &str) -> Vec<Arc<FakeHostClient>> {
        self.created
            .lock()
            .iter()
            .filter(|c| c.origin.id().as_str() == id)
            .cloned()
            .collect()
    }
}

impl HostClientFactory for FakeHostFactory {
    fn create_host_client(&self, origin: &Origin) -> Arc<dyn HostClient> {
        let client = Arc::new(FakeHostClient::new(origin.clone(), HostBehaviour::status(200)));
        self.created.lock().push(client.clone());
        client
    }
}
