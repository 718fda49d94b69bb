//! Per-client connection shared by both transports.
//!
//! A [`Conn`] is the context every handler receives. It hides whether the
//! request arrived as a plain HTTP exchange or as a frame on a long-lived
//! socket:
//!
//! | Transport | `respond` writes to | Responses per request |
//! |-----------|---------------------|-----------------------|
//! | HTTP | the pending HTTP reply | exactly one |
//! | Socket | the outbound queue of the write pump | any number |
//!
//! Handlers also get keyed session variables and close hooks, so state such
//! as an authenticated identity can live on the connection.

// ============================================================================
// Imports
// ============================================================================

use std::any::Any;
use std::fmt;
use std::mem;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::StatusCode;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;
use crate::protocol::{Envelope, Marshaler, simple_msg};
use crate::router::Router;
use crate::transport::options::ConnOptions;

// ============================================================================
// Types
// ============================================================================

/// Callback run once when the connection closes.
pub type CloseHook = Box<dyn Fn(&Conn) + Send + Sync>;

/// Status, body and media type produced for a plain HTTP request.
#[derive(Debug)]
pub(crate) struct HttpReply {
    pub status: StatusCode,
    pub body: Vec<u8>,
    pub content_type: &'static str,
}

/// Outbound side of a socket connection.
struct SocketLink {
    send_tx: mpsc::Sender<Vec<u8>>,
    stop: CancellationToken,
}

/// A single HTTP request awaiting its one reply.
struct HttpExchange {
    method: String,
    target: String,
    writer: Mutex<Option<oneshot::Sender<HttpReply>>>,
}

/// Exactly one transport backs a connection.
enum Transport {
    Socket(SocketLink),
    Http(HttpExchange),
}

/// State guarded by the connection lock.
#[derive(Default)]
struct ConnState {
    vars: FxHashMap<String, Box<dyn Any + Send + Sync>>,
    closed: bool,
}

struct ConnInner {
    id: ConnectionId,
    remote_addr: Option<SocketAddr>,
    transport: Transport,
    router: Arc<Router>,
    marshaler: Arc<dyn Marshaler>,
    state: RwLock<ConnState>,
    close_hooks: Mutex<Vec<CloseHook>>,
}

// ============================================================================
// Conn
// ============================================================================

/// Handle to one client connection.
///
/// Cheap to clone; every handler task spawned for a socket connection holds
/// its own clone.
#[derive(Clone)]
pub struct Conn {
    inner: Arc<ConnInner>,
}

// ============================================================================
// Conn - Constructors
// ============================================================================

impl Conn {
    /// Creates a socket-backed connection and the receiving end of its
    /// outbound queue.
    pub(crate) fn socket(
        router: Arc<Router>,
        marshaler: Arc<dyn Marshaler>,
        options: &ConnOptions,
        remote_addr: Option<SocketAddr>,
        stop: CancellationToken,
    ) -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (send_tx, send_rx) = mpsc::channel(options.send_queue_capacity);
        let transport = Transport::Socket(SocketLink { send_tx, stop });
        (Self::with_transport(transport, router, marshaler, remote_addr), send_rx)
    }

    /// Creates an HTTP-backed connection and the receiver of its reply.
    pub(crate) fn rest(
        router: Arc<Router>,
        marshaler: Arc<dyn Marshaler>,
        method: impl Into<String>,
        target: impl Into<String>,
        remote_addr: Option<SocketAddr>,
    ) -> (Self, oneshot::Receiver<HttpReply>) {
        let (reply_tx, reply_rx) = oneshot::channel();
        let transport = Transport::Http(HttpExchange {
            method: method.into(),
            target: target.into(),
            writer: Mutex::new(Some(reply_tx)),
        });
        (Self::with_transport(transport, router, marshaler, remote_addr), reply_rx)
    }

    fn with_transport(
        transport: Transport,
        router: Arc<Router>,
        marshaler: Arc<dyn Marshaler>,
        remote_addr: Option<SocketAddr>,
    ) -> Self {
        Self {
            inner: Arc::new(ConnInner {
                id: ConnectionId::next(),
                remote_addr,
                transport,
                router,
                marshaler,
                state: RwLock::new(ConnState::default()),
                close_hooks: Mutex::new(Vec::new()),
            }),
        }
    }
}

// ============================================================================
// Conn - Accessors
// ============================================================================

impl Conn {
    /// Returns the process-unique connection identifier.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// Returns the peer address, if the listener reported one.
    #[inline]
    #[must_use]
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.inner.remote_addr
    }

    /// Returns `true` for a socket-backed connection.
    #[inline]
    #[must_use]
    pub fn is_socket(&self) -> bool {
        matches!(self.inner.transport, Transport::Socket(_))
    }

    /// Returns `true` once [`Conn::close`] has run.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.state.read().closed
    }

    /// Returns the routing table serving this connection.
    #[inline]
    #[must_use]
    pub fn router(&self) -> &Router {
        &self.inner.router
    }
}

// ============================================================================
// Conn - Responding
// ============================================================================

impl Conn {
    /// Answers `request` with `value` and `status`.
    ///
    /// Over a socket the response envelope keeps the request identifier and
    /// is queued for the write pump. Over HTTP the status and payload become
    /// the HTTP response; only the first call per request is delivered.
    ///
    /// # Errors
    ///
    /// - [`Error::Encoding`] if `value` cannot be marshaled
    /// - [`Error::ConnectionClosed`] if the socket is shutting down
    /// - [`Error::AlreadyResponded`] for a second HTTP response
    pub async fn respond<T: Serialize + ?Sized>(
        &self,
        mut request: Envelope,
        value: &T,
        status: StatusCode,
    ) -> Result<()> {
        request.set_code(status.as_u16());
        if let Err(e) = request.marshal_payload_with(self.inner.marshaler.as_ref(), value) {
            warn!(conn = %self.id(), request_id = %request.id(), error = %e, "Failed to encode response");
            return Err(e);
        }

        match &self.inner.transport {
            Transport::Socket(link) => {
                let frame = request.encode()?;
                let result = self.send_frame(link, frame).await;
                if let Err(e) = &result {
                    debug!(conn = %self.id(), request_id = %request.id(), error = %e, "Response dropped");
                }
                result
            }
            Transport::Http(exchange) => {
                let writer = exchange
                    .writer
                    .lock()
                    .take()
                    .ok_or_else(|| Error::already_responded(request.id().clone()))?;

                let reply = HttpReply {
                    status,
                    body: request.payload().to_vec(),
                    content_type: self.inner.marshaler.content_type(),
                };
                writer.send(reply).map_err(|_| Error::ConnectionClosed)
            }
        }
    }

    /// Sends one more response for `request`, leaving it usable afterwards.
    ///
    /// Used for streams of replies to a single socket request (progress,
    /// subscriptions). Plain HTTP still delivers only the first response.
    ///
    /// # Errors
    ///
    /// Same as [`Conn::respond`].
    pub async fn respond_multiple<T: Serialize + ?Sized>(
        &self,
        request: &Envelope,
        value: &T,
        status: StatusCode,
    ) -> Result<()> {
        self.respond(request.clone(), value, status).await
    }

    /// Hands an encoded frame to the write pump.
    ///
    /// Fails fast once the stop signal has fired instead of blocking.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] after shutdown started
    /// - [`Error::Transport`] on an HTTP connection, which has no socket
    pub async fn write_out(&self, frame: Vec<u8>) -> Result<()> {
        match &self.inner.transport {
            Transport::Socket(link) => self.send_frame(link, frame).await,
            Transport::Http(_) => Err(Error::transport("plain HTTP exchange has no socket")),
        }
    }

    async fn send_frame(&self, link: &SocketLink, frame: Vec<u8>) -> Result<()> {
        if link.stop.is_cancelled() {
            return Err(Error::ConnectionClosed);
        }

        tokio::select! {
            biased;
            () = link.stop.cancelled() => Err(Error::ConnectionClosed),
            sent = link.send_tx.send(frame) => sent.map_err(|_| Error::ConnectionClosed),
        }
    }
}

// ============================================================================
// Conn - HTTP Mode
// ============================================================================

impl Conn {
    /// Serves the HTTP request behind this connection.
    ///
    /// A body that is not JSON is answered with 400, an unknown route with
    /// 404. Otherwise the handler runs on the calling task.
    pub(crate) async fn handle_rest_connection(&self, body: &[u8]) {
        let Transport::Http(exchange) = &self.inner.transport else {
            return;
        };

        let request = match Envelope::from_http(&exchange.method, &exchange.target, body) {
            Ok(request) => request,
            Err(e) => {
                warn!(conn = %self.id(), method = %exchange.method, path = %exchange.target, error = %e, "Failed to decode HTTP request");
                let message = simple_msg(format!("Bad request: {e}"));
                let _ = self
                    .respond(Envelope::default(), &message, StatusCode::BAD_REQUEST)
                    .await;
                return;
            }
        };

        let path = request.path();
        let route = self.inner.router.resolve(&path, request.method()).cloned();
        match route {
            Ok(route) => route.run(self.clone(), request).await,
            Err(e) => {
                debug!(conn = %self.id(), error = %e, "No route");
                let _ = self
                    .respond(request, &simple_msg("Resource not found"), StatusCode::NOT_FOUND)
                    .await;
            }
        }
    }
}

// ============================================================================
// Conn - Session Variables
// ============================================================================

impl Conn {
    /// Stores a session variable, replacing any previous value.
    pub fn set_var<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        self.inner.state.write().vars.insert(key.into(), Box::new(value));
    }

    /// Returns a copy of a session variable.
    ///
    /// `None` if the key is unset or holds a value of another type.
    #[must_use]
    pub fn get_var<T: Any + Clone>(&self, key: &str) -> Option<T> {
        self.inner
            .state
            .read()
            .vars
            .get(key)
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
    }

    /// Removes a session variable.
    pub fn del_var(&self, key: &str) {
        self.inner.state.write().vars.remove(key);
    }
}

// ============================================================================
// Conn - Lifecycle
// ============================================================================

impl Conn {
    /// Registers a callback to run when the connection closes.
    ///
    /// Hooks run in registration order on the closing task, after the
    /// socket is already shut.
    pub fn add_close_hook<F>(&self, hook: F)
    where
        F: Fn(&Conn) + Send + Sync + 'static,
    {
        self.inner.close_hooks.lock().push(Box::new(hook));
    }

    /// Closes the connection and runs the close hooks.
    ///
    /// Only the first call has any effect.
    pub fn close(&self) {
        {
            let mut state = self.inner.state.write();
            if state.closed {
                return;
            }
            state.closed = true;
            if let Transport::Socket(link) = &self.inner.transport {
                link.stop.cancel();
            }
        }

        let hooks = mem::take(&mut *self.inner.close_hooks.lock());
        for hook in &hooks {
            hook(self);
        }

        debug!(conn = %self.id(), remote = ?self.remote_addr(), hooks = hooks.len(), "Connection closed");
    }
}

impl fmt::Debug for Conn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conn")
            .field("id", &self.inner.id)
            .field("remote_addr", &self.inner.remote_addr)
            .field("socket", &self.is_socket())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
