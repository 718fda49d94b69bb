//! Correlating WebSocket client.
//!
//! # Calls
//!
//! A call tags an [`Envelope`] with a fresh identifier, parks a reply slot
//! under that identifier, writes the frame and waits for whichever comes
//! first: the reply or the timeout. The single read loop routes replies to
//! their slot by identifier, so overlapping calls never rely on order.
//!
//! Frames that match no slot (server pushes, extra replies to an earlier
//! request) go to the unsolicited-message handler.
//!
//! # Example
//!
//! ```ignore
//! use wsrest::Client;
//!
//! let client = Client::builder("ws://127.0.0.1:8080/ws")
//!     .on_message(|frame| println!("push: {}", String::from_utf8_lossy(frame)))
//!     .connect()
//!     .await?;
//!
//! let reply = client.get("/go", &()).await?;
//! assert_eq!(reply.code(), 200);
//!
//! client.close().await;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Serialize;
use serde_json::error::Category;
use tokio::net::TcpStream;
use tokio::sync::{Mutex as AsyncMutex, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::RequestId;
use crate::protocol::{Envelope, JsonMarshaler, Marshaler};
use crate::transport::options::ClientOptions;

// ============================================================================
// Constants
// ============================================================================

/// Identifiers of timed-out calls remembered so late replies are dropped.
const ABANDONED_MEMORY: usize = 256;

/// Close code reported when the peer's close frame carried none.
const CLOSE_NO_STATUS: u16 = 1005;

// ============================================================================
// Types
// ============================================================================

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Receives raw frames that match no pending call.
pub type MessageHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Receives the error that ended a connection the server closed.
pub type ServerCloseHandler = Arc<dyn Fn(&Error) + Send + Sync>;

/// Reply slots by identifier, plus recently abandoned identifiers.
#[derive(Default)]
struct Correlations {
    slots: FxHashMap<RequestId, oneshot::Sender<Envelope>>,
    abandoned: VecDeque<RequestId>,
}

impl Correlations {
    /// Removes a timed-out slot and remembers its identifier.
    fn abandon(&mut self, id: &RequestId) {
        if self.slots.remove(id).is_none() {
            return;
        }
        if self.abandoned.len() == ABANDONED_MEMORY {
            self.abandoned.pop_front();
        }
        self.abandoned.push_back(id.clone());
    }

    /// Returns `true` while `id` belongs to a remembered abandoned call.
    ///
    /// Identifiers stay until they age out, so every late reply to a
    /// streamed request is dropped, not only the first.
    fn is_abandoned(&self, id: &RequestId) -> bool {
        self.abandoned.contains(id)
    }
}

struct ClientInner {
    url: String,
    writer: AsyncMutex<Option<WsSink>>,
    correlations: Mutex<Correlations>,
    on_server_close: Mutex<Option<ServerCloseHandler>>,
    /// Fired by the read loop when it exits.
    closed: CancellationToken,
    /// Fired by `close` to stop the read loop.
    shutdown: CancellationToken,
    options: ClientOptions,
    marshaler: Arc<dyn Marshaler>,
    /// Stops the read loop once the last handle is dropped.
    _shutdown_on_drop: DropGuard,
}

// ============================================================================
// ClientBuilder
// ============================================================================

/// Builder for [`Client`].
pub struct ClientBuilder {
    url: String,
    options: ClientOptions,
    marshaler: Arc<dyn Marshaler>,
    on_message: Option<MessageHandler>,
    on_server_close: Option<ServerCloseHandler>,
}

impl ClientBuilder {
    /// Replaces the client options.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Replaces the payload marshaler.
    #[inline]
    #[must_use]
    pub fn marshaler(mut self, marshaler: impl Marshaler + 'static) -> Self {
        self.marshaler = Arc::new(marshaler);
        self
    }

    /// Sets the unsolicited-message handler. Defaults to dropping frames.
    #[must_use]
    pub fn on_message<F>(mut self, handler: F) -> Self
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.on_message = Some(Arc::new(handler));
        self
    }

    /// Sets the handler notified when the server ends the connection.
    #[must_use]
    pub fn on_server_close<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.on_server_close = Some(Arc::new(handler));
        self
    }

    /// Dials the server and starts the read loop.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the options are invalid
    /// - [`Error::InvalidUrl`] if the URL is not a `ws`/`wss` URL
    /// - [`Error::Connection`] if the handshake fails
    pub async fn connect(self) -> Result<Client> {
        self.options.validate()?;

        let url = Url::parse(&self.url).map_err(|e| Error::invalid_url(&self.url, e))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::invalid_url(
                &self.url,
                format!("unsupported scheme '{}'", url.scheme()),
            ));
        }

        let (stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| Error::connection(format!("failed to dial {}: {e}", self.url)))?;
        let (sink, stream) = stream.split();

        let shutdown = CancellationToken::new();
        let inner = Arc::new(ClientInner {
            url: self.url,
            writer: AsyncMutex::new(Some(sink)),
            correlations: Mutex::new(Correlations::default()),
            on_server_close: Mutex::new(self.on_server_close),
            closed: CancellationToken::new(),
            shutdown: shutdown.clone(),
            options: self.options,
            marshaler: self.marshaler,
            _shutdown_on_drop: shutdown.drop_guard(),
        });

        info!(url = %inner.url, "WebSocket client connected");
        let signals = LoopSignals {
            url: inner.url.clone(),
            shutdown: inner.shutdown.clone(),
            closed: inner.closed.clone(),
        };
        tokio::spawn(read_loop(Arc::downgrade(&inner), stream, self.on_message, signals));

        Ok(Client { inner })
    }
}

// ============================================================================
// Client
// ============================================================================

/// WebSocket client with request/response correlation.
///
/// Cheap to clone; clones share one socket and one read loop. Dropping the
/// last clone without [`Client::close`] drops the socket without a close
/// handshake.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Starts building a client for `url`.
    #[must_use]
    pub fn builder(url: impl Into<String>) -> ClientBuilder {
        ClientBuilder {
            url: url.into(),
            options: ClientOptions::default(),
            marshaler: Arc::new(JsonMarshaler),
            on_message: None,
            on_server_close: None,
        }
    }

    /// Dials `url` with default options and no unsolicited handler.
    ///
    /// # Errors
    ///
    /// See [`ClientBuilder::connect`].
    pub async fn dial(url: impl Into<String>) -> Result<Self> {
        Self::builder(url).connect().await
    }

    /// Dials `url` delivering unmatched frames to `on_message`.
    ///
    /// # Errors
    ///
    /// See [`ClientBuilder::connect`].
    pub async fn dial_with_handler<F>(url: impl Into<String>, on_message: F) -> Result<Self>
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        Self::builder(url).on_message(on_message).connect().await
    }

    /// Replaces the server-close handler.
    pub fn set_server_close_handler<F>(&self, handler: F)
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        *self.inner.on_server_close.lock() = Some(Arc::new(handler));
    }

    /// Returns the dialed URL.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Returns the number of calls waiting for a reply.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.correlations.lock().slots.len()
    }

    /// Returns `true` once the read loop has exited.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }
}

// ============================================================================
// Client - Calls
// ============================================================================

impl Client {
    /// Sends `request` and waits for the reply carrying its identifier.
    ///
    /// A timeout abandons the call locally; nothing is sent to the server
    /// and a late reply is dropped.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the client is closed or closes while waiting
    /// - [`Error::TooManyPending`] if the pending-call bound is reached
    /// - [`Error::RequestTimeout`] if no reply arrives in time
    /// - [`Error::WebSocket`] / [`Error::Transport`] if the write fails
    pub async fn call(&self, request: Envelope) -> Result<Envelope> {
        let inner = &self.inner;
        if inner.closed.is_cancelled() {
            return Err(Error::ConnectionClosed);
        }

        let id = request.id().clone();
        let frame = request.encode()?;

        let reply_rx = {
            let mut correlations = inner.correlations.lock();
            if let Some(max) = inner.options.max_pending_requests
                && correlations.slots.len() >= max
            {
                return Err(Error::too_many_pending(correlations.slots.len(), max));
            }
            let (reply_tx, reply_rx) = oneshot::channel();
            correlations.slots.insert(id.clone(), reply_tx);
            reply_rx
        };

        if let Err(e) = self.send_frame(frame).await {
            inner.correlations.lock().slots.remove(&id);
            return Err(e);
        }

        trace!(request_id = %id, method = %request.method(), resource = %request.resource(), "Request sent");

        let wait = async {
            tokio::select! {
                biased;
                reply = reply_rx => reply.map_err(|_| Error::ConnectionClosed),
                () = inner.closed.cancelled() => Err(Error::ConnectionClosed),
            }
        };

        match timeout(inner.options.request_timeout, wait).await {
            Ok(result) => result,
            Err(_) => {
                inner.correlations.lock().abandon(&id);
                debug!(request_id = %id, "Request timed out");
                Err(Error::request_timeout(
                    id,
                    saturating_millis(inner.options.request_timeout),
                ))
            }
        }
    }

    /// Builds a request from `method`, `resource` and `payload`, then calls.
    ///
    /// `payload` follows [`Envelope::create_with`]: `&()` sends no payload,
    /// a string is sent pre-encoded.
    ///
    /// # Errors
    ///
    /// [`Error::Encoding`] for an unrepresentable payload, otherwise see
    /// [`Client::call`].
    pub async fn execute<T: Serialize + ?Sized>(
        &self,
        method: &str,
        resource: &str,
        payload: &T,
    ) -> Result<Envelope> {
        let request =
            Envelope::create_with(self.inner.marshaler.as_ref(), method, resource, payload)?;
        self.call(request).await
    }

    /// Calls with method `GET`.
    ///
    /// # Errors
    ///
    /// See [`Client::execute`].
    pub async fn get<T: Serialize + ?Sized>(&self, resource: &str, payload: &T) -> Result<Envelope> {
        self.execute("GET", resource, payload).await
    }

    /// Calls with method `POST`.
    ///
    /// # Errors
    ///
    /// See [`Client::execute`].
    pub async fn post<T: Serialize + ?Sized>(&self, resource: &str, payload: &T) -> Result<Envelope> {
        self.execute("POST", resource, payload).await
    }

    /// Calls with method `PUT`.
    ///
    /// # Errors
    ///
    /// See [`Client::execute`].
    pub async fn put<T: Serialize + ?Sized>(&self, resource: &str, payload: &T) -> Result<Envelope> {
        self.execute("PUT", resource, payload).await
    }

    /// Calls with method `DELETE`.
    ///
    /// # Errors
    ///
    /// See [`Client::execute`].
    pub async fn delete<T: Serialize + ?Sized>(
        &self,
        resource: &str,
        payload: &T,
    ) -> Result<Envelope> {
        self.execute("DELETE", resource, payload).await
    }

    /// Writes one frame; the writer lock admits one writer at a time.
    async fn send_frame(&self, frame: Vec<u8>) -> Result<()> {
        let text = String::from_utf8(frame).map_err(Error::encoding)?;

        let mut writer = self.inner.writer.lock().await;
        let sink = writer.as_mut().ok_or(Error::ConnectionClosed)?;

        match timeout(self.inner.options.write_wait, sink.send(Message::Text(text.into()))).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => {
                Err(Error::ConnectionClosed)
            }
            Ok(Err(e)) => Err(Error::from(e)),
            Err(_) => Err(Error::transport("write timed out")),
        }
    }
}

// ============================================================================
// Client - Lifecycle
// ============================================================================

impl Client {
    /// Closes the connection with a normal-closure handshake.
    ///
    /// The server-close handler is disabled first. Waits up to the close
    /// grace period for the server to answer, then drops the socket.
    /// Calls made afterwards fail with [`Error::ConnectionClosed`].
    pub async fn close(&self) {
        let inner = &self.inner;

        {
            let mut writer = inner.writer.lock().await;
            inner.on_server_close.lock().take();

            let Some(sink) = writer.as_mut() else {
                return;
            };

            let frame = CloseFrame {
                code: CloseCode::Normal,
                reason: "".into(),
            };
            match timeout(inner.options.write_wait, sink.send(Message::Close(Some(frame)))).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(url = %inner.url, error = %e, "Failed to send close frame"),
                Err(_) => debug!(url = %inner.url, "Close frame write timed out"),
            }
        }

        debug!(url = %inner.url, "Closing connection");
        let _ = timeout(inner.options.close_grace, inner.closed.cancelled()).await;

        {
            let mut writer = inner.writer.lock().await;
            if let Some(mut sink) = writer.take() {
                let _ = timeout(inner.options.write_wait, sink.close()).await;
            }
        }

        inner.shutdown.cancel();
        info!(url = %inner.url, "WebSocket client closed");
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("url", &self.inner.url)
            .field("pending", &self.pending_count())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Read Loop
// ============================================================================

/// Tokens and labels the read loop keeps without holding the client alive.
struct LoopSignals {
    url: String,
    shutdown: CancellationToken,
    closed: CancellationToken,
}

async fn read_loop(
    inner: Weak<ClientInner>,
    mut stream: SplitStream<WsStream>,
    on_message: Option<MessageHandler>,
    signals: LoopSignals,
) {
    let reason = loop {
        let next = tokio::select! {
            biased;
            () = signals.shutdown.cancelled() => break Error::ConnectionClosed,
            next = stream.next() => next,
        };

        let message = match next {
            None => break Error::ConnectionClosed,
            Some(Err(e)) => break Error::from(e),
            Some(Ok(message)) => message,
        };

        let Some(inner) = inner.upgrade() else {
            break Error::ConnectionClosed;
        };

        match &message {
            Message::Text(text) => inner.handle_frame(text.as_str().as_bytes(), on_message.as_ref()),
            Message::Binary(bytes) => inner.handle_frame(bytes, on_message.as_ref()),
            Message::Close(frame) => {
                break match frame {
                    Some(frame) => Error::closed_by_peer(u16::from(frame.code), frame.reason.as_str()),
                    None => Error::closed_by_peer(CLOSE_NO_STATUS, ""),
                };
            }
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
        }
    };

    signals.closed.cancel();

    let Some(inner) = inner.upgrade() else {
        debug!(url = %signals.url, "Client dropped, read loop terminated");
        return;
    };
    inner.fail_pending_requests();

    let handler = inner.on_server_close.lock().take();
    if reason.is_normal_closure() {
        debug!(url = %signals.url, "Server closed the connection normally");
        return;
    }

    match handler {
        Some(handler) => {
            warn!(url = %signals.url, error = %reason, "Reading stopped");
            handler(&reason);
        }
        None => debug!(url = %signals.url, error = %reason, "Read loop terminated"),
    }
}

impl ClientInner {
    /// Routes one inbound frame to its reply slot or the unsolicited handler.
    fn handle_frame(&self, frame: &[u8], on_message: Option<&MessageHandler>) {
        if frame.is_empty() {
            debug!(url = %self.url, "Received empty message");
            return;
        }

        match serde_json::from_slice::<Envelope>(frame) {
            Ok(reply) => {
                let slot = {
                    let mut correlations = self.correlations.lock();
                    match correlations.slots.remove(reply.id()) {
                        Some(slot) => Some(slot),
                        None if correlations.is_abandoned(reply.id()) => {
                            debug!(request_id = %reply.id(), "Dropping late reply");
                            return;
                        }
                        None => None,
                    }
                };

                match slot {
                    Some(slot) => {
                        let _ = slot.send(reply);
                    }
                    None => deliver_unsolicited(on_message, frame),
                }
            }
            // Valid JSON of another shape is still a message for the application.
            Err(e) if e.classify() == Category::Data => deliver_unsolicited(on_message, frame),
            Err(e) => {
                warn!(url = %self.url, error = %e, "Skipping undecodable message");
            }
        }
    }

    /// Drops every reply slot so waiting calls fail with `ConnectionClosed`.
    fn fail_pending_requests(&self) {
        let count = {
            let mut correlations = self.correlations.lock();
            let count = correlations.slots.len();
            correlations.slots.clear();
            count
        };

        if count > 0 {
            debug!(count, "Failed pending requests on shutdown");
        }
    }
}

/// Whole milliseconds of `duration`, clamped to `u64::MAX`.
fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn deliver_unsolicited(on_message: Option<&MessageHandler>, frame: &[u8]) {
    if let Some(handler) = on_message {
        handler(frame);
    }
}

// ============================================================================
// Tests
// ============================================================================
