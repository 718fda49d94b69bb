//! Dual-transport server.
//!
//! One listener serves both transports: requests to the upgrade path become
//! WebSocket connections, every other request is routed as plain HTTP.
//!
//! # Connection Flow
//!
//! 1. `Server::bind` binds a TCP listener (port 0 picks a free port)
//! 2. `BoundServer::serve` runs the accept loop
//! 3. Upgrade requests get a socket [`Conn`] and a pump pair
//! 4. Other requests get a one-shot HTTP [`Conn`]
//!
//! # Example
//!
//! ```ignore
//! use wsrest::{Router, Server};
//!
//! let mut router = Router::new();
//! router.handle("/go", go_handler);
//!
//! let bound = Server::new(router).bind("127.0.0.1:8080".parse()?).await?;
//! println!("socket at {}", bound.ws_url());
//! bound.serve().await?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::future::{Future, pending};
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router as HttpRouter;
use axum::body::to_bytes;
use axum::extract::connect_info::ConnectInfo;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Request, State};
use axum::http::{Extensions, HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::Result;
use crate::protocol::{JsonMarshaler, Marshaler, simple_msg};
use crate::router::Router;
use crate::transport::conn::Conn;
use crate::transport::options::ServerOptions;
use crate::transport::pump;

// ============================================================================
// Types
// ============================================================================

/// Callback run for every new socket connection, before its first frame.
pub type ConnectHook = Arc<dyn Fn(&Conn) + Send + Sync>;

/// Immutable state shared by every request.
struct Shared {
    router: Arc<Router>,
    options: ServerOptions,
    marshaler: Arc<dyn Marshaler>,
    on_connect: Option<ConnectHook>,
}

// ============================================================================
// Server
// ============================================================================

/// Server configuration: routes, options, payload encoding and hooks.
///
/// Built once at startup; stateless after construction.
#[derive(Clone)]
pub struct Server {
    router: Arc<Router>,
    options: ServerOptions,
    marshaler: Arc<dyn Marshaler>,
    on_connect: Option<ConnectHook>,
}

impl Server {
    /// Creates a server for `router` with default options.
    #[must_use]
    pub fn new(router: Router) -> Self {
        Self {
            router: Arc::new(router),
            options: ServerOptions::default(),
            marshaler: Arc::new(JsonMarshaler),
            on_connect: None,
        }
    }

    /// Replaces the server options.
    #[inline]
    #[must_use]
    pub fn with_options(mut self, options: ServerOptions) -> Self {
        self.options = options;
        self
    }

    /// Replaces the payload marshaler used by every connection.
    #[inline]
    #[must_use]
    pub fn with_marshaler(mut self, marshaler: impl Marshaler + 'static) -> Self {
        self.marshaler = Arc::new(marshaler);
        self
    }

    /// Registers a callback for new socket connections.
    ///
    /// Typical use is installing close hooks or session variables.
    #[must_use]
    pub fn on_connect<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Conn) + Send + Sync + 'static,
    {
        self.on_connect = Some(Arc::new(hook));
        self
    }

    /// Returns the routing table.
    #[inline]
    #[must_use]
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Builds the HTTP application serving both transports.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] if the options are invalid.
    pub fn into_app(self) -> Result<HttpRouter> {
        self.options.validate()?;

        let upgrade_path = self.options.upgrade_path.clone();
        let shared = Arc::new(Shared {
            router: self.router,
            options: self.options,
            marshaler: self.marshaler,
            on_connect: self.on_connect,
        });

        Ok(HttpRouter::new()
            .route(&upgrade_path, any(upgrade_handler))
            .fallback(rest_handler)
            .with_state(shared))
    }

    /// Binds a listener to `addr`.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::Io`] if binding fails
    /// - [`crate::Error::Config`] if the options are invalid
    pub async fn bind(self, addr: SocketAddr) -> Result<BoundServer> {
        let listener = TcpListener::bind(addr).await?;
        self.listen(listener)
    }

    /// Uses an already bound listener.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::Io`] if the listener has no local address
    /// - [`crate::Error::Config`] if the options are invalid
    pub fn listen(self, listener: TcpListener) -> Result<BoundServer> {
        let local_addr = listener.local_addr()?;
        let upgrade_path = self.options.upgrade_path.clone();
        let app = self.into_app()?;

        debug!(addr = %local_addr, "Server bound");

        Ok(BoundServer {
            listener,
            local_addr,
            upgrade_path,
            app,
        })
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("routes", &self.router.len())
            .field("options", &self.options)
            .field("marshaler", &self.marshaler)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// BoundServer
// ============================================================================

/// A server bound to a local address but not yet accepting.
pub struct BoundServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    upgrade_path: String,
    app: HttpRouter,
}

impl BoundServer {
    /// Returns the bound address.
    #[inline]
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the base URL for plain HTTP requests.
    ///
    /// Format: `http://{addr}`
    #[inline]
    #[must_use]
    pub fn http_url(&self) -> String {
        format!("http://{}", self.local_addr)
    }

    /// Returns the WebSocket URL of the upgrade path.
    ///
    /// Format: `ws://{addr}{upgrade_path}`
    #[inline]
    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://{}{}", self.local_addr, self.upgrade_path)
    }

    /// Serves until the process exits.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Io`] if the accept loop fails.
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(pending()).await
    }

    /// Serves until `signal` completes, then stops accepting.
    ///
    /// Open socket connections are not waited for.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Io`] if the accept loop fails.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!(addr = %self.local_addr, upgrade_path = %self.upgrade_path, "Server listening");

        axum::serve(
            self.listener,
            self.app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await?;

        info!(addr = %self.local_addr, "Server stopped");
        Ok(())
    }
}

// ============================================================================
// Request Handlers
// ============================================================================

async fn upgrade_handler(
    State(shared): State<Arc<Shared>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
    request: Request,
) -> Response {
    if !shared.options.allow_any_origin && !same_origin(&headers) {
        warn!(origin = ?headers.get(header::ORIGIN), "Rejected cross-origin upgrade");
        return (StatusCode::FORBIDDEN, "origin not allowed").into_response();
    }

    let remote_addr = peer_addr(request.extensions());
    ws.max_message_size(shared.options.conn.max_message_size)
        .on_upgrade(move |socket| serve_socket(shared, socket, remote_addr))
}

async fn rest_handler(State(shared): State<Arc<Shared>>, request: Request) -> Response {
    let remote_addr = peer_addr(request.extensions());
    let method = request.method().to_string();
    let target = request
        .uri()
        .path_and_query()
        .map_or_else(|| request.uri().path().to_string(), |pq| pq.as_str().to_string());

    let body = match to_bytes(request.into_body(), shared.options.conn.max_message_size).await {
        Ok(body) => body,
        Err(e) => {
            warn!(method = %method, path = %target, error = %e, "Failed to read HTTP body");
            let message = simple_msg(format!("Bad request: {e}"));
            return (StatusCode::BAD_REQUEST, axum::Json(message)).into_response();
        }
    };

    let (conn, mut reply_rx) = Conn::rest(
        Arc::clone(&shared.router),
        Arc::clone(&shared.marshaler),
        method,
        target,
        remote_addr,
    );
    conn.handle_rest_connection(&body).await;

    match reply_rx.try_recv() {
        Ok(reply) => (
            reply.status,
            [(header::CONTENT_TYPE, reply.content_type)],
            reply.body,
        )
            .into_response(),
        Err(_) => StatusCode::OK.into_response(),
    }
}

/// Runs one upgraded socket until both pumps exit, then closes it.
async fn serve_socket(shared: Arc<Shared>, socket: WebSocket, remote_addr: Option<SocketAddr>) {
    let stop = CancellationToken::new();
    let (conn, outbound) = Conn::socket(
        Arc::clone(&shared.router),
        Arc::clone(&shared.marshaler),
        &shared.options.conn,
        remote_addr,
        stop.clone(),
    );

    info!(conn = %conn.id(), remote = ?remote_addr, "WebSocket connection established");

    if let Some(hook) = &shared.on_connect {
        hook(&conn);
    }

    pump::run(&conn, socket, outbound, stop, &shared.options.conn).await;
    conn.close();
}

// ============================================================================
// Helpers
// ============================================================================

fn peer_addr(extensions: &Extensions) -> Option<SocketAddr> {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

/// Browsers always send `Origin`; other clients may omit it.
fn same_origin(headers: &HeaderMap) -> bool {
    let Some(origin) = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok()) else {
        return true;
    };
    let Some(host) = headers.get(header::HOST).and_then(|v| v.to_str().ok()) else {
        return false;
    };

    let Ok(url) = Url::parse(origin) else {
        return false;
    };
    let authority = match (url.host_str(), url.port()) {
        (Some(name), Some(port)) => format!("{name}:{port}"),
        (Some(name), None) => name.to_string(),
        (None, _) => return false,
    };
    authority.eq_ignore_ascii_case(host)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use axum::http::HeaderValue;

    fn headers(origin: Option<&'static str>, host: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static(host));
        if let Some(origin) = origin {
            headers.insert(header::ORIGIN, HeaderValue::from_static(origin));
        }
        headers
    }

    #[test]
    fn test_same_origin() {
        assert!(same_origin(&headers(None, "example.com")));
        assert!(same_origin(&headers(Some("http://example.com"), "example.com")));
        assert!(same_origin(&headers(Some("https://Example.com:8443"), "example.com:8443")));
        assert!(!same_origin(&headers(Some("http://evil.com"), "example.com")));
        assert!(!same_origin(&headers(Some("not a url"), "example.com")));
    }

    #[test]
    fn test_invalid_options_rejected() {
        let server = Server::new(Router::new())
            .with_options(ServerOptions::new().with_upgrade_path("socket"));
        assert!(server.into_app().is_err());
    }

    #[tokio::test]
    async fn test_bound_urls() {
        let bound = Server::new(Router::new())
            .bind("127.0.0.1:0".parse().expect("addr"))
            .await
            .expect("bind");

        let port = bound.local_addr().port();
        assert_ne!(port, 0);
        assert_eq!(bound.ws_url(), format!("ws://127.0.0.1:{port}/ws"));
        assert_eq!(bound.http_url(), format!("http://127.0.0.1:{port}"));
    }
}
