//! Exact-path routing table shared by both transports.
//!
//! # Matching
//!
//! - Exact path string only: no prefixes, wildcards or parameters.
//! - A route may restrict itself to one method; a mismatch is reported
//!   exactly like an unknown path.
//! - Registering the same path twice replaces the earlier route.
//!
//! # Example
//!
//! ```ignore
//! use axum::http::StatusCode;
//! use wsrest::{Router, simple_msg};
//!
//! let mut router = Router::new();
//! router.handle("/hello", |conn, req| async move {
//!     let _ = conn.respond(req, &simple_msg("Hello"), StatusCode::OK).await;
//! });
//! router.handle("/admin", admin_handler).method("POST");
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::collections::hash_map::Entry;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::protocol::Envelope;
use crate::transport::Conn;

// ============================================================================
// Types
// ============================================================================

/// Future returned by a route handler.
pub type HandlerFuture = BoxFuture<'static, ()>;

/// Type-erased route handler.
///
/// Receives the connection as context and the decoded request; answers
/// through [`Conn::respond`].
pub type Handler = Arc<dyn Fn(Conn, Envelope) -> HandlerFuture + Send + Sync>;

// ============================================================================
// Route
// ============================================================================

/// A registered path with its optional method filter and handler.
#[derive(Clone)]
pub struct Route {
    path: String,
    method: String,
    handler: Handler,
}

impl Route {
    /// Restricts the route to a single method.
    pub fn method(&mut self, method: impl Into<String>) -> &mut Self {
        self.method = method.into();
        self
    }

    /// Returns the registered path.
    #[inline]
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the method filter (empty means any method).
    #[inline]
    #[must_use]
    pub fn method_filter(&self) -> &str {
        &self.method
    }

    /// Returns `true` if `method` passes the filter.
    #[inline]
    #[must_use]
    pub fn accepts(&self, method: &str) -> bool {
        self.method.is_empty() || self.method == method
    }

    /// Runs the handler to completion.
    pub async fn run(&self, conn: Conn, request: Envelope) {
        (self.handler)(conn, request).await;
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("path", &self.path)
            .field("method", &self.method)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Router
// ============================================================================

/// Routing table keyed by exact path.
///
/// Built once at startup, then shared immutably (behind an `Arc`) by every
/// connection.
#[derive(Clone, Default)]
pub struct Router {
    routes: FxHashMap<String, Route>,
}

impl Router {
    /// Creates an empty router.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `path`, replacing any previous route.
    ///
    /// Returns the route so a method filter can be chained.
    pub fn handle<F, Fut>(&mut self, path: impl Into<String>, handler: F) -> &mut Route
    where
        F: Fn(Conn, Envelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let path = path.into();
        let handler: Handler =
            Arc::new(move |conn: Conn, request: Envelope| -> HandlerFuture {
                Box::pin(handler(conn, request))
            });
        let route = Route {
            path: path.clone(),
            method: String::new(),
            handler,
        };

        match self.routes.entry(path) {
            Entry::Occupied(mut slot) => {
                *slot.get_mut() = route;
                slot.into_mut()
            }
            Entry::Vacant(slot) => slot.insert(route),
        }
    }

    /// Looks up the route for an exact path, honouring its method filter.
    #[must_use]
    pub fn match_route(&self, path: &str, method: &str) -> Option<&Route> {
        self.routes.get(path).filter(|route| route.accepts(method))
    }

    /// Like [`Router::match_route`] but reports a miss as an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown path or a filtered method.
    pub fn resolve(&self, path: &str, method: &str) -> Result<&Route> {
        self.match_route(path, method)
            .ok_or_else(|| Error::not_found(path, method))
    }

    /// Lists routes as `path\tmethod` lines, paths in descending order.
    #[must_use]
    pub fn describe(&self) -> String {
        let mut sorted: Vec<&Route> = self.routes.values().collect();
        sorted.sort_by(|a, b| b.path.cmp(&a.path));

        sorted
            .into_iter()
            .map(|route| format!("{}\t{}\n", route.path, route.method))
            .collect()
    }

    /// Returns the number of registered routes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns `true` if no routes are registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl fmt::Display for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("routes", &self.routes.len())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
