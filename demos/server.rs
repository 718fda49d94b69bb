//! Demo server serving the same routes over HTTP and WebSocket.
//!
//! Demonstrates:
//! - Registering routes, with and without a method filter
//! - A `/help` route listing every route
//! - Streaming several responses to one socket request
//! - Session variables and close hooks
//!
//! Usage:
//!   cargo run --example server
//!   cargo run --example server -- --debug
//!
//! Then:
//!   curl http://127.0.0.1:3000/help
//!   cargo run --example client

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use axum::http::StatusCode;
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;
use wsrest::{Conn, Envelope, Result, Router, Server, simple_msg};

// ============================================================================
// Constants
// ============================================================================

const ADDR: &str = "127.0.0.1:3000";

// ============================================================================
// Handlers
// ============================================================================

async fn help(conn: Conn, request: Envelope) {
    let listing = conn.router().describe();
    let _ = conn.respond(request, &simple_msg(listing), StatusCode::OK).await;
}

async fn go(conn: Conn, request: Envelope) {
    let _ = conn.respond(request, &simple_msg("Hello"), StatusCode::OK).await;
}

async fn echo(conn: Conn, request: Envelope) {
    let body = json!({
        "method": request.method(),
        "resource": request.resource(),
        "data": request.payload_to_string(),
    });
    let _ = conn.respond(request, &body, StatusCode::OK).await;
}

/// Five updates one second apart; over HTTP only the first is delivered.
async fn ticker(conn: Conn, request: Envelope) {
    for tick in 1..=5 {
        if conn
            .respond_multiple(&request, &json!({ "tick": tick }), StatusCode::OK)
            .await
            .is_err()
        {
            return;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let debug = std::env::args().any(|a| a == "--debug");
    let filter = if debug { "wsrest=debug,server=debug" } else { "wsrest=info,server=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();

    let mut router = Router::new();
    router.handle("/help", help);
    router.handle("/go", go);
    router.handle("/echo", echo);
    router.handle("/ticker", ticker).method("GET");

    let server = Server::new(router).on_connect(|conn| {
        conn.set_var("connected_at", std::time::Instant::now());
        conn.add_close_hook(|conn| {
            let uptime = conn
                .get_var::<std::time::Instant>("connected_at")
                .map(|at| at.elapsed());
            info!(conn = %conn.id(), ?uptime, "Client ws disconnected");
        });
    });

    let addr = ADDR.parse().map_err(|e: std::net::AddrParseError| wsrest::Error::config(e.to_string()))?;
    let bound = server.bind(addr).await?;
    info!(http = %bound.http_url(), ws = %bound.ws_url(), "Demo server ready");

    bound
        .serve_with_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
}
