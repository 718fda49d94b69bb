//! Demo client for the demo server.
//!
//! Demonstrates:
//! - Dialing with an unsolicited-message handler
//! - Plain calls and calls with a payload
//! - Receiving extra responses pushed for an earlier request
//!
//! Usage:
//!   cargo run --example server
//!   cargo run --example client

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use serde_json::json;
use tracing_subscriber::EnvFilter;
use wsrest::{Client, Envelope, Result};

// ============================================================================
// Constants
// ============================================================================

const URL: &str = "ws://127.0.0.1:3000/ws";

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("wsrest=info"))
        .with_target(false)
        .init();

    let client = Client::dial_with_handler(URL, |frame| match Envelope::decode(frame) {
        Ok(push) => println!("push {}: {}", push.resource(), push.payload_to_string()),
        Err(_) => println!("push: {}", String::from_utf8_lossy(frame)),
    })
    .await?;
    client.set_server_close_handler(|err| eprintln!("server closed the connection: {err}"));

    let help = client.execute("GET", "/help", "").await?;
    println!("routes:\n{}", help.unmarshal_payload::<wsrest::SimpleMessage>()?.message);

    let echo = client.post("/echo?from=client", &json!({ "hello": "world" })).await?;
    println!("echo ({}): {}", echo.code(), echo.payload_to_string());

    let first = client.get("/ticker", &()).await?;
    println!("ticker ({}): {}", first.code(), first.payload_to_string());
    tokio::time::sleep(Duration::from_secs(5)).await;

    client.close().await;
    Ok(())
}
