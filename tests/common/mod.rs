//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;
use wsrest::{Conn, Envelope, Router, Server, simple_msg};

/// Addresses of a running test server.
pub struct TestServer {
    pub ws_url: String,
    pub http_url: String,
}

/// Installs a test log subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Binds `server` on a free local port and serves it in the background.
pub async fn spawn(server: Server) -> TestServer {
    init_tracing();

    let bound = server
        .bind("127.0.0.1:0".parse().unwrap())
        .await
        .expect("bind test server");
    let addrs = TestServer {
        ws_url: bound.ws_url(),
        http_url: bound.http_url(),
    };

    tokio::spawn(bound.serve());
    addrs
}

/// Delay before `/slowstream` starts answering.
pub const SLOW_STREAM_DELAY: Duration = Duration::from_millis(300);

/// Routes used across the integration tests.
///
/// | Path | Behaviour |
/// |------|-----------|
/// | `/go` | `{"message":"Hello"}` |
/// | `/object` | in-memory object: POST/PUT store, GET read, DELETE clear |
/// | `/echo` | `{"resource": <request resource>}` |
/// | `/post-only` | POST only, `{"message":"posted"}` |
/// | `/silent` | never responds |
/// | `/stream` | three responses `{"step": n}` to one request |
/// | `/slowstream` | waits [`SLOW_STREAM_DELAY`], then streams like `/stream` |
/// | `/capture` | the request payload bytes as a JSON array |
/// | `/whoami` | `{"message": <session variable "user">}` |
/// | `/kick` | closes the connection |
pub fn test_router() -> Router {
    let mut router = Router::new();

    router.handle("/go", |conn: Conn, req: Envelope| async move {
        let _ = conn.respond(req, &simple_msg("Hello"), StatusCode::OK).await;
    });

    let store: Arc<Mutex<Option<Value>>> = Arc::default();
    router.handle("/object", move |conn: Conn, req: Envelope| {
        let store = Arc::clone(&store);
        async move {
            match req.method() {
                "POST" | "PUT" => match req.unmarshal_payload::<Value>() {
                    Ok(value) => {
                        *store.lock() = Some(value.clone());
                        let _ = conn.respond(req, &value, StatusCode::OK).await;
                    }
                    Err(_) => {
                        let _ = conn
                            .respond(req, &simple_msg("Bad data"), StatusCode::BAD_REQUEST)
                            .await;
                    }
                },
                "DELETE" => {
                    store.lock().take();
                    let _ = conn.respond(req, &simple_msg("Deleted"), StatusCode::OK).await;
                }
                _ => {
                    let stored = store.lock().clone();
                    match stored {
                        Some(value) => {
                            let _ = conn.respond(req, &value, StatusCode::OK).await;
                        }
                        None => {
                            let _ = conn
                                .respond(req, &simple_msg("Not found"), StatusCode::NOT_FOUND)
                                .await;
                        }
                    }
                }
            }
        }
    });

    router.handle("/echo", |conn: Conn, req: Envelope| async move {
        let body = json!({ "resource": req.resource() });
        let _ = conn.respond(req, &body, StatusCode::OK).await;
    });

    router
        .handle("/post-only", |conn: Conn, req: Envelope| async move {
            let _ = conn.respond(req, &simple_msg("posted"), StatusCode::OK).await;
        })
        .method("POST");

    router.handle("/silent", |_conn: Conn, _req: Envelope| async {});

    router.handle("/stream", |conn: Conn, req: Envelope| async move {
        for step in 0..3 {
            let update = json!({ "step": step });
            if conn.respond_multiple(&req, &update, StatusCode::OK).await.is_err() {
                return;
            }
        }
    });

    router.handle("/slowstream", |conn: Conn, req: Envelope| async move {
        tokio::time::sleep(SLOW_STREAM_DELAY).await;
        for step in 0..3 {
            let update = json!({ "step": step });
            if conn.respond_multiple(&req, &update, StatusCode::OK).await.is_err() {
                return;
            }
        }
    });

    router.handle("/capture", |conn: Conn, req: Envelope| async move {
        let bytes = req.payload().to_vec();
        let _ = conn.respond(req, &bytes, StatusCode::OK).await;
    });

    router.handle("/whoami", |conn: Conn, req: Envelope| async move {
        let user = conn.get_var::<String>("user").unwrap_or_default();
        let _ = conn.respond(req, &simple_msg(user), StatusCode::OK).await;
    });

    router.handle("/kick", |conn: Conn, _req: Envelope| async move {
        conn.close();
    });

    router
}
