//! Socket transport tests: a real server driven by the crate's client.

mod common;

use std::time::{Duration, Instant};

use futures_util::future::join_all;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use wsrest::{Client, ClientOptions, ConnOptions, Envelope, Error, Server, ServerOptions};

use common::{SLOW_STREAM_DELAY, spawn, test_router};

const WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// Round trips
// ============================================================================

#[tokio::test]
async fn get_go_over_socket() -> anyhow::Result<()> {
    let server = spawn(Server::new(test_router())).await;
    let client = Client::dial(&server.ws_url).await?;

    let reply = client.get("/go", &()).await?;
    assert_eq!(reply.code(), 200);
    assert_eq!(reply.payload(), br#"{"message":"Hello"}"#);

    client.close().await;
    Ok(())
}

#[tokio::test]
async fn socket_and_http_return_the_same_payload() -> anyhow::Result<()> {
    let server = spawn(Server::new(test_router())).await;
    let client = Client::dial(&server.ws_url).await?;

    let over_socket = client.get("/go", &()).await?;
    let over_http = reqwest::get(format!("{}/go", server.http_url)).await?;

    assert_eq!(over_http.status().as_u16(), over_socket.code());
    assert_eq!(over_http.bytes().await?.as_ref(), over_socket.payload());

    client.close().await;
    Ok(())
}

#[tokio::test]
async fn object_scenario_over_socket() -> anyhow::Result<()> {
    let server = spawn(Server::new(test_router())).await;
    let client = Client::dial(&server.ws_url).await?;
    let object = json!({ "Stringer": "x", "Integer": 10, "Floater": 1.13 });

    let created = client.post("/object", &object).await?;
    assert_eq!(created.code(), 200);

    let fetched = client.get("/object", &()).await?;
    assert_eq!(fetched.code(), 200);
    assert_eq!(fetched.unmarshal_payload::<Value>()?, object);

    let deleted = client.delete("/object", &()).await?;
    assert_eq!(deleted.code(), 200);

    let missing = client.get("/object", &()).await?;
    assert_eq!(missing.code(), 404);
    assert_eq!(missing.payload(), br#"{"message":"Not found"}"#);

    client.close().await;
    Ok(())
}

#[tokio::test]
async fn concurrent_calls_never_cross_deliver() -> anyhow::Result<()> {
    let server = spawn(Server::new(test_router())).await;
    let client = Client::dial(&server.ws_url).await?;

    let calls = (0..64).map(|nonce| {
        let client = client.clone();
        async move {
            let resource = format!("/echo?nonce={nonce}");
            let request = Envelope::new("GET", resource.as_str());
            let id = request.id().clone();
            let reply = client.call(request).await?;
            anyhow::Ok((resource, id, reply))
        }
    });

    for result in join_all(calls).await {
        let (resource, id, reply) = result?;
        assert_eq!(reply.id(), &id);
        let body: Value = reply.unmarshal_payload()?;
        assert_eq!(body["resource"], resource.as_str());
    }
    assert_eq!(client.pending_count(), 0);

    client.close().await;
    Ok(())
}

// ============================================================================
// Routing over the socket
// ============================================================================

#[tokio::test]
async fn unknown_route_replies_404() -> anyhow::Result<()> {
    let server = spawn(Server::new(test_router())).await;
    let client = Client::dial(&server.ws_url).await?;

    let reply = client.get("/nowhere", &()).await?;
    assert_eq!(reply.code(), 404);
    assert_eq!(reply.payload(), br#"{"message":"Resource not found"}"#);

    client.close().await;
    Ok(())
}

#[tokio::test]
async fn method_filter_mismatch_is_404() -> anyhow::Result<()> {
    let server = spawn(Server::new(test_router())).await;
    let client = Client::dial(&server.ws_url).await?;

    assert_eq!(client.get("/post-only", &()).await?.code(), 404);
    assert_eq!(client.post("/post-only", &()).await?.code(), 200);

    client.close().await;
    Ok(())
}

// ============================================================================
// Timeouts and closing
// ============================================================================

#[tokio::test]
async fn unanswered_call_times_out_and_frees_its_slot() -> anyhow::Result<()> {
    let server = spawn(Server::new(test_router())).await;
    let request_timeout = Duration::from_millis(200);
    let client = Client::builder(&server.ws_url)
        .options(ClientOptions::new().with_request_timeout(request_timeout))
        .connect()
        .await?;

    let started = Instant::now();
    let err = client.get("/silent", &()).await.expect_err("no reply");

    assert!(err.is_timeout(), "unexpected error: {err}");
    assert!(started.elapsed() >= request_timeout);
    assert_eq!(client.pending_count(), 0);

    // The connection stays usable.
    assert_eq!(client.get("/go", &()).await?.code(), 200);

    client.close().await;
    Ok(())
}

#[tokio::test]
async fn late_replies_after_timeout_are_dropped() -> anyhow::Result<()> {
    let server = spawn(Server::new(test_router())).await;
    let (push_tx, mut push_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let client = Client::builder(&server.ws_url)
        .options(ClientOptions::new().with_request_timeout(Duration::from_millis(100)))
        .on_message(move |frame| {
            let _ = push_tx.send(frame.to_vec());
        })
        .connect()
        .await?;

    let err = client.get("/slowstream", &()).await.expect_err("too slow");
    assert!(err.is_timeout(), "unexpected error: {err}");

    // Replies on one socket arrive in order, so once this call returns the
    // whole late stream has been read.
    tokio::time::sleep(SLOW_STREAM_DELAY * 2).await;
    assert_eq!(client.get("/go", &()).await?.code(), 200);

    assert!(push_rx.try_recv().is_err(), "late reply reached the message handler");
    assert_eq!(client.pending_count(), 0);

    client.close().await;
    Ok(())
}

#[tokio::test]
async fn call_after_close_fails_fast() -> anyhow::Result<()> {
    let server = spawn(Server::new(test_router())).await;
    let client = Client::dial(&server.ws_url).await?;
    client.close().await;

    let err = timeout(WAIT, client.get("/go", &()))
        .await?
        .expect_err("closed");
    assert!(matches!(err, Error::ConnectionClosed), "unexpected error: {err}");
    Ok(())
}

#[tokio::test]
async fn pending_bound_is_enforced() -> anyhow::Result<()> {
    let server = spawn(Server::new(test_router())).await;
    let client = Client::builder(&server.ws_url)
        .options(
            ClientOptions::new()
                .with_max_pending_requests(1)
                .with_request_timeout(Duration::from_millis(500)),
        )
        .connect()
        .await?;

    let waiting = {
        let client = client.clone();
        tokio::spawn(async move { client.get("/silent", &()).await })
    };
    while client.pending_count() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let err = client.get("/go", &()).await.expect_err("bounded");
    assert!(matches!(err, Error::TooManyPending { pending: 1, max: 1 }));
    assert!(waiting.await?.expect_err("silent").is_timeout());

    client.close().await;
    Ok(())
}

#[tokio::test]
async fn server_initiated_close_notifies_client() -> anyhow::Result<()> {
    let server = spawn(Server::new(test_router())).await;
    let (closed_tx, mut closed_rx) = mpsc::unbounded_channel();
    let client = Client::builder(&server.ws_url)
        .on_server_close(move |err| {
            let _ = closed_tx.send(err.to_string());
        })
        .connect()
        .await?;

    let err = client.get("/kick", &()).await.expect_err("kicked");
    assert!(err.is_closed(), "unexpected error: {err}");

    let notice = timeout(WAIT, closed_rx.recv()).await?;
    assert!(notice.is_some());
    assert!(client.is_closed());
    Ok(())
}

#[tokio::test]
async fn client_close_does_not_notify_server_close_handler() -> anyhow::Result<()> {
    let server = spawn(Server::new(test_router())).await;
    let (closed_tx, mut closed_rx) = mpsc::unbounded_channel::<String>();
    let client = Client::builder(&server.ws_url)
        .on_server_close(move |err| {
            let _ = closed_tx.send(err.to_string());
        })
        .connect()
        .await?;

    client.close().await;

    // The sender lives in the dropped handler, so the channel ends empty.
    assert_eq!(timeout(WAIT, closed_rx.recv()).await?, None);
    Ok(())
}

#[tokio::test]
async fn dropping_every_handle_releases_the_socket() -> anyhow::Result<()> {
    let (hook_tx, mut hook_rx) = mpsc::unbounded_channel();
    let server = Server::new(test_router()).on_connect(move |conn| {
        let hook_tx = hook_tx.clone();
        conn.add_close_hook(move |conn| {
            let _ = hook_tx.send(conn.id());
        });
    });
    let server = spawn(server).await;

    let client = Client::dial(&server.ws_url).await?;
    assert_eq!(client.get("/go", &()).await?.code(), 200);
    drop(client);

    assert!(timeout(WAIT, hook_rx.recv()).await?.is_some());
    Ok(())
}

// ============================================================================
// Keepalive
// ============================================================================

fn short_keepalive() -> ServerOptions {
    ServerOptions::new().with_conn(ConnOptions::new().with_pong_wait(Duration::from_millis(300)))
}

#[tokio::test]
async fn silent_peer_is_pinged_then_dropped() -> anyhow::Result<()> {
    let (hook_tx, mut hook_rx) = mpsc::unbounded_channel();
    let server = Server::new(test_router())
        .with_options(short_keepalive())
        .on_connect(move |conn| {
            let hook_tx = hook_tx.clone();
            conn.add_close_hook(move |_| {
                let _ = hook_tx.send(());
            });
        });
    let server = spawn(server).await;
    let (mut socket, _) = connect_async(server.ws_url.as_str()).await?;

    // Not polling the socket means no pong is ever sent.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(timeout(WAIT, hook_rx.recv()).await?.is_some());

    let mut saw_ping = false;
    let mut saw_close = false;
    while let Ok(next) = timeout(WAIT, socket.next()).await {
        match next {
            Some(Ok(Message::Ping(_))) => saw_ping = true,
            Some(Ok(Message::Close(_))) => {
                saw_close = true;
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(_)) | None => break,
        }
    }
    assert!(saw_ping, "no keepalive ping before teardown");
    assert!(saw_close, "connection was not closed");
    Ok(())
}

#[tokio::test]
async fn answering_pings_keeps_the_connection_alive() -> anyhow::Result<()> {
    let server = spawn(Server::new(test_router()).with_options(short_keepalive())).await;
    let client = Client::dial(&server.ws_url).await?;

    // The read loop answers pings, so each pong pushes the deadline out.
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(!client.is_closed());
    assert_eq!(client.get("/go", &()).await?.code(), 200);

    client.close().await;
    Ok(())
}

// ============================================================================
// Unsolicited messages and session state
// ============================================================================

#[tokio::test]
async fn extra_responses_reach_the_message_handler() -> anyhow::Result<()> {
    let server = spawn(Server::new(test_router())).await;
    let (push_tx, mut push_rx) = mpsc::unbounded_channel();
    let client = Client::dial_with_handler(&server.ws_url, move |frame| {
        let _ = push_tx.send(frame.to_vec());
    })
    .await?;

    let request = Envelope::new("GET", "/stream");
    let id = request.id().clone();
    let first = client.call(request).await?;
    assert_eq!(first.unmarshal_payload::<Value>()?, json!({ "step": 0 }));

    for step in 1..3 {
        let frame = timeout(WAIT, push_rx.recv()).await?.expect("push");
        let update = Envelope::decode(&frame)?;
        assert_eq!(update.id(), &id);
        assert_eq!(update.unmarshal_payload::<Value>()?, json!({ "step": step }));
    }

    client.close().await;
    Ok(())
}

#[tokio::test]
async fn session_variables_and_close_hooks() -> anyhow::Result<()> {
    let (hook_tx, mut hook_rx) = mpsc::unbounded_channel();
    let server = Server::new(test_router()).on_connect(move |conn| {
        conn.set_var("user", "alice".to_string());
        let hook_tx = hook_tx.clone();
        conn.add_close_hook(move |conn| {
            let _ = hook_tx.send(conn.get_var::<String>("user"));
        });
    });
    let server = spawn(server).await;
    let client = Client::dial(&server.ws_url).await?;

    let reply = client.get("/whoami", &()).await?;
    assert_eq!(reply.payload(), br#"{"message":"alice"}"#);

    client.close().await;
    let seen = timeout(WAIT, hook_rx.recv()).await?;
    assert_eq!(seen, Some(Some("alice".to_string())));
    Ok(())
}

// ============================================================================
// Payload bytes
// ============================================================================

#[tokio::test]
async fn payload_bytes_reach_the_handler_unchanged() -> anyhow::Result<()> {
    let server = spawn(Server::new(test_router())).await;
    let client = Client::dial(&server.ws_url).await?;

    let reply = client.post("/capture", "hello").await?;
    assert_eq!(reply.unmarshal_payload::<Vec<u8>>()?, b"hello");

    let mut request = Envelope::new("POST", "/capture");
    request.set_payload_raw(vec![0xff, 0x00, 0x41]);
    let reply = client.call(request).await?;
    assert_eq!(reply.unmarshal_payload::<Vec<u8>>()?, [0xff, 0x00, 0x41]);

    let reply = client.post("/capture", &json!({ "k": "v" })).await?;
    assert_eq!(reply.unmarshal_payload::<Vec<u8>>()?, br#"{"k":"v"}"#);

    client.close().await;
    Ok(())
}

// ============================================================================
// Raw frames
// ============================================================================

#[tokio::test]
async fn malformed_frame_does_not_end_the_connection() -> anyhow::Result<()> {
    let server = spawn(Server::new(test_router())).await;
    let (mut socket, _) = connect_async(server.ws_url.as_str()).await?;

    socket.send(Message::Text("this is not an envelope".into())).await?;

    let request = Envelope::new("GET", "/go");
    let frame = String::from_utf8(request.encode()?)?;
    socket.send(Message::Text(frame.into())).await?;

    let reply = loop {
        match timeout(WAIT, socket.next()).await? {
            Some(Ok(Message::Text(text))) => break Envelope::decode(text.as_str().as_bytes())?,
            Some(Ok(_)) => continue,
            other => anyhow::bail!("socket ended early: {other:?}"),
        }
    };

    assert_eq!(reply.id(), request.id());
    assert_eq!(reply.code(), 200);
    assert_eq!(reply.payload(), br#"{"message":"Hello"}"#);
    Ok(())
}

#[tokio::test]
async fn wire_fields_are_contractual() -> anyhow::Result<()> {
    let server = spawn(Server::new(test_router())).await;
    let (mut socket, _) = connect_async(server.ws_url.as_str()).await?;

    let raw = r#"{"requestid":"raw-1","method":"GET","resource":"/echo?x=1","code":0}"#;
    socket.send(Message::Text(raw.into())).await?;

    let reply: Value = loop {
        match timeout(WAIT, socket.next()).await? {
            Some(Ok(Message::Text(text))) => break serde_json::from_str(text.as_str())?,
            Some(Ok(_)) => continue,
            other => anyhow::bail!("socket ended early: {other:?}"),
        }
    };

    assert_eq!(reply["requestid"], "raw-1");
    assert_eq!(reply["method"], "GET");
    assert_eq!(reply["resource"], "/echo?x=1");
    assert_eq!(reply["code"], 200);
    assert_eq!(reply["data"], json!({ "resource": "/echo?x=1" }));
    Ok(())
}
