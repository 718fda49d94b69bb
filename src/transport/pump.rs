//! Read and write pumps of a socket connection.
//!
//! # Loops
//!
//! | Pump | Waits on | Exits on |
//! |------|----------|----------|
//! | read | next frame, read deadline, stop signal | read error, deadline, close frame |
//! | write | outbound queue, ping ticker, stop signal | write error, stop signal, closed queue |
//!
//! The read pump is the only one that fires the stop signal on its own
//! failure; the write pump follows it. The write pump is the single writer
//! on the socket and closes it on exit.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::http::StatusCode;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Semaphore, mpsc};
use tokio::time::{self, Instant, MissedTickBehavior, timeout, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::identifiers::ConnectionId;
use crate::protocol::{Envelope, simple_msg};
use crate::transport::conn::Conn;
use crate::transport::options::ConnOptions;

// ============================================================================
// Entry Point
// ============================================================================

/// Runs both pumps until the connection shuts down.
///
/// Returns once the read pump has exited and the write pump has closed the
/// socket.
pub(crate) async fn run(
    conn: &Conn,
    socket: WebSocket,
    outbound: mpsc::Receiver<Vec<u8>>,
    stop: CancellationToken,
    options: &ConnOptions,
) {
    let (sink, stream) = socket.split();

    let writer = tokio::spawn(write_pump(
        conn.id(),
        sink,
        outbound,
        stop.clone(),
        options.clone(),
    ));

    read_pump(conn, stream, &stop, options).await;

    if let Err(e) = writer.await {
        warn!(conn = %conn.id(), error = %e, "Write pump task failed");
    }
}

// ============================================================================
// Read Pump
// ============================================================================

async fn read_pump(
    conn: &Conn,
    mut stream: SplitStream<WebSocket>,
    stop: &CancellationToken,
    options: &ConnOptions,
) {
    let admission = Arc::new(Semaphore::new(options.max_inflight_handlers));
    let mut deadline = Instant::now() + options.pong_wait;

    debug!(conn = %conn.id(), "Read pump started");

    loop {
        let next = tokio::select! {
            biased;

            () = stop.cancelled() => {
                debug!(conn = %conn.id(), "Read pump stopped");
                break;
            }

            next = timeout_at(deadline, stream.next()) => next,
        };

        let message = match next {
            Err(_) => {
                debug!(conn = %conn.id(), "Read deadline expired");
                break;
            }
            Ok(None) => {
                debug!(conn = %conn.id(), "Socket stream ended");
                break;
            }
            Ok(Some(Err(e))) => {
                debug!(conn = %conn.id(), error = %e, "Socket read failed");
                break;
            }
            Ok(Some(Ok(message))) => message,
        };

        match message {
            Message::Text(text) => {
                dispatch(conn, text.as_str().as_bytes(), &admission, stop).await;
            }
            Message::Binary(bytes) => {
                dispatch(conn, &bytes, &admission, stop).await;
            }
            Message::Pong(_) => {
                deadline = Instant::now() + options.pong_wait;
                trace!(conn = %conn.id(), "Pong received");
            }
            Message::Ping(_) => {}
            Message::Close(frame) => {
                debug!(conn = %conn.id(), ?frame, "Close frame received");
                break;
            }
        }
    }

    stop.cancel();
}

/// Decodes one frame and hands it to its handler task.
async fn dispatch(
    conn: &Conn,
    frame: &[u8],
    admission: &Arc<Semaphore>,
    stop: &CancellationToken,
) {
    let request = match Envelope::decode(frame) {
        Ok(request) => request,
        Err(e) => {
            warn!(conn = %conn.id(), error = %e, "Skipping undecodable frame");
            return;
        }
    };

    let path = request.path();
    let route = match conn.router().resolve(&path, request.method()) {
        Ok(route) => route.clone(),
        Err(e) => {
            debug!(conn = %conn.id(), request_id = %request.id(), error = %e, "No route");
            let _ = conn
                .respond(request, &simple_msg("Resource not found"), StatusCode::NOT_FOUND)
                .await;
            return;
        }
    };

    // Backpressure: the pump stops reading while the connection is saturated.
    let permit = tokio::select! {
        biased;
        () = stop.cancelled() => return,
        permit = Arc::clone(admission).acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return,
        },
    };

    trace!(conn = %conn.id(), request_id = %request.id(), path = %path, "Dispatching request");

    let conn = conn.clone();
    tokio::spawn(async move {
        let _permit = permit;
        route.run(conn, request).await;
    });
}

// ============================================================================
// Write Pump
// ============================================================================

async fn write_pump(
    conn_id: ConnectionId,
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Vec<u8>>,
    stop: CancellationToken,
    options: ConnOptions,
) {
    let mut ticker = time::interval_at(Instant::now() + options.ping_period, options.ping_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let message = tokio::select! {
            biased;

            () = stop.cancelled() => {
                debug!(conn = %conn_id, "Write pump stopped");
                break;
            }

            frame = outbound.recv() => match frame {
                Some(frame) => frame_message(frame),
                None => {
                    let _ = timeout(options.write_wait, sink.send(Message::Close(None))).await;
                    debug!(conn = %conn_id, "Outbound queue closed");
                    break;
                }
            },

            _ = ticker.tick() => Message::Ping(Vec::new().into()),
        };

        match timeout(options.write_wait, sink.send(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(conn = %conn_id, error = %e, "Socket write failed");
                break;
            }
            Err(_) => {
                debug!(conn = %conn_id, "Socket write timed out");
                break;
            }
        }
    }

    // Fire the stop signal for writers blocked on a dead socket.
    stop.cancel();
    let _ = sink.close().await;
}

/// Frames are text; bytes that are not UTF-8 go out as binary.
fn frame_message(frame: Vec<u8>) -> Message {
    match String::from_utf8(frame) {
        Ok(text) => Message::Text(text.into()),
        Err(e) => Message::Binary(e.into_bytes().into()),
    }
}

// ============================================================================
// Tests
// ============================================================================
