//! Relay session: one WebSocket paired with one backend TCP socket.
//!
//! The relay is byte-transparent. Client frames (binary or text) are written
//! to the backend verbatim; backend bytes are sent to the client as binary
//! messages framed however the reads happened to chunk them.
//!
//! Backpressure is carried by suspension on both paths: the client→backend
//! loop parks on `write_all` when the kernel send buffer fills, which stops
//! WebSocket reception; the backend→client reader feeds a bounded channel to
//! the writer task and parks when the client drains too slowly.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use bytes::Bytes;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::AppState;

/// Orderly close.
pub const CLOSE_NORMAL: u16 = 1000;
/// Admission rejected by policy.
pub const CLOSE_POLICY: u16 = 1008;
/// Transport failure on either side.
pub const CLOSE_TRANSPORT: u16 = 1011;

/// Size of one backend read, and therefore of one relayed binary message.
const READ_CHUNK: usize = 16 * 1024;

/// How long teardown waits for the writer task to drain.
const WRITER_DRAIN: std::time::Duration = std::time::Duration::from_secs(1);

/// Complete the upgrade only to refuse it.
pub async fn reject(mut socket: WebSocket, reason: &'static str) {
    counter!("relay_policy_rejections_total").increment(1);
    debug!("relay admission rejected: {reason}");
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: CLOSE_POLICY,
            reason: reason.into(),
        })))
        .await;
}

/// Run one relay session to `host:port` until either side ends it.
pub async fn run(socket: WebSocket, host: String, port: u16, state: Arc<AppState>) {
    let session = Uuid::new_v4();
    counter!("relay_sessions_total").increment(1);
    gauge!("relay_active_sessions").increment(1.0);
    session_loop(socket, &host, port, &state, session).await;
    gauge!("relay_active_sessions").decrement(1.0);
}

/// Why the open session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    BackendClosed,
    BackendError,
    ClientClosed,
    ClientError,
    /// The client vanished while backend data was queued for it.
    ClientGone,
    Shutdown,
}

impl SessionEnd {
    fn close_frame(self) -> (u16, &'static str) {
        match self {
            SessionEnd::BackendClosed | SessionEnd::ClientClosed | SessionEnd::ClientGone => {
                (CLOSE_NORMAL, "")
            }
            SessionEnd::Shutdown => (CLOSE_NORMAL, "server shutting down"),
            SessionEnd::BackendError => (CLOSE_TRANSPORT, "backend transport failure"),
            SessionEnd::ClientError => (CLOSE_TRANSPORT, ""),
        }
    }
}

/// One inbound WebSocket message, reduced to what the relay cares about.
enum Inbound {
    Data(Bytes),
    Ignore,
    Closed,
}

fn classify(msg: Message) -> Inbound {
    match msg {
        Message::Binary(data) => Inbound::Data(data),
        // Text frames relay as raw bytes; transparency over pedantry.
        Message::Text(text) => Inbound::Data(Bytes::copy_from_slice(text.as_bytes())),
        Message::Ping(_) | Message::Pong(_) => Inbound::Ignore,
        Message::Close(_) => Inbound::Closed,
    }
}

async fn session_loop(
    mut ws: WebSocket,
    host: &str,
    port: u16,
    state: &Arc<AppState>,
    session: Uuid,
) {
    let target = format!("{host}:{port}");
    info!("relay {session} to {target} connecting");

    let mut shutdown = state.shutdown.clone();
    let connect = TcpStream::connect(target.clone());
    tokio::pin!(connect);
    let deadline = tokio::time::sleep(state.config.connect_timeout);
    tokio::pin!(deadline);

    // Frames arriving before the backend is up wait in a bounded buffer;
    // they are flushed on connect and discarded on abort.
    let mut pending: Vec<Bytes> = Vec::new();
    let mut pending_bytes = 0usize;

    let tcp = loop {
        tokio::select! {
            result = &mut connect => match result {
                Ok(stream) => break stream,
                Err(e) => {
                    warn!("relay {session} connect to {target} failed: {e}");
                    close_socket(ws, CLOSE_TRANSPORT, "backend connection failed").await;
                    return;
                }
            },
            _ = &mut deadline => {
                warn!("relay {session} connect to {target} timed out");
                close_socket(ws, CLOSE_TRANSPORT, "backend connect timed out").await;
                return;
            }
            _ = wait_shutdown(&mut shutdown) => {
                close_socket(ws, CLOSE_NORMAL, "server shutting down").await;
                return;
            }
            msg = ws.recv() => match msg {
                Some(Ok(msg)) => match classify(msg) {
                    Inbound::Data(data) => {
                        pending_bytes += data.len();
                        if pending_bytes > state.config.max_ws_buffered_bytes {
                            warn!("relay {session} pre-connect buffer overflow");
                            close_socket(ws, CLOSE_TRANSPORT, "relay buffer overflow").await;
                            return;
                        }
                        pending.push(data);
                    }
                    Inbound::Ignore => {}
                    Inbound::Closed => {
                        debug!("relay {session} client left before backend connected");
                        return;
                    }
                },
                Some(Err(e)) => {
                    debug!("relay {session} client error before backend connected: {e}");
                    return;
                }
                None => {
                    debug!("relay {session} client gone before backend connected");
                    return;
                }
            }
        }
    };

    if let Err(e) = tcp.set_nodelay(true) {
        debug!("relay {session} set_nodelay failed: {e}");
    }
    let (tcp_rd, mut tcp_wr) = tcp.into_split();

    for chunk in pending.drain(..) {
        if let Err(e) = tcp_wr.write_all(&chunk).await {
            warn!("relay {session} flushing buffered frames failed: {e}");
            close_socket(ws, CLOSE_TRANSPORT, "backend transport failure").await;
            return;
        }
    }

    debug!("relay {session} to {target} open");
    let (ws_tx, mut ws_rx) = ws.split();

    // The channel bound converts the buffered-byte budget into a message
    // count; a full channel parks the backend reader until the client side
    // drains.
    let capacity = (state.config.max_ws_buffered_bytes / READ_CHUNK).max(1);
    let (out_tx, out_rx) = mpsc::channel::<Message>(capacity);

    let mut writer = tokio::spawn(write_to_client(ws_tx, out_rx));
    let mut backend = tokio::spawn(read_from_backend(tcp_rd, out_tx.clone()));

    let end = loop {
        tokio::select! {
            result = &mut backend => break result.unwrap_or(SessionEnd::BackendError),
            _ = wait_shutdown(&mut shutdown) => break SessionEnd::Shutdown,
            msg = ws_rx.next() => match msg {
                Some(Ok(msg)) => match classify(msg) {
                    Inbound::Data(data) => {
                        counter!("relay_bytes_total", "direction" => "client_to_backend")
                            .increment(data.len() as u64);
                        if let Err(e) = tcp_wr.write_all(&data).await {
                            debug!("relay {session} backend write failed: {e}");
                            break SessionEnd::BackendError;
                        }
                    }
                    Inbound::Ignore => {}
                    Inbound::Closed => break SessionEnd::ClientClosed,
                },
                Some(Err(e)) => {
                    debug!("relay {session} client error: {e}");
                    break SessionEnd::ClientError;
                }
                None => break SessionEnd::ClientClosed,
            }
        }
    };

    // Teardown: drop the backend read half, half-close the write side, and
    // let the writer deliver the close frame before it goes away.
    backend.abort();
    let _ = tcp_wr.shutdown().await;
    let (code, reason) = end.close_frame();
    let close = Message::Close(Some(CloseFrame {
        code,
        reason: reason.into(),
    }));
    // A stalled client must not hold teardown hostage.
    let _ = timeout(WRITER_DRAIN, out_tx.send(close)).await;
    drop(out_tx);
    if timeout(WRITER_DRAIN, &mut writer).await.is_err() {
        writer.abort();
    }
    info!("relay {session} to {target} closed: {end:?}");
}

/// Drain the outbound channel into the WebSocket. `send` resolves only once
/// the frame is flushed, so the channel bound caps buffered bytes.
async fn write_to_client(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut out_rx: mpsc::Receiver<Message>,
) {
    while let Some(msg) = out_rx.recv().await {
        let is_close = matches!(msg, Message::Close(_));
        if ws_tx.send(msg).await.is_err() || is_close {
            break;
        }
    }
}

/// Forward backend bytes to the writer channel as binary messages.
async fn read_from_backend(mut tcp_rd: OwnedReadHalf, out_tx: mpsc::Sender<Message>) -> SessionEnd {
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match tcp_rd.read(&mut buf).await {
            Ok(0) => return SessionEnd::BackendClosed,
            Ok(n) => {
                counter!("relay_bytes_total", "direction" => "backend_to_client")
                    .increment(n as u64);
                let chunk = Bytes::copy_from_slice(&buf[..n]);
                if out_tx.send(Message::Binary(chunk)).await.is_err() {
                    return SessionEnd::ClientGone;
                }
            }
            Err(e) => {
                debug!("backend read failed: {e}");
                return SessionEnd::BackendError;
            }
        }
    }
}

async fn close_socket(mut ws: WebSocket, code: u16, reason: &'static str) {
    let _ = ws
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })))
        .await;
}

/// Resolve when the gateway starts shutting down; never resolves if the
/// shutdown channel disappears.
async fn wait_shutdown(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
