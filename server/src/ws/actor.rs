use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};

use crate::state::AppState;
use crate::ws::protocol::{self, Flow};
use crate::ws::{ConnectionHandle, ConnectionState, Session};

/// Ping interval: server sends WebSocket ping every 30 seconds.
/// Pongs count as reads, so a live peer never hits the idle deadline.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Close code for idle peers.
const CLOSE_IDLE: u16 = 1001;
/// Close code for frames that cannot be decoded.
const CLOSE_MALFORMED: u16 = 1007;
const CLOSE_NORMAL: u16 = 1000;

/// Run the actor-per-connection pattern for an upgraded WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards messages from an mpsc channel
/// - Reader loop: decodes incoming envelopes, dispatches to protocol handlers
///
/// `identity` is set when the upgrade carried a valid session token.
pub async fn run_connection(socket: WebSocket, state: AppState, identity: Option<String>) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    let handle = ConnectionHandle::new(tx);
    let connection_id = handle.id();
    let mut session = Session::new(handle.clone());

    let mut writer_handle = tokio::spawn(writer_task(ws_sender, rx, state.settings.write_timeout));
    let mut writer_done = false;

    handle.mark_open();
    if let Some(identity) = identity {
        session.authenticate(&state.connections, &identity);
    }

    tracing::info!(
        connection_id = %connection_id,
        username = session.identity().unwrap_or("-"),
        "WebSocket actor started"
    );

    // Periodic pings keep intermediaries from dropping quiet connections
    let ping_sender = handle.clone();
    let ping_handle = tokio::spawn(async move {
        let mut ping_timer = interval(PING_INTERVAL);
        // Skip the first immediate tick
        ping_timer.tick().await;
        loop {
            ping_timer.tick().await;
            if !ping_sender.send(Message::Ping(vec![1, 2, 3, 4].into())) {
                break;
            }
        }
    });

    let mut close_with: Option<(u16, &'static str)> = Some((CLOSE_NORMAL, "Bye"));

    // Reader loop: process incoming WebSocket messages
    loop {
        let next = tokio::select! {
            read = timeout(state.settings.idle_timeout, ws_receiver.next()) => read,
            _ = &mut writer_handle, if !writer_done => {
                // Writer failed or finished sending a Close frame
                writer_done = true;
                tracing::debug!(connection_id = %connection_id, "Writer task ended");
                close_with = None;
                break;
            }
        };

        let Ok(next) = next else {
            tracing::warn!(connection_id = %connection_id, "Idle timeout, closing connection");
            close_with = Some((CLOSE_IDLE, "Idle timeout"));
            break;
        };

        match next {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    if protocol::handle_frame(text.as_str().as_bytes(), &mut session, &state).await
                        == Flow::Close
                    {
                        close_with = Some((CLOSE_MALFORMED, "Malformed JSON"));
                        break;
                    }
                }
                Message::Binary(data) => {
                    if protocol::handle_frame(&data, &mut session, &state).await == Flow::Close {
                        close_with = Some((CLOSE_MALFORMED, "Malformed JSON"));
                        break;
                    }
                }
                Message::Ping(data) => {
                    // Respond to client pings with pong
                    handle.send(Message::Pong(data));
                }
                Message::Pong(_) => {}
                Message::Close(frame) => {
                    tracing::info!(
                        connection_id = %connection_id,
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(
                    connection_id = %connection_id,
                    error = %e,
                    "WebSocket receive error"
                );
                close_with = None;
                break;
            }
            None => {
                tracing::info!(connection_id = %connection_id, "WebSocket stream ended");
                close_with = None;
                break;
            }
        }
    }

    ping_handle.abort();

    // Release the identity before anything else can be routed here
    let username = session.identity().map(str::to_string);
    session.release(&state.connections);

    if let Some((code, reason)) = close_with {
        if handle.state() != ConnectionState::Closed {
            handle.close(code, reason);
        }
    }
    handle.mark_closed();
    drop(session);
    drop(handle);

    // Let the writer flush queued frames (error reply, Close) before tearing down
    if !writer_done && timeout(state.settings.write_timeout, &mut writer_handle).await.is_err() {
        writer_handle.abort();
    }

    tracing::info!(
        connection_id = %connection_id,
        username = username.as_deref().unwrap_or("-"),
        "WebSocket actor stopped"
    );
}

/// Writer task: receives messages from mpsc channel and forwards them to the WebSocket sink.
/// Ends after a Close frame, a failed send, or a send that exceeds `write_timeout`.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
    write_timeout: Duration,
) {
    while let Some(msg) = rx.recv().await {
        let is_close = matches!(msg, Message::Close(_));
        match timeout(write_timeout, ws_sender.send(msg)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "WebSocket send failed");
                break;
            }
            Err(_) => {
                tracing::warn!("WebSocket send timed out");
                break;
            }
        }
        if is_close {
            break;
        }
    }
}
