//! The RPC transport: upgrades `GET {ws_path}` to a persistent WebSocket and
//! drives one connection's reader/writer halves, heartbeat, and event fan-out
//! against a single [`Session`].

use std::borrow::Cow;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};

use crate::events::SystemEvent;
use crate::rpc::{handle_frame, RpcNotification};
use crate::session::Session;
use crate::state::AppState;

/// Maximum WebSocket message size accepted from a client.
const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Repeated parse/request-shape failures on one connection mark it as a
/// misbehaving client; the socket is closed with "policy violation" rather
/// than answered forever.
const PROTOCOL_ERROR_CLOSE_THRESHOLD: u32 = 20;

const CLOSE_NORMAL: u16 = 1000;
const CLOSE_POLICY_VIOLATION: u16 = 1008;
const CLOSE_TRY_AGAIN_LATER: u16 = 1013;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.max_message_size(MAX_FRAME_SIZE).on_upgrade(move |socket| handle_socket(socket, state))
}

fn is_protocol_error_frame(value: &serde_json::Value) -> bool {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|c| c.as_str())
        .map(|c| c == "PARSE_ERROR" || c == "INVALID_REQUEST")
        .unwrap_or(false)
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let config = state.config.get();
    let mut session = Session::new(config.server.max_in_flight);
    let max_frame_bytes = config.server.max_frame_bytes;
    let heartbeat_period = Duration::from_secs(config.server.heartbeat_interval_secs.max(1));
    let heartbeat_miss = config.server.heartbeat_miss;
    let outbound_stall_timeout = Duration::from_secs(config.events.outbound_stall_timeout_secs.max(1));
    drop(config);

    tracing::info!(session_id = %session.session_id, "client connected");

    let (mut sender, mut receiver) = socket.split();
    // Unfiltered at the bus level; per-topic interest is tracked dynamically in
    // `session.subscriptions` via `subscribe_events`/`unsubscribe_events` and
    // applied when forwarding below.
    let subscriber = state.events.subscribe(Vec::new());

    let mut heartbeat = tokio::time::interval(heartbeat_period);
    heartbeat.tick().await; // first tick fires immediately

    let mut missed_pongs: u32 = 0;
    let mut consecutive_protocol_errors: u32 = 0;
    let mut close_with: Option<(u16, &'static str)> = None;

    'connection: loop {
        tokio::select! {
            frame = receiver.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        let responses = handle_frame(&state, &mut session, &text, max_frame_bytes).await;
                        let saw_protocol_error = responses.iter().any(is_protocol_error_frame);

                        for response in responses {
                            let payload = serde_json::to_string(&response).expect("rpc response always serializes");
                            let sent = tokio::time::timeout(outbound_stall_timeout, sender.send(Message::Text(payload))).await;
                            if !matches!(sent, Ok(Ok(()))) {
                                close_with = Some((CLOSE_TRY_AGAIN_LATER, "outbound stall"));
                                break 'connection;
                            }
                        }

                        consecutive_protocol_errors = if saw_protocol_error { consecutive_protocol_errors + 1 } else { 0 };
                        if consecutive_protocol_errors >= PROTOCOL_ERROR_CLOSE_THRESHOLD {
                            close_with = Some((CLOSE_POLICY_VIOLATION, "repeated protocol errors"));
                            break 'connection;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        missed_pongs = 0;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        break 'connection;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(session_id = %session.session_id, error = %e, "websocket receive error");
                        break 'connection;
                    }
                }
            }

            event = subscriber.recv() => {
                let is_dropped_marker = matches!(event, SystemEvent::EventsDropped { .. });
                if !is_dropped_marker && !session.subscriptions.contains(event.topic()) {
                    continue;
                }
                if is_dropped_marker {
                    state.health.metrics.events_dropped.fetch_add(1, Ordering::Relaxed);
                }

                let notification = RpcNotification::new(event.topic(), serde_json::to_value(&event).unwrap_or(serde_json::Value::Null));
                let payload = serde_json::to_string(&notification).expect("notification always serializes");
                let sent = tokio::time::timeout(outbound_stall_timeout, sender.send(Message::Text(payload))).await;
                if !matches!(sent, Ok(Ok(()))) {
                    close_with = Some((CLOSE_TRY_AGAIN_LATER, "outbound stall"));
                    break 'connection;
                }
            }

            _ = heartbeat.tick() => {
                if missed_pongs >= heartbeat_miss {
                    tracing::info!(session_id = %session.session_id, "closing connection after missed heartbeats");
                    break 'connection;
                }
                missed_pongs += 1;
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break 'connection;
                }
            }
        }
    }

    state.events.unsubscribe(&subscriber);
    let (code, reason) = close_with.unwrap_or((CLOSE_NORMAL, "normal closure"));
    let _ = sender.send(Message::Close(Some(CloseFrame { code, reason: Cow::Borrowed(reason) }))).await;
    tracing::info!(session_id = %session.session_id, "client disconnected");
}
