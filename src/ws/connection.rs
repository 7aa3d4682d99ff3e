//! WebSocket connection state machine.
//!
//! Handles the read/write loop for a single WebSocket connection:
//! admission, heartbeat tracking, built-in message dispatch
//! (`authenticate`, `ping`, `pong`, `reconnect`), forwarding of
//! application-bound envelopes, and exactly-once disconnect cleanup.

use std::net::SocketAddr;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::app_state::AppState;
use crate::domain::{ConnectionId, OutboundFrame, ServerEvent, SessionId};
use crate::error::RelayError;
use crate::protocol::Envelope;
use crate::protocol::envelope::{TYPE_AUTHENTICATE, TYPE_PING, TYPE_PONG, TYPE_RECONNECT};
use crate::session::ResumeOutcome;

/// Capacity of the per-connection outbound channel. Writes beyond this
/// overflow into the registry's pending queue.
const OUTBOUND_CHANNEL_CAPACITY: usize = 64;

/// Runs the read/write loop for a single WebSocket connection.
///
/// All outbound traffic flows through the registry's per-connection
/// channel so that per-recipient ordering has a single path; the socket
/// task is the only writer to the actual `WebSocket`.
pub async fn run_connection(
    socket: WebSocket,
    state: AppState,
    addr: SocketAddr,
    user_agent: Option<String>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::channel::<OutboundFrame>(OUTBOUND_CHANNEL_CAPACITY);

    let id = match state.registry.add_connection(addr, user_agent, tx).await {
        Ok(id) => id,
        Err(err) => {
            // Admission rejection: close with the protocol-specific code.
            let code = err.ws_close_code().unwrap_or(1011);
            let _ = ws_tx
                .send(Message::Close(Some(CloseFrame {
                    code,
                    reason: err.to_string().into(),
                })))
                .await;
            return;
        }
    };
    state.heartbeat.track(id).await;

    loop {
        tokio::select! {
            // Incoming message from client
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_text(&state, id, text.as_str()).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        // Transport-level pong counts the same as an
                        // application-level one.
                        state.heartbeat.record_pong(id).await;
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
            // Outbound frame from the registry
            frame = rx.recv() => {
                match frame {
                    Some(OutboundFrame::Text(wire)) => {
                        if ws_tx.send(Message::text(wire)).await.is_err() {
                            break;
                        }
                    }
                    Some(OutboundFrame::Close(code, reason)) => {
                        let _ = ws_tx
                            .send(Message::Close(Some(CloseFrame {
                                code,
                                reason: reason.into(),
                            })))
                            .await;
                        break;
                    }
                    // Registry dropped the sender: entry already removed.
                    None => break,
                }
            }
        }
    }

    // Cleanup runs exactly once whether the closure was client- or
    // server-initiated; registry removal is idempotent.
    state.heartbeat.untrack(id).await;
    state.sessions.on_disconnect(id).await;
    state.registry.remove_connection(id).await;
    tracing::debug!(connection_id = %id, "ws connection closed");
}

/// Validates one inbound text frame and dispatches it.
async fn handle_text(state: &AppState, id: ConnectionId, raw: &str) {
    // Rate limiting gates every inbound frame, oversized ones included;
    // a violation has already closed the socket.
    if !state.registry.handle_inbound(id).await {
        return;
    }

    if raw.len() > state.config.max_message_bytes {
        let err = RelayError::MessageTooLarge {
            size: raw.len(),
            limit: state.config.max_message_bytes,
        };
        let _ = state.registry.send_envelope(id, &Envelope::error(&err)).await;
        return;
    }

    let envelope = Envelope::parse(raw);
    let report = envelope.validate();
    if !report.valid {
        let err = RelayError::InvalidEnvelope(report.errors.join("; "));
        let mut reply = Envelope::error(&err);
        reply.id = envelope.id.clone();
        reply.request_id = envelope.request_id.clone();
        let _ = state.registry.send_envelope(id, &reply).await;
        return;
    }

    match envelope.kind.as_str() {
        TYPE_AUTHENTICATE => handle_authenticate(state, id, &envelope).await,
        TYPE_PING => {
            let mut reply = Envelope::pong();
            reply.id = envelope.id.clone();
            let _ = state.registry.send_envelope(id, &reply).await;
        }
        TYPE_PONG => state.heartbeat.record_pong(id).await,
        TYPE_RECONNECT => handle_reconnect(state, id, &envelope).await,
        _ => {
            // Application-bound: forward on the bus, never handled here.
            let user_id = state.registry.user_of(id).await;
            let _ = state.event_bus.publish(ServerEvent::MessageReceived {
                connection_id: id,
                envelope,
                user_id,
                timestamp: Utc::now(),
            });
        }
    }
}

/// Handles a built-in `authenticate` envelope.
///
/// Token validation is syntactic presence only; anything cryptographic
/// lives outside this layer.
async fn handle_authenticate(state: &AppState, id: ConnectionId, envelope: &Envelope) {
    let payload = envelope.payload.as_ref();

    let token_present = payload
        .and_then(|p| p.get("token"))
        .and_then(Value::as_str)
        .is_some_and(|t| !t.is_empty());
    let credentials_present = payload
        .and_then(|p| p.get("credentials"))
        .is_some_and(|c| !c.is_null());

    if !token_present && !credentials_present {
        send_auth_failure(state, id, envelope, "missing or empty token").await;
        return;
    }

    let Some(user_id) = payload
        .and_then(|p| p.get("userId"))
        .and_then(Value::as_str)
        .filter(|u| !u.is_empty())
        .map(str::to_string)
    else {
        send_auth_failure(state, id, envelope, "userId is required").await;
        return;
    };

    let metadata = payload
        .and_then(|p| p.get("metadata"))
        .and_then(Value::as_object)
        .map(|m| m.clone().into_iter().collect())
        .unwrap_or_default();

    if state.registry.authenticate(id, &user_id, metadata).await {
        let mut reply = Envelope::auth_success(&user_id);
        reply.id = envelope.id.clone();
        let _ = state.registry.send_envelope(id, &reply).await;
    } else {
        send_auth_failure(state, id, envelope, "unknown connection").await;
    }
}

async fn send_auth_failure(state: &AppState, id: ConnectionId, envelope: &Envelope, reason: &str) {
    let err = RelayError::AuthenticationFailed(reason.to_string());
    let mut reply = Envelope::error(&err);
    reply.id = envelope.id.clone();
    let _ = state.registry.send_envelope(id, &reply).await;
}

/// Handles a built-in `reconnect` envelope: session resume plus replay
/// of any messages queued while the client was away.
async fn handle_reconnect(state: &AppState, id: ConnectionId, envelope: &Envelope) {
    let payload = envelope.payload.as_ref();
    let session_id = payload
        .and_then(|p| p.get("sessionId"))
        .and_then(Value::as_str)
        .and_then(SessionId::parse);
    let client_info = payload.and_then(|p| p.get("connectionInfo"));

    let outcome = state.sessions.resume(id, session_id, client_info).await;
    let mut reply = reconnect_response(&outcome);
    reply.id = envelope.id.clone();
    reply.request_id = envelope.request_id.clone();
    let _ = state.registry.send_envelope(id, &reply).await;

    // Anything still sitting in the connection-level queue goes next.
    let _ = state.registry.flush_queue(id).await;
}

/// Builds the `reconnect_response` envelope for a resume outcome.
fn reconnect_response(outcome: &ResumeOutcome) -> Envelope {
    Envelope::new(
        "reconnect_response",
        json!({
            "sessionId": outcome.session_id,
            "isReconnection": outcome.is_reconnection,
            "reconnectCount": outcome.reconnect_count,
            "queuedMessages": outcome.queued_messages,
            "userData": outcome.user_data,
        }),
    )
}
