// Per-connection session handling for /ws/chat.
//
// Lifecycle: authenticate the token supplied as a query parameter, register
// the connection, then a sequential receive loop. Malformed frames and
// persistence failures drop the frame and keep the connection; only
// transport-level errors end the session.

use std::sync::Arc;

use anyhow::{anyhow, Context};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use innosphere_common::protocol::ws::decode_frame;

use super::{fanout, fanout::FanoutOutcome, protocol};
use crate::{
    auth::jwt::ChatTokenService,
    error::{request_id_from_headers_or_generate, with_request_id_scope, ChatError, ErrorCode},
    metrics,
    registry::{ConnectionHandle, ConnectionRegistry},
    store::{ChatStore, ChatUser},
};

#[derive(Clone)]
pub struct ChatRouterState {
    pub token_service: Arc<ChatTokenService>,
    pub store: ChatStore,
    pub registry: ConnectionRegistry,
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

pub fn router(
    token_service: Arc<ChatTokenService>,
    store: ChatStore,
    registry: ConnectionRegistry,
) -> Router {
    let state = ChatRouterState { token_service, store, registry };

    Router::new().route("/ws/chat", get(ws_upgrade)).with_state(state)
}

async fn ws_upgrade(
    State(state): State<ChatRouterState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    // A missing token never reaches the socket; an invalid one is rejected
    // after the upgrade with a 1008 close so browser clients can tell auth
    // failures apart from transport errors.
    let Some(token) = query.token.filter(|token| !token.is_empty()) else {
        metrics::record_auth_failure();
        return ChatError::new(ErrorCode::AuthInvalidToken, "missing token query parameter")
            .into_response();
    };

    let request_id = request_id_from_headers_or_generate(&headers);
    ws.on_upgrade(move |socket| async move {
        with_request_id_scope(request_id, handle_socket(state, token, socket)).await;
    })
}

async fn handle_socket(state: ChatRouterState, token: String, mut socket: WebSocket) {
    let user = match authenticate(&state, &token).await {
        Ok(user) => user,
        Err(error) => {
            metrics::record_auth_failure();
            warn!(error = ?error, "chat connection rejected");
            protocol::close_policy_violation(&mut socket, "authentication failed").await;
            return;
        }
    };

    let (outbound_sender, mut outbound_receiver) = mpsc::unbounded_channel();
    let handle = ConnectionHandle::new(outbound_sender);
    let connection_id = handle.connection_id;
    state.registry.register(user.id, handle).await;
    metrics::record_connection_opened();
    info!(user_id = user.id, role = user.role.as_str(), "chat connection established");

    // When a second connection for the same user supersedes this one, the
    // registry drops our outbound sender and the channel closes. The
    // superseded connection stays open and can still send; its echoes route
    // to the new handle.
    let mut outbound_open = true;

    loop {
        tokio::select! {
            maybe_outbound = outbound_receiver.recv(), if outbound_open => {
                match maybe_outbound {
                    Some(event) => {
                        if protocol::send_event(&mut socket, &event).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        debug!(user_id = user.id, "connection superseded, outbound closed");
                        outbound_open = false;
                    }
                }
            }
            maybe_message = socket.recv() => {
                let Some(message) = maybe_message else {
                    break;
                };

                match message {
                    Ok(Message::Text(raw_message)) => {
                        process_text_frame(
                            &state.store,
                            &state.registry,
                            &user,
                            raw_message.as_str(),
                        )
                        .await;
                    }
                    Ok(Message::Ping(payload)) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(error) => {
                        debug!(user_id = user.id, error = %error, "chat socket error");
                        break;
                    }
                }
            }
        }
    }

    state.registry.unregister(user.id, connection_id).await;
    metrics::record_connection_closed();
    info!(user_id = user.id, "chat connection closed");
}

async fn authenticate(state: &ChatRouterState, token: &str) -> anyhow::Result<ChatUser> {
    let email = state
        .token_service
        .validate_token(token)
        .context("token validation failed")?;

    state
        .store
        .find_user_by_email(&email)
        .await
        .context("identity lookup failed")?
        .ok_or_else(|| anyhow!("token subject '{email}' does not resolve to a user"))
}

/// What happened to one inbound text frame.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum FrameOutcome {
    /// Frame was malformed or failed validation; dropped without feedback.
    Dropped,
    /// The durable write failed; frame dropped, connection survives.
    PersistFailed,
    /// Message persisted; carries the fan-out push results.
    Delivered(FanoutOutcome),
}

pub(crate) async fn process_text_frame(
    store: &ChatStore,
    registry: &ConnectionRegistry,
    sender: &ChatUser,
    raw: &str,
) -> FrameOutcome {
    let frame = match decode_frame(raw) {
        Ok(frame) => frame,
        Err(error) => {
            debug!(user_id = sender.id, error = %error, "dropping undecodable frame");
            metrics::record_frame_dropped();
            return FrameOutcome::Dropped;
        }
    };

    let Some(valid) = frame.validate() else {
        debug!(user_id = sender.id, "dropping frame without receiver or content");
        metrics::record_frame_dropped();
        return FrameOutcome::Dropped;
    };

    let message = match store.persist_message(sender, &valid).await {
        Ok(message) => message,
        Err(error) => {
            error!(
                user_id = sender.id,
                receiver_id = valid.receiver_id,
                error = %error,
                "failed to persist chat message, dropping frame"
            );
            metrics::record_persistence_failure();
            return FrameOutcome::PersistFailed;
        }
    };
    metrics::record_message_persisted();

    let outcome = fanout::dispatch(registry, &message, &sender.display_name, valid.temp_id).await;
    if !outcome.receiver_pushed {
        debug!(
            message_id = message.id,
            receiver_id = message.receiver_id,
            "receiver offline, realtime push skipped"
        );
    }

    FrameOutcome::Delivered(outcome)
}
