//! WebSocket handler for Axum
//!
//! Handles connection upgrade, handshake authentication, per-connection
//! event routing, and disconnect cleanup. Handlers for one connection run
//! in arrival order; connections run concurrently and share only the
//! registries in [`super::state::RealtimeState`].

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::{header, HeaderMap},
    response::Response,
};
use futures::{stream::StreamExt, SinkExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::auth::JwtError;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::store;

use super::{
    calls,
    connection::Connection,
    events::{ClientEvent, ServerEvent},
    presence,
    relay::{self, SendMessage},
    signaling, typing,
};

/// WebSocket handler - upgrades HTTP connection to WebSocket
///
/// The bearer token travels in the handshake `Authorization` header, never
/// in the query string, so it can't leak into request logs.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    let Some(token) = token else {
        tracing::warn!("WebSocket auth refused: missing token");
        return Err(ApiError::Unauthorized);
    };

    let claims = match app_state.jwt_manager.validate_access_token(token) {
        Ok(claims) => claims,
        Err(JwtError::Expired) => {
            tracing::warn!("WebSocket auth refused: expired token");
            return Err(ApiError::InvalidToken);
        }
        Err(e) => {
            tracing::warn!(error = %e, "WebSocket auth refused: malformed token");
            return Err(ApiError::InvalidToken);
        }
    };

    // The identity must still resolve to an existing user record
    match store::users::exists(&app_state.pool, claims.sub).await {
        Ok(true) => {}
        Ok(false) => {
            tracing::warn!(user_id = %claims.sub, "WebSocket auth refused: user not found");
            return Err(ApiError::Unauthorized);
        }
        Err(e) => {
            tracing::error!(error = ?e, "WebSocket auth refused: user lookup failed");
            return Err(e.into());
        }
    }

    tracing::info!(user_id = %claims.sub, "WebSocket connection upgrade requested");

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, claims.sub, claims.username, app_state)))
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, user_id: Uuid, username: String, app_state: AppState) {
    let (mut sink, mut stream) = socket.split();

    // Channel for sending events to this connection
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();

    let conn = Connection::new(user_id, username, tx);
    let realtime = app_state.realtime.clone();
    let conn = realtime.add_connection(conn).await;
    let session_id = conn.session_id;

    // Presence before room membership; no event handler is armed yet
    presence::mark_online(&app_state, Arc::clone(&conn)).await;

    let _ = conn.send(ServerEvent::Connected { session_id });

    join_rooms(&app_state, &conn).await;

    // Forward queued events to the socket
    let send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => {
                    if sink.send(Message::Text(json)).await.is_err() {
                        break; // Connection closed
                    }
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Failed to serialize WebSocket event");
                }
            }
        }
    });

    // Periodic last-seen refresh while connected
    let touch_pool = app_state.pool.clone();
    let touch_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(presence::PRESENCE_REFRESH_INTERVAL);
        interval.tick().await; // mark_online already covered now
        loop {
            interval.tick().await;
            presence::touch(&touch_pool, user_id).await;
        }
    });

    // Handle incoming frames in arrival order
    while let Some(msg) = stream.next().await {
        let Ok(msg) = msg else { break };
        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => {
                    dispatch(event, &conn, &app_state).await;
                }
                Err(e) => {
                    tracing::warn!(error = ?e, "Failed to parse client event");
                    let _ = conn.send(ServerEvent::Error {
                        message: "Invalid event format".to_string(),
                    });
                }
            },
            Message::Close(_) => {
                tracing::info!(session_id = %session_id, "WebSocket close frame received");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {
                // Axum answers pings automatically
            }
            _ => {} // Ignore binary frames
        }
    }

    // Cleanup on disconnect
    tracing::info!(session_id = %session_id, user_id = %user_id, "WebSocket connection closing");

    touch_task.abort();
    conn.cancel_all_typing_timers().await;
    realtime.remove_connection(&session_id).await;

    // A superseded session must not mark the user offline or tear down the
    // calls their new connection is carrying.
    if presence::mark_offline(&app_state, &conn).await {
        calls::end_all_for_disconnect(&app_state, user_id).await;
    }

    send_task.abort();
}

/// One-time room membership snapshot: the user's personal channel plus one
/// room per conversation. Not refreshed until reconnect.
async fn join_rooms(app_state: &AppState, conn: &Arc<Connection>) {
    app_state
        .realtime
        .rooms
        .join(conn.user_id, Arc::clone(conn))
        .await;

    match store::chats::chat_ids_for_user(&app_state.pool, conn.user_id).await {
        Ok(chat_ids) => {
            for chat_id in chat_ids {
                conn.subscribe(chat_id).await;
                app_state
                    .realtime
                    .rooms
                    .join(chat_id, Arc::clone(conn))
                    .await;
            }
        }
        Err(e) => {
            // The connection stays usable for calls and direct addressing;
            // conversation relay requires a reconnect.
            tracing::error!(
                error = ?e,
                user_id = %conn.user_id,
                "Failed to load chat memberships"
            );
        }
    }
}

/// Route one client event to its handler.
///
/// Every request event gets exactly one ack, success or error, even when the
/// handler fails; fire-and-forget events log and drop their errors. Nothing
/// propagates past this boundary.
async fn dispatch(event: ClientEvent, conn: &Arc<Connection>, app: &AppState) {
    use ClientEvent::*;

    match event {
        MessageSend {
            conversation_id,
            content,
            message_type,
            attachment_url,
            attachment_name,
            reply_to,
        } => {
            let msg = SendMessage {
                conversation_id,
                content,
                message_type,
                attachment_url,
                attachment_name,
                reply_to,
            };
            let ack = match relay::send(app, conn, msg).await {
                Ok(ack) => ack,
                Err(e) => {
                    log_handler_error("message:send", conn.user_id, &e);
                    ServerEvent::message_ack_err(e.to_string())
                }
            };
            let _ = conn.send(ack);
        }

        MessageDelivered { message_id } => {
            relay::delivered(app, conn, message_id).await;
        }

        MessagesRead { conversation_id } => {
            relay::read(app, conn, conversation_id).await;
        }

        TypingStart { conversation_id } => {
            typing::start(&app.realtime, Arc::clone(conn), conversation_id).await;
        }

        TypingStop { conversation_id } => {
            typing::stop(&app.realtime, Arc::clone(conn), conversation_id).await;
        }

        CallInitiate {
            recipient_id,
            call_type,
            is_group,
            participants,
        } => {
            let ack =
                match calls::initiate(app, conn, recipient_id, call_type, is_group, participants)
                    .await
                {
                    Ok(ack) => ack,
                    Err(e) => {
                        log_handler_error("call:initiate", conn.user_id, &e);
                        ServerEvent::call_ack_err(e.to_string())
                    }
                };
            let _ = conn.send(ack);
        }

        CallAccept { call_id } => {
            let ack = match calls::accept(app, conn, call_id).await {
                Ok(ack) => ack,
                Err(e) => {
                    log_handler_error("call:accept", conn.user_id, &e);
                    ServerEvent::call_ack_err(e.to_string())
                }
            };
            let _ = conn.send(ack);
        }

        CallReject { call_id, reason } => {
            let ack = match calls::reject(app, conn, call_id, reason).await {
                Ok(ack) => ack,
                Err(e) => {
                    log_handler_error("call:reject", conn.user_id, &e);
                    ServerEvent::call_ack_err(e.to_string())
                }
            };
            let _ = conn.send(ack);
        }

        CallEnd { call_id, reason } => {
            let ack = match calls::end(app, conn, call_id, reason).await {
                Ok(ack) => ack,
                Err(e) => {
                    log_handler_error("call:end", conn.user_id, &e);
                    ServerEvent::call_ack_err(e.to_string())
                }
            };
            let _ = conn.send(ack);
        }

        SignalRelay {
            payload,
            recipient_id,
            call_id,
        } => {
            let ack = match signaling::relay(app, conn, payload, recipient_id, call_id).await {
                Ok(ack) => ack,
                Err(e) => {
                    log_handler_error("signal:relay", conn.user_id, &e);
                    ServerEvent::signal_ack_err(e.to_string())
                }
            };
            let _ = conn.send(ack);
        }

        SignalReconnect {
            recipient_id,
            call_id,
        } => {
            let ack = match signaling::reconnect(app, conn, recipient_id, call_id).await {
                Ok(ack) => ack,
                Err(e) => {
                    log_handler_error("signal:reconnect", conn.user_id, &e);
                    ServerEvent::signal_ack_err(e.to_string())
                }
            };
            let _ = conn.send(ack);
        }
    }
}

fn log_handler_error(event: &'static str, user_id: Uuid, err: &super::error::EventError) {
    use super::error::EventError;
    match err {
        EventError::Database(e) => {
            tracing::error!(event, user_id = %user_id, error = ?e, "Event handler failed");
        }
        _ => {
            tracing::debug!(event, user_id = %user_id, reason = %err, "Event rejected");
        }
    }
}
