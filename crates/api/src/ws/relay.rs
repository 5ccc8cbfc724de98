//! Message relay and delivery/read-state transitions
//!
//! `send` is a primary path: persistence failure means a failure ack and no
//! partial broadcast. Delivery and read receipts are fire-and-forget;
//! unknown ids and offline senders are logged no-ops.

use std::sync::Arc;

use uuid::Uuid;

use wavelink_shared::{MessageRecord, MessageType, UserProfile};

use crate::state::AppState;
use crate::store;

use super::connection::Connection;
use super::error::EventError;
use super::events::{MessageEvent, ReceiptStatus, ServerEvent};

/// `message:send` payload after boundary deserialization
#[derive(Debug)]
pub struct SendMessage {
    pub conversation_id: Uuid,
    pub content: Option<String>,
    pub message_type: MessageType,
    pub attachment_url: Option<String>,
    pub attachment_name: Option<String>,
    pub reply_to: Option<Uuid>,
}

fn to_event(record: &MessageRecord, sender: UserProfile) -> MessageEvent {
    MessageEvent {
        id: record.id,
        conversation_id: record.chat_id,
        sender,
        content: record.content.clone(),
        message_type: record.message_type.clone(),
        attachment_url: record.attachment_url.clone(),
        attachment_name: record.attachment_name.clone(),
        reply_to: record.reply_to,
        created_at: record.created_at,
    }
}

/// Handle `message:send`
pub async fn send(
    app: &AppState,
    conn: &Arc<Connection>,
    msg: SendMessage,
) -> Result<ServerEvent, EventError> {
    // Validate required fields per message type
    match msg.message_type {
        MessageType::Text => {
            if msg.content.as_deref().map_or(true, |c| c.trim().is_empty()) {
                return Err(EventError::validation("Message content is required"));
            }
        }
        _ => {
            if msg.attachment_url.as_deref().map_or(true, str::is_empty) {
                return Err(EventError::validation("Attachment is required"));
            }
        }
    }

    // Membership is checked against the store, not the connection's cached
    // subscription set, to avoid acting on a stale snapshot.
    if !store::chats::is_participant(&app.pool, msg.conversation_id, conn.user_id).await? {
        return Err(EventError::forbidden(
            "Not a participant of this conversation",
        ));
    }

    let record = store::messages::create(
        &app.pool,
        &store::messages::NewMessage {
            chat_id: msg.conversation_id,
            sender_id: conn.user_id,
            content: msg.content,
            message_type: msg.message_type,
            attachment_url: msg.attachment_url,
            attachment_name: msg.attachment_name,
            reply_to: msg.reply_to,
        },
    )
    .await?;

    // Conversation metadata and the transient cache are secondary effects:
    // the message is durable, so log and continue on failure.
    if let Err(e) =
        store::chats::touch_last_message(&app.pool, msg.conversation_id, record.id).await
    {
        tracing::warn!(error = ?e, chat_id = %msg.conversation_id, "Failed to bump last message");
    }
    app.message_cache.set(&record).await;

    let sender = match store::users::profile(&app.pool, conn.user_id).await {
        Ok(Some(profile)) => profile,
        Ok(None) | Err(_) => conn.fallback_profile(),
    };

    app.realtime
        .rooms
        .broadcast_except(
            &msg.conversation_id,
            &conn.session_id,
            ServerEvent::MessageReceived {
                message: to_event(&record, sender),
            },
        )
        .await;

    tracing::debug!(
        message_id = %record.id,
        chat_id = %msg.conversation_id,
        sender = %conn.user_id,
        "Message relayed"
    );

    Ok(ServerEvent::message_ack_ok(record.id))
}

/// Look up a message, trying the transient cache before the store
async fn lookup_message(
    app: &AppState,
    message_id: Uuid,
) -> Result<Option<MessageRecord>, sqlx::Error> {
    if let Some(json) = app.message_cache.get(&message_id).await {
        match serde_json::from_str::<MessageRecord>(&json) {
            Ok(record) => return Ok(Some(record)),
            Err(e) => {
                tracing::warn!(error = ?e, message_id = %message_id, "Discarding unreadable cache entry");
            }
        }
    }
    store::messages::find(&app.pool, message_id).await
}

/// Handle `message:delivered` (fire-and-forget)
pub async fn delivered(app: &AppState, conn: &Arc<Connection>, message_id: Uuid) {
    let record = match lookup_message(app, message_id).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            tracing::debug!(message_id = %message_id, "Delivery receipt for unknown message");
            return;
        }
        Err(e) => {
            tracing::warn!(error = ?e, message_id = %message_id, "Failed to look up message");
            return;
        }
    };

    // Confirming your own message is meaningless
    if record.sender_id == conn.user_id {
        return;
    }

    // Only the sender's current connection is notified; offline sender is a
    // silent no-op.
    if let Some(sender_conn) = app.realtime.presence.resolve(&record.sender_id) {
        let _ = sender_conn.send(ServerEvent::MessageStatus {
            message_id,
            status: ReceiptStatus::Delivered,
            user_id: conn.user_id,
        });
    }
}

/// Handle `messages:read` (fire-and-forget)
///
/// One idempotent bulk update joins the reader into the read-set of every
/// message they haven't sent and haven't read; a repeat call affects zero
/// rows and so emits zero additional broadcasts.
pub async fn read(app: &AppState, conn: &Arc<Connection>, conversation_id: Uuid) {
    let affected = match store::messages::mark_read_bulk(&app.pool, conversation_id, conn.user_id)
        .await
    {
        Ok(affected) => affected,
        Err(e) => {
            tracing::warn!(error = ?e, chat_id = %conversation_id, "Failed to mark messages read");
            return;
        }
    };

    if affected.is_empty() {
        return;
    }

    let mut notified = 0;
    for (message_id, sender_id) in &affected {
        // The cached copy carries a stale read-set now
        app.message_cache.delete(message_id).await;

        if let Some(sender_conn) = app.realtime.presence.resolve(sender_id) {
            if sender_conn
                .send(ServerEvent::MessageStatus {
                    message_id: *message_id,
                    status: ReceiptStatus::Read,
                    user_id: conn.user_id,
                })
                .is_ok()
            {
                notified += 1;
            }
        }
    }

    tracing::debug!(
        chat_id = %conversation_id,
        reader = %conn.user_id,
        messages = affected.len(),
        notified,
        "Read receipts processed"
    );
}
