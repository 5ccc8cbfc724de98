//! Peer-connection signaling relay
//!
//! Forwards opaque handshake payloads between the two endpoints of a call.
//! Target resolution order: explicit recipient, then the other participant
//! of the named call, then a scan of the caller's active calls. Group calls
//! resolve a single peer only (documented simplification; mesh fan-out is
//! out of scope). A payload is never delivered back to its own sender.

use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use crate::state::AppState;

use super::calls::ActiveCallRegistry;
use super::connection::Connection;
use super::error::EventError;
use super::events::ServerEvent;
use super::presence::PresenceDirectory;

/// Resolved relay target: recipient plus the call the relay belongs to, when
/// one could be associated
#[derive(Debug, PartialEq, Eq)]
struct Target {
    recipient_id: Uuid,
    call_id: Option<Uuid>,
}

fn resolve_target(
    calls: &ActiveCallRegistry,
    caller: Uuid,
    recipient_id: Option<Uuid>,
    call_id: Option<Uuid>,
) -> Result<Target, EventError> {
    // 1. Explicit recipient wins
    if let Some(recipient_id) = recipient_id {
        return Ok(Target {
            recipient_id,
            call_id,
        });
    }

    // 2. Named call: pick the other participant of its active entry
    if let Some(call_id) = call_id {
        let entry = calls
            .get(&call_id)
            .ok_or_else(|| EventError::not_found("No recipient found"))?;
        let recipient_id = entry
            .other_participant(&caller)
            .ok_or_else(|| EventError::not_found("No recipient found"))?;
        return Ok(Target {
            recipient_id,
            call_id: Some(call_id),
        });
    }

    // 3. Fall back to the first active call containing the caller
    let entry = calls
        .find_for_user(&caller)
        .ok_or_else(|| EventError::not_found("No recipient found"))?;
    let recipient_id = entry
        .other_participant(&caller)
        .ok_or_else(|| EventError::not_found("No recipient found"))?;

    Ok(Target {
        recipient_id,
        call_id: Some(entry.call_id),
    })
}

fn deliver(
    presence: &PresenceDirectory,
    caller: Uuid,
    target: Target,
    event: ServerEvent,
) -> Result<ServerEvent, EventError> {
    // Deduplicate self-addressed echoes at the relay boundary
    if target.recipient_id == caller {
        tracing::debug!(user_id = %caller, "Dropping self-addressed signaling payload");
        return Ok(ServerEvent::signal_ack_ok());
    }

    let conn = presence
        .resolve(&target.recipient_id)
        .ok_or_else(|| EventError::not_found("No recipient found"))?;

    conn.send(event)
        .map_err(|_| EventError::not_found("No recipient found"))?;

    Ok(ServerEvent::signal_ack_ok())
}

/// Handle `signal:relay`
pub async fn relay(
    app: &AppState,
    conn: &Arc<Connection>,
    payload: Value,
    recipient_id: Option<Uuid>,
    call_id: Option<Uuid>,
) -> Result<ServerEvent, EventError> {
    let target = resolve_target(&app.realtime.calls, conn.user_id, recipient_id, call_id)?;

    tracing::debug!(
        sender = %conn.user_id,
        recipient = %target.recipient_id,
        call_id = ?target.call_id,
        "Relaying signaling payload"
    );

    let event = ServerEvent::SignalRelay {
        sender_id: conn.user_id,
        call_id: target.call_id,
        payload,
    };
    deliver(&app.realtime.presence, conn.user_id, target, event)
}

/// Handle `signal:reconnect`: same resolution as `relay`, but forwards a
/// reconnection request so the peer restarts its peer connection without
/// tearing down the call.
pub async fn reconnect(
    app: &AppState,
    conn: &Arc<Connection>,
    recipient_id: Option<Uuid>,
    call_id: Option<Uuid>,
) -> Result<ServerEvent, EventError> {
    let target = resolve_target(&app.realtime.calls, conn.user_id, recipient_id, call_id)?;

    tracing::debug!(
        sender = %conn.user_id,
        recipient = %target.recipient_id,
        call_id = ?target.call_id,
        "Relaying reconnection request"
    );

    let event = ServerEvent::SignalReconnect {
        sender_id: conn.user_id,
        call_id: target.call_id,
    };
    deliver(&app.realtime.presence, conn.user_id, target, event)
}
