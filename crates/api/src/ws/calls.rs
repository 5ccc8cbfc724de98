//! Call lifecycle coordination
//!
//! State machine per call: `ringing -> ongoing -> {ended, missed}`. The
//! persisted record is the source of truth for transitions (conditional
//! UPDATEs give first-committer-wins); the in-memory registry mirrors the
//! participant set and timing for O(1) signaling and disconnect lookups.
//! The registry does not survive a process restart.

use std::sync::Arc;

use dashmap::DashMap;
use time::OffsetDateTime;
use tokio_retry::{strategy::FixedInterval, Retry};
use uuid::Uuid;

use wavelink_shared::{CallStatus, CallType};

use crate::state::AppState;
use crate::store;

use super::connection::Connection;
use super::error::EventError;
use super::events::{AckStatus, ServerEvent};

/// In-memory mirror of a call in flight
#[derive(Debug, Clone)]
pub struct ActiveCallEntry {
    pub call_id: Uuid,
    pub call_type: CallType,
    pub is_group: bool,
    /// Reachable participants at initiation time, initiator first
    pub participants: Vec<Uuid>,
    pub initiator_id: Uuid,
    /// Set on the `ringing -> ongoing` transition
    pub started_at: Option<OffsetDateTime>,
}

impl ActiveCallEntry {
    pub fn contains(&self, user_id: &Uuid) -> bool {
        self.participants.contains(user_id)
    }

    /// First participant that isn't the given user.
    ///
    /// For group calls this resolves a single peer only; mesh fan-out is a
    /// documented non-goal of the signaling relay.
    pub fn other_participant(&self, user_id: &Uuid) -> Option<Uuid> {
        self.participants.iter().find(|p| *p != user_id).copied()
    }
}

/// Registry of calls in flight, keyed by call id
///
/// Per-key atomic upsert/delete; no lock is held across suspension points.
#[derive(Default)]
pub struct ActiveCallRegistry {
    calls: DashMap<Uuid, ActiveCallEntry>,
}

impl ActiveCallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, entry: ActiveCallEntry) {
        self.calls.insert(entry.call_id, entry);
    }

    pub fn remove(&self, call_id: &Uuid) -> Option<ActiveCallEntry> {
        self.calls.remove(call_id).map(|(_, entry)| entry)
    }

    pub fn get(&self, call_id: &Uuid) -> Option<ActiveCallEntry> {
        self.calls.get(call_id).map(|entry| entry.value().clone())
    }

    /// Record the `ongoing` start time on the mirrored entry
    pub fn set_started(&self, call_id: &Uuid, started_at: OffsetDateTime) {
        if let Some(mut entry) = self.calls.get_mut(call_id) {
            entry.started_at = Some(started_at);
        }
    }

    /// First active call the user participates in
    pub fn find_for_user(&self, user_id: &Uuid) -> Option<ActiveCallEntry> {
        self.calls
            .iter()
            .find(|entry| entry.contains(user_id))
            .map(|entry| entry.value().clone())
    }

    /// Every active call the user participates in (disconnect teardown)
    pub fn all_for_user(&self, user_id: &Uuid) -> Vec<ActiveCallEntry> {
        self.calls
            .iter()
            .filter(|entry| entry.contains(user_id))
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

/// Whole seconds elapsed since the call went `ongoing`; 0 if it never did
fn elapsed_secs(started_at: Option<OffsetDateTime>) -> i64 {
    match started_at {
        Some(start) => (OffsetDateTime::now_utc() - start).whole_seconds().max(0),
        None => 0,
    }
}

/// Deliver an event to a participant's current connection, retrying a small
/// fixed number of times before giving up. Best-effort per recipient.
async fn notify_participant(app: &AppState, user_id: Uuid, event: ServerEvent) {
    let strategy = FixedInterval::from_millis(200).take(2);
    let presence = Arc::clone(&app.realtime.presence);

    let result = Retry::spawn(strategy, || {
        let event = event.clone();
        let presence = Arc::clone(&presence);
        async move {
            match presence.resolve(&user_id) {
                Some(conn) => conn.send(event).map_err(|_| ()),
                None => Err(()),
            }
        }
    })
    .await;

    if result.is_err() {
        tracing::warn!(user_id = %user_id, "Failed to deliver call notification");
    }
}

/// Handle `call:initiate`
pub async fn initiate(
    app: &AppState,
    conn: &Arc<Connection>,
    recipient_id: Option<Uuid>,
    call_type: CallType,
    is_group: bool,
    participants: Option<Vec<Uuid>>,
) -> Result<ServerEvent, EventError> {
    // 1. Validate shape and compute the candidate participant set
    let candidates: Vec<Uuid> = if is_group {
        let list = participants
            .unwrap_or_default()
            .into_iter()
            .filter(|p| *p != conn.user_id)
            .collect::<Vec<_>>();
        if list.is_empty() {
            return Err(EventError::validation(
                "Group calls require a non-empty participant list",
            ));
        }
        let mut deduped = vec![conn.user_id];
        for p in list {
            if !deduped.contains(&p) {
                deduped.push(p);
            }
        }
        deduped
    } else {
        let recipient = recipient_id
            .ok_or_else(|| EventError::validation("1:1 calls require a recipient_id"))?;
        if recipient == conn.user_id {
            return Err(EventError::validation("Cannot call yourself"));
        }
        vec![conn.user_id, recipient]
    };

    // 2. Filter to reachable participants (initiator is reachable by definition)
    let reachable: Vec<Uuid> = candidates
        .into_iter()
        .filter(|p| *p == conn.user_id || app.realtime.presence.is_online(p))
        .collect();

    // 3. A call cannot proceed with only the initiator present
    if reachable.len() < 2 {
        return Err(EventError::validation("Recipient not available"));
    }

    // 4. Persist the ringing record, then mirror it in the registry
    let record = store::calls::create(
        &app.pool,
        &store::calls::NewCall {
            call_type,
            is_group,
            participants: reachable.clone(),
            initiator_id: conn.user_id,
        },
    )
    .await?;

    app.realtime.calls.insert(ActiveCallEntry {
        call_id: record.id,
        call_type,
        is_group,
        participants: reachable.clone(),
        initiator_id: conn.user_id,
        started_at: None,
    });

    // 5. Ring everyone except the initiator
    let initiator = match store::users::profile(&app.pool, conn.user_id).await {
        Ok(Some(profile)) => profile,
        Ok(None) | Err(_) => conn.fallback_profile(),
    };

    for participant in reachable.iter().filter(|p| **p != conn.user_id) {
        notify_participant(
            app,
            *participant,
            ServerEvent::CallIncoming {
                call_id: record.id,
                initiator: initiator.clone(),
                call_type,
                is_group,
                participants: reachable.clone(),
            },
        )
        .await;
    }

    tracing::info!(
        call_id = %record.id,
        initiator = %conn.user_id,
        participants = reachable.len(),
        call_type = call_type.as_str(),
        "Call initiated"
    );

    Ok(ServerEvent::CallAck {
        status: AckStatus::Success,
        call_id: Some(record.id),
        initiator_id: None,
        participants: Some(reachable),
        reason: None,
    })
}

/// Handle `call:accept`
pub async fn accept(
    app: &AppState,
    conn: &Arc<Connection>,
    call_id: Uuid,
) -> Result<ServerEvent, EventError> {
    let record = store::calls::find(&app.pool, call_id)
        .await?
        .ok_or_else(|| EventError::not_found("Call not found"))?;

    if !record.participants.contains(&conn.user_id) {
        return Err(EventError::forbidden("Not a participant of this call"));
    }

    // Guarded transition: a call already answered, rejected, or ended stays
    // as the first committer left it.
    let updated = store::calls::set_ongoing(&app.pool, call_id)
        .await?
        .ok_or_else(|| EventError::conflict("Call is no longer ringing"))?;

    let started_at = updated.started_at.unwrap_or_else(OffsetDateTime::now_utc);
    app.realtime.calls.set_started(&call_id, started_at);

    // Notify the initiator and, for group calls, every other participant
    for participant in updated.participants.iter().filter(|p| **p != conn.user_id) {
        notify_participant(
            app,
            *participant,
            ServerEvent::CallAccepted {
                call_id,
                accepted_by: conn.user_id,
            },
        )
        .await;
    }

    tracing::info!(call_id = %call_id, accepted_by = %conn.user_id, "Call accepted");

    Ok(ServerEvent::CallAck {
        status: AckStatus::Success,
        call_id: Some(call_id),
        initiator_id: Some(updated.initiator_id),
        participants: None,
        reason: None,
    })
}

/// Handle `call:reject`
pub async fn reject(
    app: &AppState,
    conn: &Arc<Connection>,
    call_id: Uuid,
    reason: Option<String>,
) -> Result<ServerEvent, EventError> {
    let record = store::calls::find(&app.pool, call_id)
        .await?
        .ok_or_else(|| EventError::not_found("Call not found"))?;

    if !record.participants.contains(&conn.user_id) {
        return Err(EventError::forbidden("Not a participant of this call"));
    }

    let updated = store::calls::finish(&app.pool, call_id, CallStatus::Missed, 0)
        .await?
        .ok_or_else(|| EventError::conflict("Call already ended"))?;

    app.realtime.calls.remove(&call_id);

    for participant in updated.participants.iter().filter(|p| **p != conn.user_id) {
        notify_participant(
            app,
            *participant,
            ServerEvent::CallRejected {
                call_id,
                rejected_by: conn.user_id,
                reason: reason.clone(),
            },
        )
        .await;
    }

    tracing::info!(call_id = %call_id, rejected_by = %conn.user_id, "Call rejected");

    Ok(ServerEvent::CallAck {
        status: AckStatus::Success,
        call_id: Some(call_id),
        initiator_id: None,
        participants: None,
        reason: None,
    })
}

/// Handle `call:end`
///
/// With no explicit id, resolves the first active call the caller
/// participates in. Concurrent ends are idempotent: the loser's guarded
/// UPDATE matches nothing and it gets a failure ack.
pub async fn end(
    app: &AppState,
    conn: &Arc<Connection>,
    call_id: Option<Uuid>,
    reason: Option<String>,
) -> Result<ServerEvent, EventError> {
    let entry = match call_id {
        Some(id) => app.realtime.calls.get(&id),
        None => app.realtime.calls.find_for_user(&conn.user_id),
    }
    .ok_or_else(|| EventError::not_found("No active call found"))?;

    // An explicit call_id still requires the caller to be a party to it
    if !entry.contains(&conn.user_id) {
        return Err(EventError::forbidden("Not a participant of this call"));
    }

    let duration = elapsed_secs(entry.started_at);

    let updated = store::calls::finish(&app.pool, entry.call_id, CallStatus::Ended, duration)
        .await?
        .ok_or_else(|| EventError::conflict("Call already ended"))?;

    app.realtime.calls.remove(&entry.call_id);

    for participant in updated.participants.iter().filter(|p| **p != conn.user_id) {
        notify_participant(
            app,
            *participant,
            ServerEvent::CallEnded {
                call_id: entry.call_id,
                ended_by: conn.user_id,
                reason: reason.clone(),
                duration,
            },
        )
        .await;
    }

    tracing::info!(call_id = %entry.call_id, ended_by = %conn.user_id, duration, "Call ended");

    Ok(ServerEvent::CallAck {
        status: AckStatus::Success,
        call_id: Some(entry.call_id),
        initiator_id: None,
        participants: None,
        reason: None,
    })
}

/// Disconnect teardown: end every active call the departing user was party
/// to and notify the remaining participants. Failures are isolated per call
/// so one bad record can't block cleanup of the rest.
pub async fn end_all_for_disconnect(app: &AppState, user_id: Uuid) {
    for entry in app.realtime.calls.all_for_user(&user_id) {
        let duration = elapsed_secs(entry.started_at);

        match store::calls::finish(&app.pool, entry.call_id, CallStatus::Ended, duration).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                // Lost the race with an explicit end; registry entry may
                // already be gone too.
                app.realtime.calls.remove(&entry.call_id);
                continue;
            }
            Err(e) => {
                tracing::error!(
                    error = ?e,
                    call_id = %entry.call_id,
                    "Failed to persist call end on disconnect"
                );
                // Still drop the mirror and notify peers so they don't hang
            }
        }

        app.realtime.calls.remove(&entry.call_id);

        for participant in entry.participants.iter().filter(|p| **p != user_id) {
            notify_participant(
                app,
                *participant,
                ServerEvent::CallEnded {
                    call_id: entry.call_id,
                    ended_by: user_id,
                    reason: Some("User disconnected".to_string()),
                    duration,
                },
            )
            .await;
        }

        tracing::info!(
            call_id = %entry.call_id,
            user_id = %user_id,
            duration,
            "Call ended by disconnect"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(participants: Vec<Uuid>) -> ActiveCallEntry {
        ActiveCallEntry {
            call_id: Uuid::new_v4(),
            call_type: CallType::Audio,
            is_group: false,
            initiator_id: participants[0],
            participants,
            started_at: None,
        }
    }

    #[test]
    fn test_registry_insert_get_remove() {
        let registry = ActiveCallRegistry::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let call = entry(vec![a, b]);
        let call_id = call.call_id;

        registry.insert(call);
        assert_eq!(registry.len(), 1);
        assert!(registry.get(&call_id).is_some());

        let removed = registry.remove(&call_id).unwrap();
        assert_eq!(removed.call_id, call_id);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_find_for_user() {
        let registry = ActiveCallRegistry::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let outsider = Uuid::new_v4();

        registry.insert(entry(vec![a, b]));

        assert!(registry.find_for_user(&a).is_some());
        assert!(registry.find_for_user(&b).is_some());
        assert!(registry.find_for_user(&outsider).is_none());
    }

    #[test]
    fn test_entry_membership_excludes_outsider() {
        let registry = ActiveCallRegistry::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let outsider = Uuid::new_v4();

        let call = entry(vec![a, b]);
        let call_id = call.call_id;
        registry.insert(call);

        // Looking an entry up by id does not confer membership: the
        // participant check must still reject an outsider holding the id.
        let found = registry.get(&call_id).unwrap();
        assert!(found.contains(&a));
        assert!(found.contains(&b));
        assert!(!found.contains(&outsider));
    }

    #[test]
    fn test_other_participant_never_self() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let call = entry(vec![a, b]);

        assert_eq!(call.other_participant(&a), Some(b));
        assert_eq!(call.other_participant(&b), Some(a));

        let lonely = entry(vec![a]);
        assert_eq!(lonely.other_participant(&a), None);
    }

    #[test]
    fn test_set_started_updates_mirror() {
        let registry = ActiveCallRegistry::new();
        let call = entry(vec![Uuid::new_v4(), Uuid::new_v4()]);
        let call_id = call.call_id;
        registry.insert(call);

        let now = OffsetDateTime::now_utc();
        registry.set_started(&call_id, now);

        assert_eq!(registry.get(&call_id).unwrap().started_at, Some(now));
    }

    #[test]
    fn test_elapsed_secs() {
        assert_eq!(elapsed_secs(None), 0);

        let started = OffsetDateTime::now_utc() - time::Duration::seconds(45);
        let duration = elapsed_secs(Some(started));
        assert!((45..=46).contains(&duration));

        // Clock skew must not produce negative durations
        let future = OffsetDateTime::now_utc() + time::Duration::seconds(10);
        assert_eq!(elapsed_secs(Some(future)), 0);
    }
}
