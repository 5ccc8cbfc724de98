//! Presence tracking
//!
//! Two layers: the in-process directory (user id -> authoritative connection,
//! used for direct addressing and reachability checks) and the persisted
//! presence record (status + last-seen, best-effort). Storage failures are
//! logged and swallowed: presence must never block message delivery or kill
//! a connection.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use sqlx::PgPool;
use uuid::Uuid;

use wavelink_shared::PresenceStatus;

use crate::state::AppState;
use crate::store;

use super::connection::Connection;
use super::events::ServerEvent;

/// Interval between server-side last-seen refreshes while connected
pub const PRESENCE_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Directory of currently addressable users
///
/// At most one authoritative connection per user: registering a new
/// connection supersedes the previous one (reconnect semantics). Per-key
/// atomic upsert/delete, no global lock.
#[derive(Default)]
pub struct PresenceDirectory {
    inner: DashMap<Uuid, Arc<Connection>>,
}

impl PresenceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection as the user's authoritative one.
    ///
    /// Returns the superseded connection, if any.
    pub fn register(&self, conn: Arc<Connection>) -> Option<Arc<Connection>> {
        self.inner.insert(conn.user_id, conn)
    }

    /// Remove the user's directory entry, but only if it still belongs to the
    /// given session. A reconnect that superseded this session leaves the new
    /// entry untouched.
    ///
    /// Returns true if this session was the authoritative one.
    pub fn unregister(&self, user_id: Uuid, session_id: Uuid) -> bool {
        self.inner
            .remove_if(&user_id, |_, conn| conn.session_id == session_id)
            .is_some()
    }

    /// Resolve a user to their current connection handle
    pub fn resolve(&self, user_id: &Uuid) -> Option<Arc<Connection>> {
        self.inner.get(user_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Reachability check used by call setup
    pub fn is_online(&self, user_id: &Uuid) -> bool {
        self.inner.contains_key(user_id)
    }

    pub fn online_count(&self) -> usize {
        self.inner.len()
    }
}

/// Mark a user online: directory registration, persisted status upsert, and
/// `user:online` fan-out to all connected clients.
pub async fn mark_online(app: &AppState, conn: Arc<Connection>) {
    let user_id = conn.user_id;

    if let Some(superseded) = app.realtime.presence.register(conn) {
        tracing::info!(
            user_id = %user_id,
            old_session = %superseded.session_id,
            "Presence superseded by reconnect"
        );
    }

    if let Err(e) = store::presence::upsert_status(&app.pool, user_id, PresenceStatus::Online).await
    {
        tracing::error!(error = ?e, user_id = %user_id, "Failed to persist online presence");
    }

    app.realtime
        .broadcast_all(ServerEvent::UserOnline { user_id })
        .await;
}

/// Periodic last-seen refresh while connected
pub async fn touch(pool: &PgPool, user_id: Uuid) {
    if let Err(e) = store::presence::touch_last_seen(pool, user_id).await {
        tracing::warn!(error = ?e, user_id = %user_id, "Failed to refresh last-seen");
    }
}

/// Mark a user offline on disconnect.
///
/// Returns true if this session was the authoritative one; a superseded
/// session returns false and the caller skips offline fan-out and call
/// teardown (the user is still connected elsewhere).
pub async fn mark_offline(app: &AppState, conn: &Connection) -> bool {
    let user_id = conn.user_id;

    if !app.realtime.presence.unregister(user_id, conn.session_id) {
        tracing::debug!(
            user_id = %user_id,
            session_id = %conn.session_id,
            "Skipping offline transition for superseded session"
        );
        return false;
    }

    if let Err(e) =
        store::presence::upsert_status(&app.pool, user_id, PresenceStatus::Offline).await
    {
        tracing::error!(error = ?e, user_id = %user_id, "Failed to persist offline presence");
    }

    app.realtime
        .broadcast_all(ServerEvent::UserOffline { user_id })
        .await;

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn test_conn(user_id: Uuid) -> Arc<Connection> {
        let (tx, _rx) = mpsc::unbounded_channel();
        Arc::new(Connection::new(user_id, "user".to_string(), tx))
    }

    #[test]
    fn test_register_and_resolve() {
        let directory = PresenceDirectory::new();
        let user_id = Uuid::new_v4();
        let conn = test_conn(user_id);

        assert!(!directory.is_online(&user_id));
        assert!(directory.register(Arc::clone(&conn)).is_none());
        assert!(directory.is_online(&user_id));

        let resolved = directory.resolve(&user_id).unwrap();
        assert_eq!(resolved.session_id, conn.session_id);
    }

    #[test]
    fn test_reconnect_supersedes() {
        let directory = PresenceDirectory::new();
        let user_id = Uuid::new_v4();

        let first = test_conn(user_id);
        let second = test_conn(user_id);

        assert!(directory.register(Arc::clone(&first)).is_none());
        let superseded = directory.register(Arc::clone(&second)).unwrap();
        assert_eq!(superseded.session_id, first.session_id);

        // The stale session must not tear down the new entry
        assert!(!directory.unregister(user_id, first.session_id));
        assert!(directory.is_online(&user_id));

        // The authoritative session does
        assert!(directory.unregister(user_id, second.session_id));
        assert!(!directory.is_online(&user_id));
    }

    #[test]
    fn test_online_count() {
        let directory = PresenceDirectory::new();
        directory.register(test_conn(Uuid::new_v4()));
        directory.register(test_conn(Uuid::new_v4()));
        assert_eq!(directory.online_count(), 2);
    }
}
