//! Global realtime state
//!
//! Everything shared across connections: the connection table, conversation
//! rooms, the presence directory, and the active-call registry.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::calls::ActiveCallRegistry;
use super::connection::Connection;
use super::events::ServerEvent;
use super::presence::PresenceDirectory;
use super::rooms::RoomManager;

/// Global realtime state shared across all connections
#[derive(Clone)]
pub struct RealtimeState {
    /// All active connections indexed by session_id
    pub connections: Arc<RwLock<HashMap<Uuid, Arc<Connection>>>>,

    /// Room manager for conversation subscriptions
    pub rooms: Arc<RoomManager>,

    /// Directory of currently addressable users
    pub presence: Arc<PresenceDirectory>,

    /// In-memory mirror of calls in flight
    pub calls: Arc<ActiveCallRegistry>,
}

impl RealtimeState {
    /// Create new realtime state
    pub fn new() -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            rooms: Arc::new(RoomManager::new()),
            presence: Arc::new(PresenceDirectory::new()),
            calls: Arc::new(ActiveCallRegistry::new()),
        }
    }

    /// Add a connection
    pub async fn add_connection(&self, conn: Connection) -> Arc<Connection> {
        let conn = Arc::new(conn);
        let mut connections = self.connections.write().await;
        connections.insert(conn.session_id, Arc::clone(&conn));

        tracing::info!(
            session_id = %conn.session_id,
            user_id = %conn.user_id,
            total_connections = connections.len(),
            "WebSocket connection added"
        );

        conn
    }

    /// Remove a connection and its room memberships
    pub async fn remove_connection(&self, session_id: &Uuid) {
        let mut connections = self.connections.write().await;
        if let Some(conn) = connections.remove(session_id) {
            self.rooms.remove_connection(session_id).await;

            tracing::info!(
                session_id = %session_id,
                user_id = %conn.user_id,
                remaining_connections = connections.len(),
                "WebSocket connection removed"
            );
        }
    }

    /// Send an event to every connected client (presence fan-out)
    pub async fn broadcast_all(&self, event: ServerEvent) {
        let connections = self.connections.read().await;
        for conn in connections.values() {
            let _ = conn.send(event.clone());
        }
    }

    /// Get total number of active connections
    pub async fn connection_count(&self) -> usize {
        let connections = self.connections.read().await;
        connections.len()
    }

    /// Get statistics about the realtime state
    pub async fn get_stats(&self) -> RealtimeStats {
        RealtimeStats {
            active_connections: self.connection_count().await,
            active_rooms: self.rooms.get_room_count().await,
            online_users: self.presence.online_count(),
            active_calls: self.calls.len(),
        }
    }
}

impl Default for RealtimeState {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics about the realtime core
#[derive(Debug, Clone)]
pub struct RealtimeStats {
    pub active_connections: usize,
    pub active_rooms: usize,
    pub online_users: usize,
    pub active_calls: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_add_and_remove_connection() {
        let state = RealtimeState::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let user_id = Uuid::new_v4();

        let conn = Connection::new(user_id, "user".to_string(), tx);
        let session_id = conn.session_id;

        // Add connection
        let added_conn = state.add_connection(conn).await;
        assert_eq!(state.connection_count().await, 1);
        assert_eq!(added_conn.user_id, user_id);

        // Remove connection
        state.remove_connection(&session_id).await;
        assert_eq!(state.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_broadcast_all() {
        let state = RealtimeState::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();

        state
            .add_connection(Connection::new(Uuid::new_v4(), "a".to_string(), tx1))
            .await;
        state
            .add_connection(Connection::new(Uuid::new_v4(), "b".to_string(), tx2))
            .await;

        state
            .broadcast_all(ServerEvent::UserOnline {
                user_id: Uuid::new_v4(),
            })
            .await;

        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_stats() {
        let state = RealtimeState::new();
        let (tx, _rx) = mpsc::unbounded_channel();

        state
            .add_connection(Connection::new(Uuid::new_v4(), "user".to_string(), tx))
            .await;

        let stats = state.get_stats().await;
        assert_eq!(stats.active_connections, 1);
        assert_eq!(stats.active_rooms, 0);
        assert_eq!(stats.active_calls, 0);
    }
}
