//! Conversation room management for pub/sub
//!
//! A room is the broadcast group for one conversation, plus one personal
//! room per user id for direct addressing. Connections leave all their rooms
//! at once on disconnect; there is no mid-session membership churn.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::connection::Connection;
use super::events::ServerEvent;

/// Manages conversation rooms for broadcasting events
pub struct RoomManager {
    /// Map of room_id -> list of connections
    rooms: Arc<RwLock<HashMap<Uuid, Vec<Arc<Connection>>>>>,
}

impl RoomManager {
    /// Create a new room manager
    pub fn new() -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Add a connection to a room
    pub async fn join(&self, room_id: Uuid, conn: Arc<Connection>) {
        let mut rooms = self.rooms.write().await;
        rooms.entry(room_id).or_default().push(Arc::clone(&conn));

        let count = rooms.get(&room_id).map(|v| v.len()).unwrap_or(0);
        tracing::debug!(
            room_id = %room_id,
            session_id = %conn.session_id,
            room_size = count,
            "Connection joined room"
        );
    }

    /// Broadcast an event to every connection in a room except the named
    /// session (the originating sender).
    ///
    /// Silently ignores send errors (closed connections will be cleaned up)
    pub async fn broadcast_except(&self, room_id: &Uuid, except: &Uuid, event: ServerEvent) {
        let rooms = self.rooms.read().await;
        let Some(conns) = rooms.get(room_id) else {
            tracing::debug!(room_id = %room_id, "No subscribers for room");
            return;
        };

        let mut delivered = 0;
        let mut failed = 0;
        for conn in conns {
            if conn.session_id == *except {
                continue;
            }
            match conn.send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    failed += 1;
                    tracing::warn!(
                        session_id = %conn.session_id,
                        "Failed to send event to connection (likely closed)"
                    );
                }
            }
        }

        tracing::debug!(
            room_id = %room_id,
            recipients = delivered,
            failed = failed,
            "Broadcast event to room"
        );
    }

    /// Remove a connection from all rooms (disconnect cleanup)
    pub async fn remove_connection(&self, session_id: &Uuid) {
        let mut rooms = self.rooms.write().await;
        for conns in rooms.values_mut() {
            conns.retain(|c| c.session_id != *session_id);
        }

        // Clean up empty rooms
        rooms.retain(|_, conns| !conns.is_empty());
    }

    /// Get total number of active rooms
    pub async fn get_room_count(&self) -> usize {
        let rooms = self.rooms.read().await;
        rooms.len()
    }
}

impl Default for RoomManager {
    fn default() -> Self {
        Self::new()
    }
}
