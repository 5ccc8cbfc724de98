//! WebSocket connection management
//!
//! Represents an active, authenticated WebSocket connection with its room
//! subscriptions and per-conversation typing timers.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use wavelink_shared::UserProfile;

use super::events::ServerEvent;

/// Represents an active WebSocket connection
#[derive(Debug)]
pub struct Connection {
    /// Unique session ID for this connection
    pub session_id: Uuid,

    /// Authenticated user ID
    pub user_id: Uuid,

    /// Username from the validated token (profile fallback)
    pub username: String,

    /// Channel to send events to this connection
    pub sender: mpsc::UnboundedSender<ServerEvent>,

    /// Set of conversation IDs this connection is subscribed to
    pub subscriptions: Arc<RwLock<HashSet<Uuid>>>,

    /// Armed typing auto-stop timers, keyed by conversation
    typing_timers: Mutex<HashMap<Uuid, JoinHandle<()>>>,
}

impl Connection {
    /// Create a new connection
    pub fn new(user_id: Uuid, username: String, sender: mpsc::UnboundedSender<ServerEvent>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            user_id,
            username,
            sender,
            subscriptions: Arc::new(RwLock::new(HashSet::new())),
            typing_timers: Mutex::new(HashMap::new()),
        }
    }

    /// Send an event to this connection
    ///
    /// Returns Ok(()) if sent successfully, Err if connection is closed
    #[allow(clippy::result_large_err)] // Error type is from tokio mpsc, containing the failed event
    pub fn send(&self, event: ServerEvent) -> Result<(), mpsc::error::SendError<ServerEvent>> {
        self.sender.send(event)
    }

    /// Subscribe to a conversation channel
    pub async fn subscribe(&self, conversation_id: Uuid) {
        let mut subs = self.subscriptions.write().await;
        subs.insert(conversation_id);
    }

    /// Check if subscribed to a conversation (typing-indicator gate)
    pub async fn is_subscribed(&self, conversation_id: &Uuid) -> bool {
        let subs = self.subscriptions.read().await;
        subs.contains(conversation_id)
    }

    /// Arm a typing timer, replacing (not stacking) any timer already armed
    /// for this conversation
    pub async fn arm_typing_timer(&self, conversation_id: Uuid, handle: JoinHandle<()>) {
        let mut timers = self.typing_timers.lock().await;
        if let Some(prev) = timers.insert(conversation_id, handle) {
            prev.abort();
        }
    }

    /// Cancel the typing timer for a conversation, if armed
    pub async fn cancel_typing_timer(&self, conversation_id: &Uuid) {
        let mut timers = self.typing_timers.lock().await;
        if let Some(handle) = timers.remove(conversation_id) {
            handle.abort();
        }
    }

    /// Drop a fired timer's own handle without aborting (called from the
    /// timer task after it emits its stop event)
    pub async fn forget_typing_timer(&self, conversation_id: &Uuid) {
        let mut timers = self.typing_timers.lock().await;
        timers.remove(conversation_id);
    }

    /// Cancel all typing timers (disconnect cleanup)
    pub async fn cancel_all_typing_timers(&self) {
        let mut timers = self.typing_timers.lock().await;
        for (_, handle) in timers.drain() {
            handle.abort();
        }
    }

    /// Minimal profile built from token claims, used when the store lookup
    /// fails or the row has vanished mid-session
    pub fn fallback_profile(&self) -> UserProfile {
        UserProfile {
            id: self.user_id,
            username: self.username.clone(),
            display_name: None,
            avatar_url: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_conn() -> Connection {
        let (tx, _rx) = mpsc::unbounded_channel();
        Connection::new(Uuid::new_v4(), "alice".to_string(), tx)
    }

    #[tokio::test]
    async fn test_connection_subscription() {
        let conn = test_conn();
        let chat1 = Uuid::new_v4();
        let chat2 = Uuid::new_v4();

        // Initially not subscribed
        assert!(!conn.is_subscribed(&chat1).await);

        conn.subscribe(chat1).await;
        conn.subscribe(chat2).await;

        assert!(conn.is_subscribed(&chat1).await);
        assert!(conn.is_subscribed(&chat2).await);
        assert!(!conn.is_subscribed(&Uuid::new_v4()).await);
    }

    #[tokio::test]
    async fn test_typing_timer_replaced_not_stacked() {
        let conn = test_conn();
        let chat_id = Uuid::new_v4();

        let first = tokio::spawn(async {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        });
        conn.arm_typing_timer(chat_id, first).await;

        let second = tokio::spawn(async {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        });
        conn.arm_typing_timer(chat_id, second).await;

        // The first handle was aborted when the second was armed
        let timers = conn.typing_timers.lock().await;
        assert_eq!(timers.len(), 1);
    }

    #[tokio::test]
    async fn test_fallback_profile_from_claims() {
        let conn = test_conn();
        let profile = conn.fallback_profile();
        assert_eq!(profile.id, conn.user_id);
        assert_eq!(profile.username, "alice");
        assert!(profile.display_name.is_none());
    }
}
