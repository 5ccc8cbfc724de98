//! Transient message cache backed by redis
//!
//! Recently sent messages are cached with a TTL so re-delivery after a
//! client reconnect doesn't hit the database. Strictly best-effort: every
//! failure is logged and swallowed.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use uuid::Uuid;

use wavelink_shared::MessageRecord;

/// Key-value cache with expiry for recently relayed messages
#[derive(Clone)]
pub struct MessageCache {
    redis: ConnectionManager,
    ttl_secs: u64,
}

impl MessageCache {
    pub fn new(redis: ConnectionManager, ttl_secs: u64) -> Self {
        Self { redis, ttl_secs }
    }

    fn key(message_id: &Uuid) -> String {
        format!("message:{message_id}")
    }

    /// Cache a message with the configured TTL
    pub async fn set(&self, message: &MessageRecord) {
        let json = match serde_json::to_string(message) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(error = ?e, message_id = %message.id, "Failed to serialize message for cache");
                return;
            }
        };

        let mut conn = self.redis.clone();
        if let Err(e) = conn
            .set_ex::<_, _, ()>(Self::key(&message.id), json, self.ttl_secs)
            .await
        {
            tracing::warn!(error = ?e, message_id = %message.id, "Failed to cache message");
        }
    }

    /// Fetch a cached message, if present and not expired
    pub async fn get(&self, message_id: &Uuid) -> Option<String> {
        let mut conn = self.redis.clone();
        match conn.get::<_, Option<String>>(Self::key(message_id)).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = ?e, message_id = %message_id, "Failed to read message cache");
                None
            }
        }
    }

    /// Drop a cached message
    pub async fn delete(&self, message_id: &Uuid) {
        let mut conn = self.redis.clone();
        if let Err(e) = conn.del::<_, ()>(Self::key(message_id)).await {
            tracing::warn!(error = ?e, message_id = %message_id, "Failed to evict cached message");
        }
    }
}
