//! Shared application state

use redis::aio::ConnectionManager;
use sqlx::PgPool;
use std::sync::Arc;

use crate::auth::jwt::JwtManager;
use crate::cache::MessageCache;
use crate::config::Config;
use crate::ws::RealtimeState;

/// Application state shared across all routes and connections
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub pool: PgPool,
    /// Application configuration
    pub config: Arc<Config>,
    /// JWT token manager
    pub jwt_manager: Arc<JwtManager>,
    /// Transient message cache (redis)
    pub message_cache: MessageCache,
    /// Global realtime state (connections, rooms, presence, active calls)
    pub realtime: RealtimeState,
}

impl AppState {
    pub fn new(pool: PgPool, redis: ConnectionManager, config: Config) -> Self {
        let jwt_manager = Arc::new(JwtManager::new(
            &config.jwt_secret,
            config.jwt_expiry_hours,
        ));
        let message_cache = MessageCache::new(redis, config.message_cache_ttl_secs);

        Self {
            pool,
            config: Arc::new(config),
            jwt_manager,
            message_cache,
            realtime: RealtimeState::new(),
        }
    }
}
