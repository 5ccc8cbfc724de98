//! Realtime WebSocket core
//!
//! Authenticated sessions, presence, conversation relay with
//! delivery/read receipts, typing indicators, and call signaling:
//! - **Connection**: an authenticated WebSocket connection and its timers
//! - **Rooms**: conversation-scoped pub/sub
//! - **Presence**: user -> connection directory plus persisted status
//! - **Relay**: message send and receipt-state transitions
//! - **Typing**: auto-expiring typing indicators
//! - **Calls**: call lifecycle state machine and active-call registry
//! - **Signaling**: opaque peer-connection payload forwarding
//! - **Handler**: Axum WebSocket route, dispatch, disconnect cleanup

pub mod calls;
pub mod connection;
pub mod error;
pub mod events;
pub mod handler;
pub mod presence;
pub mod relay;
pub mod rooms;
pub mod signaling;
pub mod state;
pub mod typing;

pub use handler::ws_handler;
pub use state::RealtimeState;
