//! Wavelink API Library
//!
//! This crate contains the realtime server components for Wavelink:
//! WebSocket session handling, presence, chat relay, and call signaling.

pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod store;
pub mod ws;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;
