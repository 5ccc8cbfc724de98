//! HTTP routes
//!
//! The realtime core owns one upgrade endpoint and the health probes; chat
//! and profile CRUD live in a separate REST service.

pub mod health;
