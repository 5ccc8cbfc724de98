//! Thin storage collaborators
//!
//! One module per entity the realtime core touches. Each function issues a
//! single query and returns the driver error untouched; policy (ack vs log,
//! best-effort vs primary path) lives with the callers.

pub mod calls;
pub mod chats;
pub mod messages;
pub mod presence;
pub mod users;
