//! WebSocket event types and serialization
//!
//! Defines all client-to-server and server-to-client event types with
//! type-safe serde serialization. Every inbound request event that expects a
//! response gets exactly one typed ack (`message:ack`, `call:ack`,
//! `signal:ack`); malformed frames are rejected at this boundary instead of
//! failing deep inside a handler.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use wavelink_shared::{CallType, MessageType, UserProfile};

// =============================================================================
// Client-to-Server Events
// =============================================================================

/// Events sent from client to server
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Send a chat message to a conversation
    #[serde(rename = "message:send")]
    MessageSend {
        conversation_id: Uuid,
        content: Option<String>,
        message_type: MessageType,
        attachment_url: Option<String>,
        attachment_name: Option<String>,
        reply_to: Option<Uuid>,
    },

    /// Confirm delivery of a message to this device
    #[serde(rename = "message:delivered")]
    MessageDelivered { message_id: Uuid },

    /// Mark every unread message in a conversation as read
    #[serde(rename = "messages:read")]
    MessagesRead { conversation_id: Uuid },

    /// Start typing in a conversation
    #[serde(rename = "typing:start")]
    TypingStart { conversation_id: Uuid },

    /// Stop typing in a conversation
    #[serde(rename = "typing:stop")]
    TypingStop { conversation_id: Uuid },

    /// Start a 1:1 or group call
    #[serde(rename = "call:initiate")]
    CallInitiate {
        recipient_id: Option<Uuid>,
        call_type: CallType,
        #[serde(default)]
        is_group: bool,
        participants: Option<Vec<Uuid>>,
    },

    /// Accept a ringing call
    #[serde(rename = "call:accept")]
    CallAccept { call_id: Uuid },

    /// Reject a ringing call
    #[serde(rename = "call:reject")]
    CallReject {
        call_id: Uuid,
        reason: Option<String>,
    },

    /// End a call (explicit id, or resolved from the caller's active calls)
    #[serde(rename = "call:end")]
    CallEnd {
        call_id: Option<Uuid>,
        reason: Option<String>,
    },

    /// Relay an opaque peer-connection handshake payload
    #[serde(rename = "signal:relay")]
    SignalRelay {
        payload: Value,
        recipient_id: Option<Uuid>,
        call_id: Option<Uuid>,
    },

    /// Request the peer to restart its peer connection
    #[serde(rename = "signal:reconnect")]
    SignalReconnect {
        recipient_id: Option<Uuid>,
        call_id: Option<Uuid>,
    },
}

// =============================================================================
// Server-to-Client Events
// =============================================================================

/// Outcome tag carried by every ack event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Success,
    Error,
}

/// Receipt state carried by `message:status`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    Delivered,
    Read,
}

/// Events sent from server to client
#[derive(Debug, Serialize, Clone)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Connection acknowledged
    #[serde(rename = "connected")]
    Connected { session_id: Uuid },

    /// New message in a subscribed conversation
    #[serde(rename = "message:received")]
    MessageReceived { message: MessageEvent },

    /// Ack for `message:send`
    #[serde(rename = "message:ack")]
    MessageAck {
        status: AckStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        message_id: Option<Uuid>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// A message of yours was delivered to or read by another participant
    #[serde(rename = "message:status")]
    MessageStatus {
        message_id: Uuid,
        status: ReceiptStatus,
        user_id: Uuid,
    },

    /// Someone started typing in a conversation
    #[serde(rename = "typing:start")]
    TypingStart {
        conversation_id: Uuid,
        user_id: Uuid,
    },

    /// Someone stopped typing (or their typing timer expired)
    #[serde(rename = "typing:stop")]
    TypingStop {
        conversation_id: Uuid,
        user_id: Uuid,
    },

    /// You are being called
    #[serde(rename = "call:incoming")]
    CallIncoming {
        call_id: Uuid,
        initiator: UserProfile,
        call_type: CallType,
        is_group: bool,
        participants: Vec<Uuid>,
    },

    /// A participant accepted the call
    #[serde(rename = "call:accepted")]
    CallAccepted { call_id: Uuid, accepted_by: Uuid },

    /// A participant rejected the call
    #[serde(rename = "call:rejected")]
    CallRejected {
        call_id: Uuid,
        rejected_by: Uuid,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// The call ended
    #[serde(rename = "call:ended")]
    CallEnded {
        call_id: Uuid,
        ended_by: Uuid,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        /// Whole seconds; 0 if the call never reached `ongoing`
        duration: i64,
    },

    /// Ack for `call:initiate` / `call:accept` / `call:reject` / `call:end`
    #[serde(rename = "call:ack")]
    CallAck {
        status: AckStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        call_id: Option<Uuid>,
        #[serde(skip_serializing_if = "Option::is_none")]
        initiator_id: Option<Uuid>,
        #[serde(skip_serializing_if = "Option::is_none")]
        participants: Option<Vec<Uuid>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// Forwarded peer-connection handshake payload
    #[serde(rename = "signal:relay")]
    SignalRelay {
        sender_id: Uuid,
        #[serde(skip_serializing_if = "Option::is_none")]
        call_id: Option<Uuid>,
        payload: Value,
    },

    /// Peer requested a peer-connection restart
    #[serde(rename = "signal:reconnect")]
    SignalReconnect {
        sender_id: Uuid,
        #[serde(skip_serializing_if = "Option::is_none")]
        call_id: Option<Uuid>,
    },

    /// Ack for `signal:relay` / `signal:reconnect`
    #[serde(rename = "signal:ack")]
    SignalAck {
        status: AckStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// A user came online
    #[serde(rename = "user:online")]
    UserOnline { user_id: Uuid },

    /// A user went offline
    #[serde(rename = "user:offline")]
    UserOffline { user_id: Uuid },

    /// Protocol-level error (malformed frame)
    #[serde(rename = "error")]
    Error { message: String },
}

impl ServerEvent {
    pub fn message_ack_ok(message_id: Uuid) -> Self {
        ServerEvent::MessageAck {
            status: AckStatus::Success,
            message_id: Some(message_id),
            reason: None,
        }
    }

    pub fn message_ack_err(reason: impl Into<String>) -> Self {
        ServerEvent::MessageAck {
            status: AckStatus::Error,
            message_id: None,
            reason: Some(reason.into()),
        }
    }

    pub fn call_ack_err(reason: impl Into<String>) -> Self {
        ServerEvent::CallAck {
            status: AckStatus::Error,
            call_id: None,
            initiator_id: None,
            participants: None,
            reason: Some(reason.into()),
        }
    }

    pub fn signal_ack_ok() -> Self {
        ServerEvent::SignalAck {
            status: AckStatus::Success,
            reason: None,
        }
    }

    pub fn signal_ack_err(reason: impl Into<String>) -> Self {
        ServerEvent::SignalAck {
            status: AckStatus::Error,
            reason: Some(reason.into()),
        }
    }
}

// =============================================================================
// Event Data Structures
// =============================================================================

/// Fully resolved message payload (sender profile expanded)
#[derive(Debug, Serialize, Clone)]
pub struct MessageEvent {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender: UserProfile,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub message_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_event_deserialization() {
        let json = r#"{"type":"messages:read","conversation_id":"550e8400-e29b-41d4-a716-446655440000"}"#;
        let event: ClientEvent = serde_json::from_str(json).unwrap();
        match event {
            ClientEvent::MessagesRead { conversation_id } => {
                assert_eq!(
                    conversation_id.to_string(),
                    "550e8400-e29b-41d4-a716-446655440000"
                );
            }
            _ => panic!("Expected MessagesRead event"),
        }
    }

    #[test]
    fn test_call_initiate_defaults() {
        // is_group defaults to false, participants may be omitted for 1:1 calls
        let json = r#"{"type":"call:initiate","recipient_id":"550e8400-e29b-41d4-a716-446655440000","call_type":"audio"}"#;
        let event: ClientEvent = serde_json::from_str(json).unwrap();
        match event {
            ClientEvent::CallInitiate {
                recipient_id,
                call_type,
                is_group,
                participants,
            } => {
                assert!(recipient_id.is_some());
                assert_eq!(call_type, CallType::Audio);
                assert!(!is_group);
                assert!(participants.is_none());
            }
            _ => panic!("Expected CallInitiate event"),
        }
    }

    #[test]
    fn test_malformed_event_rejected() {
        // Unknown event name must fail at the boundary
        let json = r#"{"type":"message:unknown","conversation_id":"550e8400-e29b-41d4-a716-446655440000"}"#;
        assert!(serde_json::from_str::<ClientEvent>(json).is_err());

        // Missing required field
        let json = r#"{"type":"call:accept"}"#;
        assert!(serde_json::from_str::<ClientEvent>(json).is_err());
    }

    #[test]
    fn test_server_event_serialization() {
        let event = ServerEvent::message_ack_ok(Uuid::nil());
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"message:ack""#));
        assert!(json.contains(r#""status":"success""#));
        assert!(!json.contains("reason"));
    }

    #[test]
    fn test_error_ack_serialization() {
        let event = ServerEvent::call_ack_err("Recipient not available");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"call:ack""#));
        assert!(json.contains(r#""status":"error""#));
        assert!(json.contains("Recipient not available"));
    }
}
