//! Typing indicator broker
//!
//! Relays ephemeral typing-start/stop signals with a server-enforced
//! auto-expiry: each typing-start arms a 5-second timer that, unless
//! cancelled by another start or an explicit stop, emits a typing-stop back
//! to the originating connection itself so a stuck client UI self-corrects.
//! Everything here is fire-and-forget; a signal for a conversation the
//! connection never subscribed to is dropped.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use super::connection::Connection;
use super::events::ServerEvent;
use super::state::RealtimeState;

/// Typing indicators expire 5 seconds after the last typing-start
pub const TYPING_EXPIRY: Duration = Duration::from_secs(5);

/// Handle `typing:start`: broadcast to the rest of the room and (re)arm the
/// auto-stop timer for this (connection, conversation) pair.
pub async fn start(realtime: &RealtimeState, conn: Arc<Connection>, conversation_id: Uuid) {
    if !conn.is_subscribed(&conversation_id).await {
        tracing::debug!(
            user_id = %conn.user_id,
            conversation_id = %conversation_id,
            "Dropping typing signal for unsubscribed conversation"
        );
        return;
    }

    realtime
        .rooms
        .broadcast_except(
            &conversation_id,
            &conn.session_id,
            ServerEvent::TypingStart {
                conversation_id,
                user_id: conn.user_id,
            },
        )
        .await;

    let timer_conn = Arc::clone(&conn);
    let handle = tokio::spawn(async move {
        tokio::time::sleep(TYPING_EXPIRY).await;

        // Expired without a stop: tell the originator's own UI to clear
        if timer_conn
            .send(ServerEvent::TypingStop {
                conversation_id,
                user_id: timer_conn.user_id,
            })
            .is_err()
        {
            tracing::debug!(
                session_id = %timer_conn.session_id,
                "Typing expiry send failed (connection closed)"
            );
        }
        timer_conn.forget_typing_timer(&conversation_id).await;
    });

    // Replaces any timer already armed for this conversation
    conn.arm_typing_timer(conversation_id, handle).await;
}

/// Handle `typing:stop`: cancel the timer if armed and broadcast to the rest
/// of the room.
pub async fn stop(realtime: &RealtimeState, conn: Arc<Connection>, conversation_id: Uuid) {
    if !conn.is_subscribed(&conversation_id).await {
        return;
    }

    conn.cancel_typing_timer(&conversation_id).await;

    realtime
        .rooms
        .broadcast_except(
            &conversation_id,
            &conn.session_id,
            ServerEvent::TypingStop {
                conversation_id,
                user_id: conn.user_id,
            },
        )
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    async fn joined_conn(
        realtime: &RealtimeState,
        conversation_id: Uuid,
    ) -> (Arc<Connection>, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Arc::new(Connection::new(Uuid::new_v4(), "user".to_string(), tx));
        conn.subscribe(conversation_id).await;
        realtime.rooms.join(conversation_id, Arc::clone(&conn)).await;
        (conn, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_timer_stops_originator() {
        let realtime = RealtimeState::new();
        let conversation_id = Uuid::new_v4();
        let (typist, mut typist_rx) = joined_conn(&realtime, conversation_id).await;
        let (_peer, mut peer_rx) = joined_conn(&realtime, conversation_id).await;

        start(&realtime, Arc::clone(&typist), conversation_id).await;

        // The peer sees the start immediately; the typist does not
        assert!(matches!(
            peer_rx.try_recv(),
            Ok(ServerEvent::TypingStart { .. })
        ));
        assert!(typist_rx.try_recv().is_err());

        // Nothing before expiry
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(typist_rx.try_recv().is_err());

        // After 5s the originating connection itself receives the stop
        tokio::time::sleep(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;
        match typist_rx.try_recv() {
            Ok(ServerEvent::TypingStop {
                conversation_id: cid,
                user_id,
            }) => {
                assert_eq!(cid, conversation_id);
                assert_eq!(user_id, typist.user_id);
            }
            other => panic!("Expected TypingStop, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_stop_prevents_expiry_event() {
        let realtime = RealtimeState::new();
        let conversation_id = Uuid::new_v4();
        let (typist, mut typist_rx) = joined_conn(&realtime, conversation_id).await;
        let (_peer, mut peer_rx) = joined_conn(&realtime, conversation_id).await;

        start(&realtime, Arc::clone(&typist), conversation_id).await;
        stop(&realtime, Arc::clone(&typist), conversation_id).await;

        // The peer sees start then stop
        assert!(matches!(
            peer_rx.try_recv(),
            Ok(ServerEvent::TypingStart { .. })
        ));
        assert!(matches!(
            peer_rx.try_recv(),
            Ok(ServerEvent::TypingStop { .. })
        ));

        // The cancelled timer never fires back at the typist
        tokio::time::sleep(Duration::from_secs(6)).await;
        tokio::task::yield_now().await;
        assert!(typist_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_rearms_instead_of_stacking() {
        let realtime = RealtimeState::new();
        let conversation_id = Uuid::new_v4();
        let (typist, mut typist_rx) = joined_conn(&realtime, conversation_id).await;

        start(&realtime, Arc::clone(&typist), conversation_id).await;

        // A second start 3s in replaces the first timer
        tokio::time::sleep(Duration::from_secs(3)).await;
        start(&realtime, Arc::clone(&typist), conversation_id).await;

        // The original deadline passes silently
        tokio::time::sleep(Duration::from_secs(3)).await;
        tokio::task::yield_now().await;
        assert!(typist_rx.try_recv().is_err());

        // The replacement fires 5s after the second start
        tokio::time::sleep(Duration::from_secs(3)).await;
        tokio::task::yield_now().await;
        assert!(matches!(
            typist_rx.try_recv(),
            Ok(ServerEvent::TypingStop { .. })
        ));
    }

    #[tokio::test]
    async fn test_unsubscribed_conversation_is_dropped() {
        let realtime = RealtimeState::new();
        let conversation_id = Uuid::new_v4();
        let (_member, mut member_rx) = joined_conn(&realtime, conversation_id).await;

        // An outsider never subscribed to the conversation
        let (tx, _rx) = mpsc::unbounded_channel();
        let outsider = Arc::new(Connection::new(Uuid::new_v4(), "outsider".to_string(), tx));

        start(&realtime, Arc::clone(&outsider), conversation_id).await;
        stop(&realtime, outsider, conversation_id).await;

        assert!(member_rx.try_recv().is_err());
    }
}
