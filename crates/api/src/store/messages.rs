//! Message persistence and read-set updates

use sqlx::PgPool;
use uuid::Uuid;

use wavelink_shared::{MessageRecord, MessageType};

/// Fields required to persist a new message
#[derive(Debug)]
pub struct NewMessage {
    pub chat_id: Uuid,
    pub sender_id: Uuid,
    pub content: Option<String>,
    pub message_type: MessageType,
    pub attachment_url: Option<String>,
    pub attachment_name: Option<String>,
    pub reply_to: Option<Uuid>,
}

/// Persist a message and return the stored record
pub async fn create(pool: &PgPool, msg: &NewMessage) -> Result<MessageRecord, sqlx::Error> {
    sqlx::query_as::<_, MessageRecord>(
        r#"
        INSERT INTO messages (chat_id, sender_id, content, message_type, attachment_url, attachment_name, reply_to)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING id, chat_id, sender_id, content, message_type, attachment_url, attachment_name, reply_to, read_by, created_at
        "#,
    )
    .bind(msg.chat_id)
    .bind(msg.sender_id)
    .bind(&msg.content)
    .bind(msg.message_type.as_str())
    .bind(&msg.attachment_url)
    .bind(&msg.attachment_name)
    .bind(msg.reply_to)
    .fetch_one(pool)
    .await
}

/// Look up a message by id
pub async fn find(pool: &PgPool, message_id: Uuid) -> Result<Option<MessageRecord>, sqlx::Error> {
    sqlx::query_as::<_, MessageRecord>(
        r#"
        SELECT id, chat_id, sender_id, content, message_type, attachment_url, attachment_name, reply_to, read_by, created_at
        FROM messages
        WHERE id = $1
        "#,
    )
    .bind(message_id)
    .fetch_optional(pool)
    .await
}

/// Add the reader to the read-set of every message in the chat they have not
/// sent and not already read. Idempotent: the `NOT (ANY(read_by))` guard means
/// a repeat call matches zero rows. Membership is enforced in the same
/// statement, so a reader who is not a chat participant also matches zero
/// rows and no read-set changes.
///
/// Returns `(message_id, sender_id)` for each message actually updated, so the
/// caller can notify each original sender once.
pub async fn mark_read_bulk(
    pool: &PgPool,
    chat_id: Uuid,
    reader_id: Uuid,
) -> Result<Vec<(Uuid, Uuid)>, sqlx::Error> {
    sqlx::query_as::<_, (Uuid, Uuid)>(
        r#"
        UPDATE messages
        SET read_by = array_append(read_by, $2)
        WHERE chat_id = $1
          AND sender_id <> $2
          AND NOT ($2 = ANY(read_by))
          AND EXISTS (
              SELECT 1 FROM chat_participants
              WHERE chat_id = $1 AND user_id = $2
          )
        RETURNING id, sender_id
        "#,
    )
    .bind(chat_id)
    .bind(reader_id)
    .fetch_all(pool)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_pool() -> PgPool {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
        let pool = wavelink_shared::create_pool(&url, 5)
            .await
            .expect("Failed to create pool");
        wavelink_shared::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        pool
    }

    async fn seed_user(pool: &PgPool) -> Uuid {
        sqlx::query_scalar::<_, Uuid>("INSERT INTO users (username) VALUES ($1) RETURNING id")
            .bind(format!("user-{}", Uuid::new_v4()))
            .fetch_one(pool)
            .await
            .expect("Failed to seed user")
    }

    async fn seed_chat(pool: &PgPool, participants: &[Uuid]) -> Uuid {
        let chat_id =
            sqlx::query_scalar::<_, Uuid>("INSERT INTO chats (is_group) VALUES (FALSE) RETURNING id")
                .fetch_one(pool)
                .await
                .expect("Failed to seed chat");
        for user_id in participants {
            sqlx::query("INSERT INTO chat_participants (chat_id, user_id) VALUES ($1, $2)")
                .bind(chat_id)
                .bind(user_id)
                .execute(pool)
                .await
                .expect("Failed to seed participant");
        }
        chat_id
    }

    async fn seed_message(pool: &PgPool, chat_id: Uuid, sender_id: Uuid) -> MessageRecord {
        create(
            pool,
            &NewMessage {
                chat_id,
                sender_id,
                content: Some("hello".to_string()),
                message_type: MessageType::Text,
                attachment_url: None,
                attachment_name: None,
                reply_to: None,
            },
        )
        .await
        .expect("Failed to create message")
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_mark_read_bulk_is_idempotent() {
        let pool = test_pool().await;
        let sender = seed_user(&pool).await;
        let reader = seed_user(&pool).await;
        let chat_id = seed_chat(&pool, &[sender, reader]).await;
        let message = seed_message(&pool, chat_id, sender).await;

        let affected = mark_read_bulk(&pool, chat_id, reader)
            .await
            .expect("Failed to mark read");
        assert_eq!(affected, vec![(message.id, sender)]);

        // A repeat call matches zero rows, so zero additional broadcasts
        let repeat = mark_read_bulk(&pool, chat_id, reader)
            .await
            .expect("Failed to mark read");
        assert!(repeat.is_empty());

        // A sender never joins the read-set of their own messages
        let own = mark_read_bulk(&pool, chat_id, sender)
            .await
            .expect("Failed to mark read");
        assert!(own.is_empty());
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_mark_read_bulk_ignores_non_participant() {
        let pool = test_pool().await;
        let sender = seed_user(&pool).await;
        let reader = seed_user(&pool).await;
        let outsider = seed_user(&pool).await;
        let chat_id = seed_chat(&pool, &[sender, reader]).await;
        let message = seed_message(&pool, chat_id, sender).await;

        let affected = mark_read_bulk(&pool, chat_id, outsider)
            .await
            .expect("Failed to mark read");
        assert!(affected.is_empty());

        // The read-set is untouched
        let stored = find(&pool, message.id)
            .await
            .expect("Failed to find message")
            .expect("Message must exist");
        assert!(stored.read_by.is_empty());
    }
}
