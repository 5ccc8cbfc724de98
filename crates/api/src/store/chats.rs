//! Chat membership queries and conversation metadata

use sqlx::PgPool;
use uuid::Uuid;

/// List all chat ids the user participates in (one-time snapshot at connect)
pub async fn chat_ids_for_user(pool: &PgPool, user_id: Uuid) -> Result<Vec<Uuid>, sqlx::Error> {
    sqlx::query_scalar::<_, Uuid>("SELECT chat_id FROM chat_participants WHERE user_id = $1")
        .bind(user_id)
        .fetch_all(pool)
        .await
}

/// Check membership against the store, not the cached subscription set
pub async fn is_participant(
    pool: &PgPool,
    chat_id: Uuid,
    user_id: Uuid,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM chat_participants WHERE chat_id = $1 AND user_id = $2)",
    )
    .bind(chat_id)
    .bind(user_id)
    .fetch_one(pool)
    .await
}

/// Bump the chat's last-message pointer
pub async fn touch_last_message(
    pool: &PgPool,
    chat_id: Uuid,
    message_id: Uuid,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE chats SET last_message_id = $2, updated_at = NOW() WHERE id = $1")
        .bind(chat_id)
        .bind(message_id)
        .execute(pool)
        .await?;

    Ok(())
}
