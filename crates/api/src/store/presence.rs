//! Persisted presence records (best-effort; callers log and swallow errors)

use sqlx::PgPool;
use uuid::Uuid;

use wavelink_shared::PresenceStatus;

/// Upsert the user's presence status and last-seen timestamp
pub async fn upsert_status(
    pool: &PgPool,
    user_id: Uuid,
    status: PresenceStatus,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO user_presence (user_id, status, last_seen_at)
        VALUES ($1, $2, NOW())
        ON CONFLICT (user_id) DO UPDATE SET
          status = $2,
          last_seen_at = NOW(),
          updated_at = NOW()
        "#,
    )
    .bind(user_id)
    .bind(status.as_str())
    .execute(pool)
    .await?;

    Ok(())
}

/// Refresh last-seen only (periodic liveness touch)
pub async fn touch_last_seen(pool: &PgPool, user_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE user_presence SET last_seen_at = NOW(), updated_at = NOW() WHERE user_id = $1",
    )
    .bind(user_id)
    .execute(pool)
    .await?;

    Ok(())
}
