//! Call record persistence with guarded state transitions
//!
//! Every transition is a conditional UPDATE on the current status, so two
//! racing handlers resolve by first-committer-wins: the loser's UPDATE
//! matches zero rows and comes back `None`.

use sqlx::PgPool;
use uuid::Uuid;

use wavelink_shared::{CallRecord, CallStatus, CallType};

const CALL_COLUMNS: &str =
    "id, call_type, is_group, participants, initiator_id, status, started_at, ended_at, duration_secs";

/// Fields required to persist a new call in `ringing` state
#[derive(Debug)]
pub struct NewCall {
    pub call_type: CallType,
    pub is_group: bool,
    pub participants: Vec<Uuid>,
    pub initiator_id: Uuid,
}

/// Persist a new call in `ringing` state
pub async fn create(pool: &PgPool, call: &NewCall) -> Result<CallRecord, sqlx::Error> {
    sqlx::query_as::<_, CallRecord>(&format!(
        r#"
        INSERT INTO calls (call_type, is_group, participants, initiator_id, status)
        VALUES ($1, $2, $3, $4, 'ringing')
        RETURNING {CALL_COLUMNS}
        "#,
    ))
    .bind(call.call_type.as_str())
    .bind(call.is_group)
    .bind(&call.participants)
    .bind(call.initiator_id)
    .fetch_one(pool)
    .await
}

/// Look up a call by id
pub async fn find(pool: &PgPool, call_id: Uuid) -> Result<Option<CallRecord>, sqlx::Error> {
    sqlx::query_as::<_, CallRecord>(&format!("SELECT {CALL_COLUMNS} FROM calls WHERE id = $1"))
        .bind(call_id)
        .fetch_optional(pool)
        .await
}

/// Transition `ringing -> ongoing`, setting the start time.
///
/// Returns `None` if the call is no longer ringing (stale transition).
pub async fn set_ongoing(pool: &PgPool, call_id: Uuid) -> Result<Option<CallRecord>, sqlx::Error> {
    sqlx::query_as::<_, CallRecord>(&format!(
        r#"
        UPDATE calls
        SET status = 'ongoing', started_at = NOW()
        WHERE id = $1 AND status = 'ringing'
        RETURNING {CALL_COLUMNS}
        "#,
    ))
    .bind(call_id)
    .fetch_optional(pool)
    .await
}

/// Transition a non-terminal call to `ended` or `missed`.
///
/// Returns `None` if the call was already terminal (idempotent end).
pub async fn finish(
    pool: &PgPool,
    call_id: Uuid,
    status: CallStatus,
    duration_secs: i64,
) -> Result<Option<CallRecord>, sqlx::Error> {
    debug_assert!(status.is_terminal());

    sqlx::query_as::<_, CallRecord>(&format!(
        r#"
        UPDATE calls
        SET status = $2, ended_at = NOW(), duration_secs = $3
        WHERE id = $1 AND status IN ('ringing', 'ongoing')
        RETURNING {CALL_COLUMNS}
        "#,
    ))
    .bind(call_id)
    .bind(status.as_str())
    .bind(duration_secs)
    .fetch_optional(pool)
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

    async fn seed_call(pool: &PgPool) -> CallRecord {
        let a = seed_user(pool).await;
        let b = seed_user(pool).await;
        create(
            pool,
            &NewCall {
                call_type: CallType::Audio,
                is_group: false,
                participants: vec![a, b],
                initiator_id: a,
            },
        )
        .await
        .expect("Failed to create call")
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_accept_has_single_winner() {
        let pool = test_pool().await;
        let record = seed_call(&pool).await;
        assert_eq!(record.status, "ringing");

        let won = set_ongoing(&pool, record.id)
            .await
            .expect("Failed to transition")
            .expect("First accept must win");
        assert_eq!(won.status, "ongoing");
        assert!(won.started_at.is_some());

        // A racing second accept matches zero rows
        let lost = set_ongoing(&pool, record.id)
            .await
            .expect("Failed to transition");
        assert!(lost.is_none());

        // Concurrent ends resolve the same way: one winner, one no-op
        let ended = finish(&pool, record.id, CallStatus::Ended, 30)
            .await
            .expect("Failed to finish");
        assert!(ended.is_some());
        let repeat = finish(&pool, record.id, CallStatus::Ended, 30)
            .await
            .expect("Failed to finish");
        assert!(repeat.is_none());
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_terminal_status_is_final() {
        let pool = test_pool().await;
        let record = seed_call(&pool).await;

        let missed = finish(&pool, record.id, CallStatus::Missed, 0)
            .await
            .expect("Failed to finish")
            .expect("Reject on a ringing call must commit");
        assert_eq!(missed.status, "missed");

        // No transition leaves a terminal state
        assert!(set_ongoing(&pool, record.id)
            .await
            .expect("Failed to transition")
            .is_none());
        assert!(finish(&pool, record.id, CallStatus::Ended, 10)
            .await
            .expect("Failed to finish")
            .is_none());

        let stored = find(&pool, record.id)
            .await
            .expect("Failed to find call")
            .expect("Call must exist");
        assert_eq!(stored.status, "missed");
    }
}
