use chrono::{DateTime, Utc};
use log::trace;
use sqlx::SqliteConnection;

use crate::{
    db::sqlite::SqliteDatabaseError,
    db_types::{OutboxEvent, OutboxStatus},
    events::EventType,
};

/// Appends the events to the outbox, in order. Embed this in the transaction that produced the events.
pub async fn insert_events(events: &[EventType], conn: &mut SqliteConnection) -> Result<(), SqliteDatabaseError> {
    let now = Utc::now();
    for event in events {
        let payload = serde_json::to_string(event)?;
        let id: i64 = sqlx::query_scalar(
            r#"
                INSERT INTO event_outbox (event_type, payload, status, attempts, created_at, updated_at)
                VALUES ($1, $2, $3, 0, $4, $5)
                RETURNING id;
            "#,
        )
        .bind(event.name())
        .bind(payload)
        .bind(OutboxStatus::Pending)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *conn)
        .await?;
        trace!("🗃️ Outbox event #{id} ({}) queued", event.name());
    }
    Ok(())
}

pub async fn claim_pending(limit: i64, conn: &mut SqliteConnection) -> Result<Vec<OutboxEvent>, SqliteDatabaseError> {
    let mut events: Vec<OutboxEvent> = sqlx::query_as(
        r#"
            UPDATE event_outbox SET status = $1, updated_at = $2
            WHERE id IN (SELECT id FROM event_outbox WHERE status = $3 ORDER BY id LIMIT $4)
            RETURNING *;
        "#,
    )
    .bind(OutboxStatus::InFlight)
    .bind(Utc::now())
    .bind(OutboxStatus::Pending)
    .bind(limit)
    .fetch_all(conn)
    .await?;
    // RETURNING makes no ordering promises
    events.sort_by_key(|e| e.id);
    Ok(events)
}

/// Sets the status of an in-flight event, counting the delivery attempt.
pub async fn settle_event(
    event_id: i64,
    status: OutboxStatus,
    error: Option<&str>,
    conn: &mut SqliteConnection,
) -> Result<(), SqliteDatabaseError> {
    sqlx::query(
        r#"
            UPDATE event_outbox SET
                status = $1,
                attempts = attempts + 1,
                last_error = COALESCE($2, last_error),
                updated_at = $3
            WHERE id = $4 AND status = $5;
        "#,
    )
    .bind(status)
    .bind(error)
    .bind(Utc::now())
    .bind(event_id)
    .bind(OutboxStatus::InFlight)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn release_stalled(
    claimed_before: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<u64, SqliteDatabaseError> {
    let result = sqlx::query("UPDATE event_outbox SET status = $1, updated_at = $2 WHERE status = $3 AND updated_at < $4")
        .bind(OutboxStatus::Pending)
        .bind(Utc::now())
        .bind(OutboxStatus::InFlight)
        .bind(claimed_before)
        .execute(conn)
        .await?;
    Ok(result.rows_affected())
}

pub async fn count_events(status: OutboxStatus, conn: &mut SqliteConnection) -> Result<i64, SqliteDatabaseError> {
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM event_outbox WHERE status = $1")
        .bind(status)
        .fetch_one(conn)
        .await?;
    Ok(count)
}
