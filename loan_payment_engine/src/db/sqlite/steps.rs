use chrono::Utc;
use sqlx::SqliteConnection;

use crate::{
    db::sqlite::SqliteDatabaseError,
    db_types::{FailureReason, LoanPaymentStep, NewPaymentStep, StepState},
};

pub async fn insert_step(
    payment_id: i64,
    step: NewPaymentStep,
    conn: &mut SqliteConnection,
) -> Result<LoanPaymentStep, SqliteDatabaseError> {
    let now = Utc::now();
    let step = sqlx::query_as(
        r#"
            INSERT INTO loan_payment_steps (
                payment_id,
                step_order,
                state,
                from_account_id,
                to_account_id,
                amount,
                created_at,
                updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *;
        "#,
    )
    .bind(payment_id)
    .bind(step.order)
    .bind(StepState::Created)
    .bind(step.from_account_id)
    .bind(step.to_account_id)
    .bind(step.amount)
    .bind(now)
    .bind(now)
    .fetch_one(conn)
    .await?;
    Ok(step)
}

pub async fn fetch_step(step_id: i64, conn: &mut SqliteConnection) -> Result<Option<LoanPaymentStep>, SqliteDatabaseError> {
    let step =
        sqlx::query_as("SELECT * FROM loan_payment_steps WHERE id = $1").bind(step_id).fetch_optional(conn).await?;
    Ok(step)
}

pub async fn fetch_steps_for_payment(
    payment_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<LoanPaymentStep>, SqliteDatabaseError> {
    let steps = sqlx::query_as("SELECT * FROM loan_payment_steps WHERE payment_id = $1 ORDER BY step_order")
        .bind(payment_id)
        .fetch_all(conn)
        .await?;
    Ok(steps)
}

pub async fn fetch_steps_in_state(
    state: StepState,
    limit: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<LoanPaymentStep>, SqliteDatabaseError> {
    let steps = sqlx::query_as("SELECT * FROM loan_payment_steps WHERE state = $1 ORDER BY updated_at, id LIMIT $2")
        .bind(state)
        .bind(limit)
        .fetch_all(conn)
        .await?;
    Ok(steps)
}

pub async fn transition_step(
    step_id: i64,
    from: StepState,
    to: StepState,
    failure_reason: Option<FailureReason>,
    conn: &mut SqliteConnection,
) -> Result<Option<LoanPaymentStep>, SqliteDatabaseError> {
    let failure_reason = if to == StepState::Failed { failure_reason } else { None };
    let step = sqlx::query_as(
        r#"
            UPDATE loan_payment_steps SET
                state = $1,
                failure_reason = COALESCE($2, failure_reason),
                updated_at = $3
            WHERE id = $4 AND state = $5
            RETURNING *;
        "#,
    )
    .bind(to)
    .bind(failure_reason)
    .bind(Utc::now())
    .bind(step_id)
    .bind(from)
    .fetch_optional(conn)
    .await?;
    Ok(step)
}
