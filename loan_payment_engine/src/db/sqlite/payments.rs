use chrono::Utc;
use log::{debug, trace};
use sqlx::SqliteConnection;

use crate::{
    db::sqlite::SqliteDatabaseError,
    db_types::{FailureReason, LoanPayment, NewLoanPayment, PaymentState},
};

/// Inserts a new payment using the given connection. This is not atomic. Embed the call in a transaction if it must
/// be written together with its steps.
///
/// Returns `None` if the loan already has a live or completed payment for the same stage and installment.
pub async fn insert_payment(
    payment: NewLoanPayment,
    conn: &mut SqliteConnection,
) -> Result<Option<LoanPayment>, SqliteDatabaseError> {
    let now = Utc::now();
    let loan_id = payment.loan_id;
    let kind = payment.kind;
    let payment: Option<LoanPayment> = sqlx::query_as(
        r#"
            INSERT INTO loan_payments (
                loan_id,
                kind,
                state,
                amount,
                payment_number,
                from_account_id,
                to_account_id,
                initiated_at,
                scheduled_at,
                completed_at,
                created_at,
                updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT DO NOTHING
            RETURNING *;
        "#,
    )
    .bind(payment.loan_id)
    .bind(payment.kind)
    .bind(payment.state)
    .bind(payment.amount)
    .bind(payment.payment_number)
    .bind(payment.from_account_id)
    .bind(payment.to_account_id)
    .bind(payment.initiated_at)
    .bind(payment.scheduled_at)
    .bind(payment.completed_at)
    .bind(now)
    .bind(now)
    .fetch_optional(conn)
    .await?;
    match &payment {
        Some(p) => trace!("🗃️ {kind} payment #{} inserted for loan #{loan_id}", p.id),
        None => debug!("🗃️ Loan #{loan_id} already has a live {kind} payment. Nothing inserted."),
    }
    Ok(payment)
}

pub async fn fetch_payment(
    payment_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Option<LoanPayment>, SqliteDatabaseError> {
    let payment =
        sqlx::query_as("SELECT * FROM loan_payments WHERE id = $1").bind(payment_id).fetch_optional(conn).await?;
    Ok(payment)
}

pub async fn fetch_payments_for_loan(
    loan_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<LoanPayment>, SqliteDatabaseError> {
    let payments = sqlx::query_as("SELECT * FROM loan_payments WHERE loan_id = $1 ORDER BY created_at, id")
        .bind(loan_id)
        .fetch_all(conn)
        .await?;
    Ok(payments)
}

/// Moves the payment to `to`, only if it is currently in `from`.
///
/// `initiated_at` is set the first time the payment goes pending, and `completed_at` when it completes.
pub async fn transition_payment(
    payment_id: i64,
    from: PaymentState,
    to: PaymentState,
    failure_reason: Option<FailureReason>,
    conn: &mut SqliteConnection,
) -> Result<Option<LoanPayment>, SqliteDatabaseError> {
    let now = Utc::now();
    let initiated_at = (to == PaymentState::Pending).then_some(now);
    let completed_at = (to == PaymentState::Completed).then_some(now);
    let failure_reason = if to == PaymentState::Failed { failure_reason } else { None };
    let payment = sqlx::query_as(
        r#"
            UPDATE loan_payments SET
                state = $1,
                failure_reason = COALESCE($2, failure_reason),
                initiated_at = COALESCE(initiated_at, $3),
                completed_at = COALESCE($4, completed_at),
                updated_at = $5
            WHERE id = $6 AND state = $7
            RETURNING *;
        "#,
    )
    .bind(to)
    .bind(failure_reason)
    .bind(initiated_at)
    .bind(completed_at)
    .bind(now)
    .bind(payment_id)
    .bind(from)
    .fetch_optional(conn)
    .await?;
    Ok(payment)
}
