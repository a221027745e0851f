use chrono::Utc;
use log::trace;
use sqlx::SqliteConnection;

use crate::{
    db::sqlite::SqliteDatabaseError,
    db_types::{Loan, LoanState, NewLoan},
};

pub async fn insert_loan(loan: NewLoan, conn: &mut SqliteConnection) -> Result<Loan, SqliteDatabaseError> {
    let now = Utc::now();
    let loan: Loan = sqlx::query_as(
        r#"
            INSERT INTO loans (
                amount,
                fee_amount,
                loan_type,
                state,
                borrower_account_id,
                lender_account_id,
                biller_account_id,
                payments_count,
                created_at,
                updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *;
        "#,
    )
    .bind(loan.amount)
    .bind(loan.fee_amount)
    .bind(loan.loan_type)
    .bind(loan.state)
    .bind(loan.borrower_account_id)
    .bind(loan.lender_account_id)
    .bind(loan.biller_account_id)
    .bind(loan.payments_count)
    .bind(now)
    .bind(now)
    .fetch_one(conn)
    .await?;
    trace!("🗃️ Loan #{} ({}) inserted in state {}", loan.id, loan.amount, loan.state);
    Ok(loan)
}

pub async fn fetch_loan(loan_id: i64, conn: &mut SqliteConnection) -> Result<Option<Loan>, SqliteDatabaseError> {
    let loan = sqlx::query_as("SELECT * FROM loans WHERE id = $1").bind(loan_id).fetch_optional(conn).await?;
    Ok(loan)
}

pub async fn update_accounts(
    loan_id: i64,
    borrower_account_id: Option<i64>,
    lender_account_id: Option<i64>,
    biller_account_id: Option<i64>,
    conn: &mut SqliteConnection,
) -> Result<Option<Loan>, SqliteDatabaseError> {
    let loan = sqlx::query_as(
        r#"
            UPDATE loans SET
                borrower_account_id = COALESCE($1, borrower_account_id),
                lender_account_id = COALESCE($2, lender_account_id),
                biller_account_id = COALESCE($3, biller_account_id),
                updated_at = $4
            WHERE id = $5
            RETURNING *;
        "#,
    )
    .bind(borrower_account_id)
    .bind(lender_account_id)
    .bind(biller_account_id)
    .bind(Utc::now())
    .bind(loan_id)
    .fetch_optional(conn)
    .await?;
    Ok(loan)
}

/// Moves the loan to `to`, only if it is currently in `from`. Returns `None` when the guard does not hold.
pub async fn transition_loan(
    loan_id: i64,
    from: LoanState,
    to: LoanState,
    conn: &mut SqliteConnection,
) -> Result<Option<Loan>, SqliteDatabaseError> {
    let loan = sqlx::query_as("UPDATE loans SET state = $1, updated_at = $2 WHERE id = $3 AND state = $4 RETURNING *")
        .bind(to)
        .bind(Utc::now())
        .bind(loan_id)
        .bind(from)
        .fetch_optional(conn)
        .await?;
    Ok(loan)
}
