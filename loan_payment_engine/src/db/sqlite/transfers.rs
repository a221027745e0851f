use chrono::Utc;
use log::{debug, trace};
use sqlx::SqliteConnection;

use crate::{
    db::{
        sqlite::SqliteDatabaseError,
        traits::{InsertTransferResult, TransferTransition},
    },
    db_types::{NewTransfer, Transfer, TransferState},
};

/// Inserts the transfer attempt, unless an attempt with the same `(step_id, order)` already exists.
pub async fn idempotent_insert(
    transfer: NewTransfer,
    conn: &mut SqliteConnection,
) -> Result<InsertTransferResult, SqliteDatabaseError> {
    let now = Utc::now();
    let (step_id, order) = (transfer.step_id, transfer.order);
    let inserted: Option<Transfer> = sqlx::query_as(
        r#"
            INSERT INTO transfers (
                step_id,
                transfer_order,
                state,
                amount,
                from_account_id,
                to_account_id,
                provider,
                created_at,
                updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (step_id, transfer_order) DO NOTHING
            RETURNING *;
        "#,
    )
    .bind(transfer.step_id)
    .bind(transfer.order)
    .bind(TransferState::Created)
    .bind(transfer.amount)
    .bind(transfer.from_account_id)
    .bind(transfer.to_account_id)
    .bind(transfer.provider)
    .bind(now)
    .bind(now)
    .fetch_optional(&mut *conn)
    .await?;
    match inserted {
        Some(t) => {
            trace!("🗃️ Transfer #{} (attempt {order}) created for step #{step_id}", t.id);
            Ok(InsertTransferResult::Inserted(t))
        },
        None => {
            let id: i64 = sqlx::query_scalar("SELECT id FROM transfers WHERE step_id = $1 AND transfer_order = $2")
                .bind(step_id)
                .bind(order)
                .fetch_one(conn)
                .await?;
            debug!("🗃️ Transfer attempt {order} for step #{step_id} already exists as #{id}");
            Ok(InsertTransferResult::AlreadyExists(id))
        },
    }
}

pub async fn fetch_transfer(transfer_id: i64, conn: &mut SqliteConnection) -> Result<Option<Transfer>, SqliteDatabaseError> {
    let transfer =
        sqlx::query_as("SELECT * FROM transfers WHERE id = $1").bind(transfer_id).fetch_optional(conn).await?;
    Ok(transfer)
}

pub async fn fetch_transfers_for_step(
    step_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<Transfer>, SqliteDatabaseError> {
    let transfers = sqlx::query_as("SELECT * FROM transfers WHERE step_id = $1 ORDER BY transfer_order")
        .bind(step_id)
        .fetch_all(conn)
        .await?;
    Ok(transfers)
}

/// Applies the transition if the transfer is still in `transition.from`. The provider reference and error details are
/// only overwritten when supplied.
pub async fn transition_transfer(
    transition: TransferTransition,
    conn: &mut SqliteConnection,
) -> Result<Option<Transfer>, SqliteDatabaseError> {
    let TransferTransition { transfer_id, from, to, provider_reference, error } = transition;
    let error_type = error.as_ref().map(|e| e.error_type);
    let (code, message, payload) = match error {
        Some(e) => (Some(e.code), Some(e.message), Some(e.raw_payload)),
        None => (None, None, None),
    };
    let transfer = sqlx::query_as(
        r#"
            UPDATE transfers SET
                state = $1,
                provider_reference = COALESCE($2, provider_reference),
                error_type = COALESCE($3, error_type),
                error_code = COALESCE($4, error_code),
                error_message = COALESCE($5, error_message),
                error_payload = COALESCE($6, error_payload),
                updated_at = $7
            WHERE id = $8 AND state = $9
            RETURNING *;
        "#,
    )
    .bind(to)
    .bind(provider_reference)
    .bind(error_type)
    .bind(code)
    .bind(message)
    .bind(payload)
    .bind(Utc::now())
    .bind(transfer_id)
    .bind(from)
    .fetch_optional(conn)
    .await?;
    Ok(transfer)
}
