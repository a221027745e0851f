use chrono::Utc;
use sqlx::SqliteConnection;

use crate::{
    db::sqlite::SqliteDatabaseError,
    db_types::{NewPaymentAccount, PaymentAccount},
};

pub async fn insert_account(
    account: NewPaymentAccount,
    conn: &mut SqliteConnection,
) -> Result<PaymentAccount, SqliteDatabaseError> {
    let account = sqlx::query_as(
        r#"
            INSERT INTO payment_accounts (name, account_type, ownership, provider, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *;
        "#,
    )
    .bind(account.name)
    .bind(account.account_type)
    .bind(account.ownership)
    .bind(account.provider)
    .bind(Utc::now())
    .fetch_one(conn)
    .await?;
    Ok(account)
}

pub async fn fetch_account(
    account_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Option<PaymentAccount>, SqliteDatabaseError> {
    let account = sqlx::query_as("SELECT * FROM payment_accounts WHERE id = $1")
        .bind(account_id)
        .fetch_optional(conn)
        .await?;
    Ok(account)
}
