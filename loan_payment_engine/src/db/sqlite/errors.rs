use thiserror::Error;

use crate::db::traits::LoanPaymentDatabaseError;

#[derive(Debug, Error)]
pub enum SqliteDatabaseError {
    #[error("Database connection error: {0}")]
    DriverError(#[from] sqlx::Error),
    #[error("Could not run database migrations: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),
    #[error("Database query error: {0}")]
    QueryError(String),
    #[error("Stored value could not be converted: {0}")]
    ConversionError(String),
    #[error("Could not serialize event: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl From<SqliteDatabaseError> for LoanPaymentDatabaseError {
    fn from(e: SqliteDatabaseError) -> Self {
        match e {
            SqliteDatabaseError::ConversionError(s) => Self::ConversionError(s),
            SqliteDatabaseError::SerializationError(e) => Self::EventSerializationError(e.to_string()),
            e => Self::DatabaseError(e.to_string()),
        }
    }
}

impl From<sqlx::Error> for LoanPaymentDatabaseError {
    fn from(e: sqlx::Error) -> Self {
        Self::DatabaseError(e.to_string())
    }
}
