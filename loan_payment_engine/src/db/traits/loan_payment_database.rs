use std::future::Future;

use thiserror::Error;

use crate::db::traits::{EventOutbox, LoanManagement, PaymentManagement, RouteManagement, TransferManagement};

/// This trait defines the highest level of behaviour for backends supporting the Loan Payment Engine.
///
/// Backends are shared between many concurrently running event handlers, so they must be cheap to clone and safe to
/// send between threads.
pub trait LoanPaymentDatabase:
    Clone + Send + Sync + 'static + LoanManagement + PaymentManagement + TransferManagement + RouteManagement + EventOutbox
{
    /// The URL of the database
    fn url(&self) -> &str;

    /// Releases any resources held by the backend.
    fn close(&mut self) -> impl Future<Output = Result<(), LoanPaymentDatabaseError>> + Send;
}

#[derive(Debug, Clone, Error)]
pub enum LoanPaymentDatabaseError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Loan {0} does not exist")]
    LoanNotFound(i64),
    #[error("Payment account {0} does not exist")]
    AccountNotFound(i64),
    #[error("Payment {0} does not exist")]
    PaymentNotFound(i64),
    #[error("Payment step {0} does not exist")]
    StepNotFound(i64),
    #[error("Transfer {0} does not exist")]
    TransferNotFound(i64),
    #[error("Stored data could not be converted. {0}")]
    ConversionError(String),
    #[error("Could not (de)serialize outbox event. {0}")]
    EventSerializationError(String),
}

impl From<serde_json::Error> for LoanPaymentDatabaseError {
    fn from(e: serde_json::Error) -> Self {
        Self::EventSerializationError(e.to_string())
    }
}
