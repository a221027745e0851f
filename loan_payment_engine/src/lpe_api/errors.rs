use thiserror::Error;

use crate::{
    db::traits::LoanPaymentDatabaseError,
    db_types::{Cents, LoanState, PaymentKind, PaymentState, StepState, TransferState},
    providers::ProviderError,
};

/// The persisted state of an entity contradicts what the engine's transition rules allow. These are fatal for the
/// payment concerned: they are never retried, and never turned into a business failure. An operator has to look.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OutOfSyncError {
    #[error(
        "Step #{step_id} is {step_state}, but its transfer is {transfer_state:?} (transfer id {transfer_id:?}). {reason}"
    )]
    Step {
        step_id: i64,
        step_state: StepState,
        transfer_id: Option<i64>,
        transfer_state: Option<TransferState>,
        reason: String,
    },
    #[error("Payment #{payment_id} was expected to be {expected}, but it was changed by someone else")]
    Payment { payment_id: i64, expected: PaymentState },
    #[error("Loan #{loan_id} was expected to be {expected}, but it was changed by someone else")]
    Loan { loan_id: i64, expected: LoanState },
}

#[derive(Debug, Clone, Error)]
pub enum LoanPaymentError {
    #[error("{0}")]
    DatabaseError(#[from] LoanPaymentDatabaseError),
    #[error("Out of sync. {0}")]
    OutOfSync(#[from] OutOfSyncError),
    #[error("No payment route is configured for {0}")]
    NoRouteFound(String),
    #[error("Route #{route_id} leaves no steps for a {kind} payment")]
    EmptyRoute { route_id: i64, kind: PaymentKind },
    #[error("Loan #{loan_id} is not allowed to move from {from} to {to}")]
    InvalidLoanTransition { loan_id: i64, from: LoanState, to: LoanState },
    #[error("Loan {0} does not exist")]
    LoanNotFound(i64),
    #[error("A {kind} payment for loan #{loan_id} cannot be for {amount}")]
    InvalidAmount { loan_id: i64, kind: PaymentKind, amount: Cents },
    #[error("{0}")]
    ProviderError(#[from] ProviderError),
    #[error("Event could not be processed. {0}")]
    InvalidEvent(String),
}

impl LoanPaymentError {
    pub fn is_out_of_sync(&self) -> bool {
        matches!(self, Self::OutOfSync(_))
    }

    /// Transient failures. The same call may well succeed if tried again later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DatabaseError(LoanPaymentDatabaseError::DatabaseError(_))
                | Self::ProviderError(ProviderError::Unreachable(..))
        )
    }
}

/// The outcome of a conditional state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceResult {
    /// State moved forward
    Advanced,
    /// Nothing to do, or the change had already been made (a duplicate delivery)
    Unchanged,
    /// The subject does not exist
    NotFound,
}

impl AdvanceResult {
    pub fn is_advanced(&self) -> bool {
        matches!(self, Self::Advanced)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn error_classification() {
        let err = LoanPaymentError::from(OutOfSyncError::Payment { payment_id: 4, expected: PaymentState::Pending });
        assert!(err.is_out_of_sync());
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_string(),
            "Out of sync. Payment #4 was expected to be pending, but it was changed by someone else"
        );
        let err = LoanPaymentError::from(LoanPaymentDatabaseError::DatabaseError("locked".into()));
        assert!(err.is_retryable());
        let err = LoanPaymentError::from(LoanPaymentDatabaseError::StepNotFound(3));
        assert!(!err.is_retryable());
        let err = LoanPaymentError::from(ProviderError::Unreachable("mock", "down".into()));
        assert!(err.is_retryable());
    }
}
