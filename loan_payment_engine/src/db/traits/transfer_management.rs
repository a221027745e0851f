use std::future::Future;

use crate::{
    db::traits::{InsertTransferResult, LoanPaymentDatabaseError, TransferTransition},
    db_types::{NewTransfer, Transfer},
    events::EventType,
};

/// The transfer attempts behind each payment step.
pub trait TransferManagement {
    /// Stores a new transfer in the `Created` state. This call is idempotent on `(step_id, order)`: if that attempt
    /// already exists, nothing is written and [`InsertTransferResult::AlreadyExists`] is returned.
    fn insert_transfer(
        &self,
        transfer: NewTransfer,
    ) -> impl Future<Output = Result<InsertTransferResult, LoanPaymentDatabaseError>> + Send;

    fn fetch_transfer(
        &self,
        transfer_id: i64,
    ) -> impl Future<Output = Result<Option<Transfer>, LoanPaymentDatabaseError>> + Send;

    /// The step's transfers, by order.
    fn fetch_transfers_for_step(
        &self,
        step_id: i64,
    ) -> impl Future<Output = Result<Vec<Transfer>, LoanPaymentDatabaseError>> + Send;

    /// Conditionally applies `transition` and appends `events` to the outbox, atomically.
    ///
    /// Returns `None` if the transfer was not in the expected state.
    fn transition_transfer(
        &self,
        transition: TransferTransition,
        events: &[EventType],
    ) -> impl Future<Output = Result<Option<Transfer>, LoanPaymentDatabaseError>> + Send;
}
