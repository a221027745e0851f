use std::future::Future;

use crate::{
    db::traits::LoanPaymentDatabaseError,
    db_types::{
        FailureReason,
        LoanPayment,
        LoanPaymentStep,
        NewLoanPayment,
        NewPaymentStep,
        PaymentState,
        StepState,
    },
    events::EventType,
};

/// Loan payments and the steps they are made of.
pub trait PaymentManagement {
    /// Stores a new payment and all of its steps in a single atomic transaction.
    ///
    /// A payment that is born `Completed` (nothing to move) also queues its `PaymentCompleted` event in the same
    /// transaction, since there is no later transition that would announce it.
    ///
    /// Returns `None`, and stores nothing, if the loan already has a live or completed payment for the same stage and
    /// installment. Failed payments do not count.
    fn insert_payment(
        &self,
        payment: NewLoanPayment,
        steps: Vec<NewPaymentStep>,
    ) -> impl Future<Output = Result<Option<(LoanPayment, Vec<LoanPaymentStep>)>, LoanPaymentDatabaseError>> + Send;

    fn fetch_payment(
        &self,
        payment_id: i64,
    ) -> impl Future<Output = Result<Option<LoanPayment>, LoanPaymentDatabaseError>> + Send;

    /// All payments for the loan, oldest first.
    fn fetch_payments_for_loan(
        &self,
        loan_id: i64,
    ) -> impl Future<Output = Result<Vec<LoanPayment>, LoanPaymentDatabaseError>> + Send;

    /// Conditionally moves the payment from `from` to `to` and appends `events` to the outbox, atomically.
    ///
    /// Moving to `Pending` stamps `initiated_at` if it was not already set. Moving to `Completed` stamps `completed_at`.
    /// `failure_reason` is only written when moving to `Failed`.
    ///
    /// Returns `None` if the payment was not in state `from`.
    fn transition_payment(
        &self,
        payment_id: i64,
        from: PaymentState,
        to: PaymentState,
        failure_reason: Option<FailureReason>,
        events: &[EventType],
    ) -> impl Future<Output = Result<Option<LoanPayment>, LoanPaymentDatabaseError>> + Send;

    fn fetch_step(
        &self,
        step_id: i64,
    ) -> impl Future<Output = Result<Option<LoanPaymentStep>, LoanPaymentDatabaseError>> + Send;

    /// The payment's steps, by order.
    fn fetch_steps_for_payment(
        &self,
        payment_id: i64,
    ) -> impl Future<Output = Result<Vec<LoanPaymentStep>, LoanPaymentDatabaseError>> + Send;

    /// Steps in the given state, least recently updated first.
    fn fetch_steps_in_state(
        &self,
        state: StepState,
        limit: i64,
    ) -> impl Future<Output = Result<Vec<LoanPaymentStep>, LoanPaymentDatabaseError>> + Send;

    /// Conditionally moves the step from `from` to `to` and appends `events` to the outbox, atomically.
    ///
    /// Returns `None` if the step was not in state `from`.
    fn transition_step(
        &self,
        step_id: i64,
        from: StepState,
        to: StepState,
        failure_reason: Option<FailureReason>,
        events: &[EventType],
    ) -> impl Future<Output = Result<Option<LoanPaymentStep>, LoanPaymentDatabaseError>> + Send;
}
