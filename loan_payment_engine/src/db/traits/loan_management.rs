use std::future::Future;

use crate::{
    db::traits::LoanPaymentDatabaseError,
    db_types::{Loan, LoanState, NewLoan, NewPaymentAccount, PaymentAccount},
    events::EventType,
};

/// Loans, and the payment accounts they point at.
pub trait LoanManagement {
    fn insert_payment_account(
        &self,
        account: NewPaymentAccount,
    ) -> impl Future<Output = Result<PaymentAccount, LoanPaymentDatabaseError>> + Send;

    fn fetch_payment_account(
        &self,
        account_id: i64,
    ) -> impl Future<Output = Result<Option<PaymentAccount>, LoanPaymentDatabaseError>> + Send;

    fn insert_loan(&self, loan: NewLoan) -> impl Future<Output = Result<Loan, LoanPaymentDatabaseError>> + Send;

    fn fetch_loan(&self, loan_id: i64) -> impl Future<Output = Result<Option<Loan>, LoanPaymentDatabaseError>> + Send;

    /// Connects accounts to a loan. Only the accounts that are `Some` are changed.
    ///
    /// Returns `None` if the loan does not exist.
    fn update_loan_accounts(
        &self,
        loan_id: i64,
        borrower_account_id: Option<i64>,
        lender_account_id: Option<i64>,
        biller_account_id: Option<i64>,
    ) -> impl Future<Output = Result<Option<Loan>, LoanPaymentDatabaseError>> + Send;

    /// In a single atomic transaction,
    /// * moves the loan from `from` to `to`, if and only if it is currently in `from`,
    /// * appends `events` to the outbox.
    ///
    /// Returns the updated loan, or `None` if the loan was not in state `from` (nothing is written in that case).
    fn transition_loan(
        &self,
        loan_id: i64,
        from: LoanState,
        to: LoanState,
        events: &[EventType],
    ) -> impl Future<Output = Result<Option<Loan>, LoanPaymentDatabaseError>> + Send;
}
