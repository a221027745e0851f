use std::fmt::Display;

use loan_payment_engine::{
    db_types::{Loan, LoanPayment, LoanPaymentStep, Transfer},
    AdvanceResult,
};
use serde::{Deserialize, Serialize};

/// What a state-changing request did. `changed` is false for requests that were already satisfied, e.g. a webhook
/// delivered twice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub changed: bool,
    pub message: String,
}

impl ActionResult {
    pub fn new<S: Display>(result: AdvanceResult, subject: S) -> Self {
        let (changed, message) = match result {
            AdvanceResult::Advanced => (true, format!("{subject} was updated")),
            AdvanceResult::Unchanged => (false, format!("{subject} did not need to change")),
            AdvanceResult::NotFound => (false, format!("{subject} does not exist")),
        };
        Self { changed, message }
    }
}

/// Accounts to attach to a loan. Missing fields leave the existing link alone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectAccountsParams {
    pub borrower_account_id: Option<i64>,
    pub lender_account_id: Option<i64>,
    pub biller_account_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanStatus {
    pub loan: Loan,
    pub payments: Vec<LoanPayment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepStatus {
    #[serde(flatten)]
    pub step: LoanPaymentStep,
    pub transfers: Vec<Transfer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentStatus {
    pub payment: LoanPayment,
    pub steps: Vec<StepStatus>,
}
