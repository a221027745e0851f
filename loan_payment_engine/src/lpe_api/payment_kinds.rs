//! Per-stage payment policies.
//!
//! Each [`PaymentKind`] has a [`KindPolicy`]: a table of plain functions that decide who pays whom, how much, which
//! route hops the stage uses, and whether a new payment may be started. [`policy_for`] selects the table.
use std::collections::HashMap;

use crate::db_types::{Cents, Loan, LoanPayment, PaymentKind, PaymentState, PaymentsRoute, PaymentsRouteStep};

pub const DEFAULT_MAX_TRANSFER_ATTEMPTS: i64 = 3;

/// What to do when a stage computes a zero amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZeroAmountPolicy {
    /// Zero is a bug in the loan data. Refuse to create the payment.
    Reject,
    /// Nothing to move. The payment is created already `Completed`, with no steps.
    CompleteImmediately,
}

pub struct KindPolicy {
    pub kind: PaymentKind,
    /// (source, destination) account ids, or `None` if the loan is not connected to the accounts yet
    pub resolve_accounts: fn(&Loan) -> Option<(i64, i64)>,
    /// The amount for the payment with the given installment number
    pub compute_amount: fn(&Loan, Option<i64>) -> Cents,
    /// The route hops this stage uses
    pub select_steps: fn(&PaymentsRoute) -> Vec<PaymentsRouteStep>,
    /// Whether a new payment may be started, given the loan's existing payments
    pub can_initiate: fn(&Loan, &[LoanPayment]) -> bool,
    /// The installment number for a new payment
    pub payment_number: fn(&Loan, &[LoanPayment]) -> Option<i64>,
    pub zero_amount: ZeroAmountPolicy,
}

static FUNDING: KindPolicy = KindPolicy {
    kind: PaymentKind::Funding,
    resolve_accounts: lender_to_biller,
    compute_amount: principal_and_fee,
    select_steps: funding_steps,
    can_initiate: can_initiate_funding,
    payment_number: no_payment_number,
    zero_amount: ZeroAmountPolicy::Reject,
};

static DISBURSEMENT: KindPolicy = KindPolicy {
    kind: PaymentKind::Disbursement,
    resolve_accounts: lender_to_biller,
    compute_amount: principal,
    select_steps: disbursement_steps,
    can_initiate: can_initiate_disbursement,
    payment_number: no_payment_number,
    zero_amount: ZeroAmountPolicy::Reject,
};

static FEE: KindPolicy = KindPolicy {
    kind: PaymentKind::Fee,
    resolve_accounts: lender_to_biller,
    compute_amount: fee,
    select_steps: all_steps,
    can_initiate: can_initiate_fee,
    payment_number: no_payment_number,
    zero_amount: ZeroAmountPolicy::CompleteImmediately,
};

static REPAYMENT: KindPolicy = KindPolicy {
    kind: PaymentKind::Repayment,
    resolve_accounts: borrower_to_lender,
    compute_amount: installment,
    select_steps: all_steps,
    can_initiate: can_initiate_repayment,
    payment_number: next_repayment_number,
    zero_amount: ZeroAmountPolicy::Reject,
};

static REFUND: KindPolicy = KindPolicy {
    kind: PaymentKind::Refund,
    resolve_accounts: biller_to_lender,
    compute_amount: principal,
    select_steps: all_steps,
    can_initiate: can_initiate_refund,
    payment_number: no_payment_number,
    zero_amount: ZeroAmountPolicy::Reject,
};

pub fn policy_for(kind: PaymentKind) -> &'static KindPolicy {
    match kind {
        PaymentKind::Funding => &FUNDING,
        PaymentKind::Disbursement => &DISBURSEMENT,
        PaymentKind::Fee => &FEE,
        PaymentKind::Repayment => &REPAYMENT,
        PaymentKind::Refund => &REFUND,
    }
}

/// How many transfer attempts each stage gets before a technical failure becomes terminal.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    default_attempts: i64,
    overrides: HashMap<PaymentKind, i64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { default_attempts: DEFAULT_MAX_TRANSFER_ATTEMPTS, overrides: HashMap::new() }
    }
}

impl RetryPolicy {
    pub fn new(default_attempts: i64) -> Self {
        Self { default_attempts: default_attempts.max(1), overrides: HashMap::new() }
    }

    pub fn with_override(mut self, kind: PaymentKind, attempts: i64) -> Self {
        self.overrides.insert(kind, attempts.max(1));
        self
    }

    pub fn max_transfer_attempts(&self, kind: PaymentKind) -> i64 {
        self.overrides.get(&kind).copied().unwrap_or(self.default_attempts)
    }
}

//--------------------------------------      Accounts       ---------------------------------------------------------
fn lender_to_biller(loan: &Loan) -> Option<(i64, i64)> {
    Some((loan.lender_account_id?, loan.biller_account_id?))
}

fn borrower_to_lender(loan: &Loan) -> Option<(i64, i64)> {
    Some((loan.borrower_account_id?, loan.lender_account_id?))
}

fn biller_to_lender(loan: &Loan) -> Option<(i64, i64)> {
    Some((loan.biller_account_id?, loan.lender_account_id?))
}

//--------------------------------------       Amounts       ---------------------------------------------------------
fn principal(loan: &Loan, _: Option<i64>) -> Cents {
    loan.amount
}

/// Funding covers the fee as well as the principal.
fn principal_and_fee(loan: &Loan, _: Option<i64>) -> Cents {
    loan.amount + loan.fee_amount
}

fn fee(loan: &Loan, _: Option<i64>) -> Cents {
    loan.fee_amount
}

/// Equal shares of the principal. The last installment absorbs the remainder.
fn installment(loan: &Loan, number: Option<i64>) -> Cents {
    let parts = loan.payments_count.max(1);
    let index = number.unwrap_or(1).clamp(1, parts) - 1;
    loan.amount.portion(parts, index).unwrap_or_default()
}

//--------------------------------------        Steps        ---------------------------------------------------------
fn all_steps(route: &PaymentsRoute) -> Vec<PaymentsRouteStep> {
    route.steps.clone()
}

fn is_shared_funding_route(route: &PaymentsRoute) -> bool {
    route.supports_stage(PaymentKind::Funding) && route.supports_stage(PaymentKind::Disbursement) && route.steps.len() > 1
}

/// On a route shared with disbursement, funding only takes the money as far as the first hop.
fn funding_steps(route: &PaymentsRoute) -> Vec<PaymentsRouteStep> {
    if is_shared_funding_route(route) {
        route.steps.iter().take(1).cloned().collect()
    } else {
        all_steps(route)
    }
}

/// On a route shared with funding, disbursement picks up where funding left off.
fn disbursement_steps(route: &PaymentsRoute) -> Vec<PaymentsRouteStep> {
    if is_shared_funding_route(route) {
        route.steps.iter().skip(1).cloned().collect()
    } else {
        all_steps(route)
    }
}

//--------------------------------------     Initiation      ---------------------------------------------------------
fn has_live_or_completed(payments: &[LoanPayment], kind: PaymentKind) -> bool {
    payments.iter().any(|p| {
        p.kind == kind && matches!(p.state, PaymentState::Created | PaymentState::Pending | PaymentState::Completed)
    })
}

fn can_initiate_funding(_: &Loan, payments: &[LoanPayment]) -> bool {
    !has_live_or_completed(payments, PaymentKind::Funding)
}

fn can_initiate_disbursement(_: &Loan, payments: &[LoanPayment]) -> bool {
    !has_live_or_completed(payments, PaymentKind::Disbursement)
}

fn can_initiate_fee(_: &Loan, payments: &[LoanPayment]) -> bool {
    !has_live_or_completed(payments, PaymentKind::Fee)
}

fn can_initiate_refund(_: &Loan, payments: &[LoanPayment]) -> bool {
    !has_live_or_completed(payments, PaymentKind::Refund)
}

fn completed_repayments(payments: &[LoanPayment]) -> i64 {
    payments.iter().filter(|p| p.kind == PaymentKind::Repayment && p.state == PaymentState::Completed).count() as i64
}

fn can_initiate_repayment(loan: &Loan, payments: &[LoanPayment]) -> bool {
    let active = payments.iter().any(|p| p.kind == PaymentKind::Repayment && p.is_active());
    !active && completed_repayments(payments) < loan.payments_count
}

fn no_payment_number(_: &Loan, _: &[LoanPayment]) -> Option<i64> {
    None
}

fn next_repayment_number(_: &Loan, payments: &[LoanPayment]) -> Option<i64> {
    Some(completed_repayments(payments) + 1)
}

#[cfg(test)]
mod test {
    use chrono::Utc;

    use super::*;
    use crate::db_types::{AccountOwnership, AccountShape, AccountType, LoanState, LoanType, PaymentProvider};

    fn loan(amount: i64, payments_count: i64) -> Loan {
        Loan {
            id: 1,
            amount: Cents::from(amount),
            fee_amount: Cents::from(0),
            loan_type: LoanType::DirectBillPay,
            state: LoanState::Accepted,
            borrower_account_id: Some(10),
            lender_account_id: Some(20),
            biller_account_id: Some(30),
            payments_count,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn payment(kind: PaymentKind, state: PaymentState) -> LoanPayment {
        LoanPayment {
            id: 1,
            loan_id: 1,
            kind,
            state,
            amount: Cents::from(100),
            payment_number: None,
            from_account_id: 1,
            to_account_id: 2,
            failure_reason: None,
            initiated_at: None,
            scheduled_at: None,
            completed_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn route(stages: &[PaymentKind], hops: usize) -> PaymentsRoute {
        let shape = AccountShape {
            account_type: AccountType::BankAccount,
            ownership: AccountOwnership::Internal,
            provider: PaymentProvider::Checkbook,
        };
        PaymentsRoute {
            id: 1,
            name: "test".into(),
            from: shape,
            to: shape,
            loan_stages: stages.to_vec(),
            loan_types: vec![LoanType::DirectBillPay],
            steps: (0..hops as i64)
                .map(|order| PaymentsRouteStep { order, from_account_id: None, to_account_id: None })
                .collect(),
        }
    }

    #[test]
    fn accounts_per_kind() {
        let l = loan(1000, 1);
        assert_eq!((policy_for(PaymentKind::Funding).resolve_accounts)(&l), Some((20, 30)));
        assert_eq!((policy_for(PaymentKind::Repayment).resolve_accounts)(&l), Some((10, 20)));
        assert_eq!((policy_for(PaymentKind::Refund).resolve_accounts)(&l), Some((30, 20)));
        let mut l = loan(1000, 1);
        l.biller_account_id = None;
        assert_eq!((policy_for(PaymentKind::Disbursement).resolve_accounts)(&l), None);
    }

    #[test]
    fn installments_sum_to_principal() {
        let l = loan(1000, 3);
        let policy = policy_for(PaymentKind::Repayment);
        let amounts: Vec<Cents> = (1..=3).map(|n| (policy.compute_amount)(&l, Some(n))).collect();
        assert_eq!(amounts, vec![Cents::from(333), Cents::from(333), Cents::from(334)]);

        let l = loan(1000, 1_000_000_000);
        assert_eq!((policy.compute_amount)(&l, Some(1)), Cents::default());
        assert_eq!((policy.compute_amount)(&l, Some(1_000_000_000)), Cents::from(1000));
    }

    #[test]
    fn amounts_per_kind() {
        let mut l = loan(1000, 1);
        l.fee_amount = Cents::from(25);
        assert_eq!((policy_for(PaymentKind::Funding).compute_amount)(&l, None), Cents::from(1025));
        assert_eq!((policy_for(PaymentKind::Disbursement).compute_amount)(&l, None), Cents::from(1000));
        assert_eq!((policy_for(PaymentKind::Fee).compute_amount)(&l, None), Cents::from(25));
    }

    #[test]
    fn shared_routes_are_split() {
        let shared = route(&[PaymentKind::Funding, PaymentKind::Disbursement], 3);
        let funding = (policy_for(PaymentKind::Funding).select_steps)(&shared);
        let disbursement = (policy_for(PaymentKind::Disbursement).select_steps)(&shared);
        assert_eq!(funding.iter().map(|s| s.order).collect::<Vec<_>>(), vec![0]);
        assert_eq!(disbursement.iter().map(|s| s.order).collect::<Vec<_>>(), vec![1, 2]);
        let funding_only = route(&[PaymentKind::Funding], 2);
        assert_eq!((policy_for(PaymentKind::Funding).select_steps)(&funding_only).len(), 2);
        let single = route(&[PaymentKind::Funding, PaymentKind::Disbursement], 1);
        assert_eq!((policy_for(PaymentKind::Disbursement).select_steps)(&single).len(), 1);
    }

    #[test]
    fn initiation_guards() {
        let l = loan(1000, 2);
        let funding = policy_for(PaymentKind::Funding);
        assert!((funding.can_initiate)(&l, &[payment(PaymentKind::Funding, PaymentState::Failed)]));
        assert!(!(funding.can_initiate)(&l, &[payment(PaymentKind::Funding, PaymentState::Pending)]));
        assert!((funding.can_initiate)(&l, &[payment(PaymentKind::Fee, PaymentState::Pending)]));

        let repayment = policy_for(PaymentKind::Repayment);
        let one_done = [payment(PaymentKind::Repayment, PaymentState::Completed)];
        assert!((repayment.can_initiate)(&l, &one_done));
        assert_eq!((repayment.payment_number)(&l, &one_done), Some(2));
        let both_done = [
            payment(PaymentKind::Repayment, PaymentState::Completed),
            payment(PaymentKind::Repayment, PaymentState::Completed),
        ];
        assert!(!(repayment.can_initiate)(&l, &both_done));
        let active = [payment(PaymentKind::Repayment, PaymentState::Created)];
        assert!(!(repayment.can_initiate)(&l, &active));
    }

    #[test]
    fn retry_policy_overrides() {
        let policy = RetryPolicy::default().with_override(PaymentKind::Repayment, 5);
        assert_eq!(policy.max_transfer_attempts(PaymentKind::Funding), 3);
        assert_eq!(policy.max_transfer_attempts(PaymentKind::Repayment), 5);
        assert_eq!(RetryPolicy::new(0).max_transfer_attempts(PaymentKind::Fee), 1);
    }
}
