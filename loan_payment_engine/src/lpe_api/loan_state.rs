//! # Loan state evaluation
//!
//! A loan moves through its money-movement stages (funding, disbursement, repayment) as the payment for each stage
//! completes or fails. [`EvaluationStrategy`] holds the rules for the loan's current state, and [`LoanStateApi`]
//! applies them.
//!
//! Every transition is checked against [`allowed_next_states`] and written with a conditional update, together with a
//! `LoanStateChanged` event.
use std::fmt::Debug;

use log::*;

use crate::{
    db::traits::LoanPaymentDatabase,
    db_types::{FailureReason, Loan, LoanPayment, LoanState, PaymentKind, PaymentState},
    events::{EventType, LoanStateChangedEvent, LoanStateSteppedEvent},
    lpe_api::errors::{AdvanceResult, LoanPaymentError, OutOfSyncError},
};

/// The states a loan may move to from `state`.
pub fn allowed_next_states(state: LoanState) -> &'static [LoanState] {
    use LoanState::*;
    match state {
        // Origination is handled upstream of the payment engine
        Created | Requested | Offered | Bound => &[],
        Accepted => &[Funding],
        Funding => &[Funded, FundingPaused, Accepted],
        FundingPaused => &[Funded, Accepted, Funding],
        Funded => &[Accepted, Disbursing],
        Disbursing => &[Disbursed, DisbursingPaused, Funded],
        DisbursingPaused => &[Disbursed, Funded, Disbursing],
        Disbursed => &[Funded, Repaying],
        Repaying => &[Repaid, RepaymentPaused, Closed],
        RepaymentPaused => &[Repaying, Closed, Repaid],
        Repaid => &[Closed],
        Closed => &[],
    }
}

/// The states that make up one money-movement stage of a loan.
#[derive(Debug, Clone, Copy)]
struct StageRules {
    kind: PaymentKind,
    active: LoanState,
    paused: LoanState,
    completed: LoanState,
    /// Where a business failure sends the loan. Stages without one pause instead.
    fallback: Option<LoanState>,
    label: &'static str,
}

const FUNDING_STAGE: StageRules = StageRules {
    kind: PaymentKind::Funding,
    active: LoanState::Funding,
    paused: LoanState::FundingPaused,
    completed: LoanState::Funded,
    fallback: Some(LoanState::Accepted),
    label: "funding",
};

const DISBURSING_STAGE: StageRules = StageRules {
    kind: PaymentKind::Disbursement,
    active: LoanState::Disbursing,
    paused: LoanState::DisbursingPaused,
    completed: LoanState::Disbursed,
    fallback: Some(LoanState::Funded),
    label: "disbursement",
};

const REPAYING_STAGE: StageRules = StageRules {
    kind: PaymentKind::Repayment,
    active: LoanState::Repaying,
    paused: LoanState::RepaymentPaused,
    completed: LoanState::Repaid,
    fallback: None,
    label: "repayment",
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationStrategy {
    /// Pre-acceptance. Nothing for the payment engine to do.
    Created,
    Accepted,
    Funding,
    Disbursing,
    Repaying,
    Closed,
    /// States that only move on an explicit request
    NoOp,
}

/// What the strategy says should happen to the loan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoanVerdict {
    Stay,
    Transition { to: LoanState, context: String },
    /// Progress within the current state, e.g. one installment of several repaid
    Stepped,
}

fn is_failed_with(payment: &LoanPayment, reason: FailureReason) -> bool {
    payment.state == PaymentState::Failed && payment.failure_reason == Some(reason)
}

impl EvaluationStrategy {
    pub fn for_state(state: LoanState) -> Self {
        use LoanState::*;
        match state {
            Created | Requested | Offered | Bound => Self::Created,
            Accepted => Self::Accepted,
            Funding | FundingPaused => Self::Funding,
            Disbursing | DisbursingPaused => Self::Disbursing,
            Repaying | RepaymentPaused => Self::Repaying,
            Closed => Self::Closed,
            Funded | Disbursed | Repaid => Self::NoOp,
        }
    }

    fn stage(&self) -> Option<StageRules> {
        match self {
            Self::Funding => Some(FUNDING_STAGE),
            Self::Disbursing => Some(DISBURSING_STAGE),
            Self::Repaying => Some(REPAYING_STAGE),
            Self::Created | Self::Accepted | Self::Closed | Self::NoOp => None,
        }
    }

    /// The kind of payment whose outcome this strategy reacts to.
    pub fn payment_kind(&self) -> Option<PaymentKind> {
        self.stage().map(|s| s.kind)
    }

    pub fn should_transition_to_completed(&self, loan: &Loan, payment: Option<&LoanPayment>) -> bool {
        match (self, payment) {
            (Self::Accepted, _) => loan.lender_account_id.is_some() && loan.biller_account_id.is_some(),
            (Self::Funding | Self::Disbursing, Some(p)) => p.state == PaymentState::Completed,
            (Self::Repaying, Some(p)) => {
                p.state == PaymentState::Completed && p.payment_number.unwrap_or(1) >= loan.payments_count
            },
            _ => false,
        }
    }

    pub fn should_transition_to_paused(&self, _loan: &Loan, payment: Option<&LoanPayment>) -> bool {
        match (self, payment) {
            (Self::Funding | Self::Disbursing, Some(p)) => is_failed_with(p, FailureReason::RetriesExhausted),
            (Self::Repaying, Some(p)) => p.state == PaymentState::Failed,
            _ => false,
        }
    }

    /// Only a paused loan can be resumed, and only while the failure that paused it is still the latest word.
    pub fn should_transition_to_resumed(&self, loan: &Loan, payment: Option<&LoanPayment>) -> bool {
        let Some(stage) = self.stage() else { return false };
        loan.state == stage.paused && payment.map(|p| p.state == PaymentState::Failed).unwrap_or(false)
    }

    pub fn should_transition_to_fallback(&self, _loan: &Loan, payment: Option<&LoanPayment>) -> bool {
        match (self, payment) {
            (Self::Funding | Self::Disbursing, Some(p)) => is_failed_with(p, FailureReason::BusinessError),
            _ => false,
        }
    }

    /// Applies the rules in priority order: completion, fallback, pause, then in-state progress.
    pub fn evaluate(&self, loan: &Loan, payment: Option<&LoanPayment>) -> LoanVerdict {
        if *self == Self::Accepted {
            if self.should_transition_to_completed(loan, payment) {
                return LoanVerdict::Transition { to: LoanState::Funding, context: "funding start".into() };
            }
            return LoanVerdict::Stay;
        }
        let Some(stage) = self.stage() else { return LoanVerdict::Stay };
        let label = stage.label;
        if self.should_transition_to_completed(loan, payment) {
            return LoanVerdict::Transition { to: stage.completed, context: format!("{label} completion") };
        }
        if let Some(fallback) = stage.fallback.filter(|_| self.should_transition_to_fallback(loan, payment)) {
            return LoanVerdict::Transition { to: fallback, context: format!("{label} fallback to {fallback}") };
        }
        if self.should_transition_to_paused(loan, payment) {
            if loan.state == stage.paused {
                return LoanVerdict::Stay;
            }
            return LoanVerdict::Transition { to: stage.paused, context: format!("{label} pause") };
        }
        if *self == Self::Repaying && payment.map(|p| p.state == PaymentState::Completed).unwrap_or(false) {
            return LoanVerdict::Stepped;
        }
        LoanVerdict::Stay
    }
}

/// The latest payment of the given kind, by creation time.
pub fn latest_payment_of_kind(payments: &[LoanPayment], kind: PaymentKind) -> Option<&LoanPayment> {
    payments.iter().filter(|p| p.kind == kind).max_by_key(|p| (p.created_at, p.id))
}

/// `LoanStateApi` moves loans between states in response to payment outcomes and operator requests.
pub struct LoanStateApi<B> {
    db: B,
}

impl<B> Debug for LoanStateApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LoanStateApi")
    }
}

impl<B> LoanStateApi<B> {
    pub fn new(db: B) -> Self {
        Self { db }
    }
}

impl<B> LoanStateApi<B>
where B: LoanPaymentDatabase
{
    /// Re-evaluates the loan against its current strategy.
    pub async fn evaluate(&self, loan_id: i64) -> Result<AdvanceResult, LoanPaymentError> {
        let Some(loan) = self.db.fetch_loan(loan_id).await? else {
            return Ok(AdvanceResult::NotFound);
        };
        let strategy = EvaluationStrategy::for_state(loan.state);
        let payments = self.db.fetch_payments_for_loan(loan_id).await?;
        let latest = strategy.payment_kind().and_then(|k| latest_payment_of_kind(&payments, k));
        self.apply(&loan, strategy.evaluate(&loan, latest)).await
    }

    /// Evaluates the loan after one of its payments finished. Payments the current state does not care about, and
    /// payments that have since been superseded, are ignored.
    pub async fn evaluate_payment_outcome(
        &self,
        loan_id: i64,
        payment_id: i64,
    ) -> Result<AdvanceResult, LoanPaymentError> {
        let Some(loan) = self.db.fetch_loan(loan_id).await? else {
            return Ok(AdvanceResult::NotFound);
        };
        let strategy = EvaluationStrategy::for_state(loan.state);
        let Some(kind) = strategy.payment_kind() else {
            debug!("🏦️ Loan #{loan_id} is {}. Payment #{payment_id} does not affect it.", loan.state);
            return Ok(AdvanceResult::Unchanged);
        };
        let payments = self.db.fetch_payments_for_loan(loan_id).await?;
        let latest = latest_payment_of_kind(&payments, kind);
        if latest.map(|p| p.id) != Some(payment_id) {
            debug!("🏦️ Payment #{payment_id} is not the current {kind} payment for loan #{loan_id}. Ignoring.");
            return Ok(AdvanceResult::Unchanged);
        }
        self.apply(&loan, strategy.evaluate(&loan, latest)).await
    }

    /// Explicitly moves the loan on to its next stage: Funded → Disbursing, Disbursed → Repaying and Repaid → Closed.
    /// Any other state is re-evaluated.
    pub async fn advance_loan(&self, loan_id: i64) -> Result<AdvanceResult, LoanPaymentError> {
        let Some(loan) = self.db.fetch_loan(loan_id).await? else {
            return Ok(AdvanceResult::NotFound);
        };
        let (to, context) = match loan.state {
            LoanState::Funded => (LoanState::Disbursing, "disbursement start"),
            LoanState::Disbursed => (LoanState::Repaying, "repayment start"),
            LoanState::Repaid => (LoanState::Closed, "loan closing"),
            _ => return self.evaluate(loan_id).await,
        };
        self.transition(&loan, to, context).await
    }

    /// Resumes a paused stage, so that a fresh payment can be attempted.
    pub async fn resume_loan(&self, loan_id: i64) -> Result<AdvanceResult, LoanPaymentError> {
        let Some(loan) = self.db.fetch_loan(loan_id).await? else {
            return Ok(AdvanceResult::NotFound);
        };
        let strategy = EvaluationStrategy::for_state(loan.state);
        let Some(stage) = strategy.stage() else {
            warn!("🏦️ Loan #{loan_id} is {}. There is nothing to resume.", loan.state);
            return Ok(AdvanceResult::Unchanged);
        };
        let payments = self.db.fetch_payments_for_loan(loan_id).await?;
        let latest = latest_payment_of_kind(&payments, stage.kind);
        if !strategy.should_transition_to_resumed(&loan, latest) {
            info!("🏦️ Loan #{loan_id} ({}) cannot be resumed right now", loan.state);
            return Ok(AdvanceResult::Unchanged);
        }
        self.transition(&loan, stage.active, &format!("{} resume", stage.label)).await
    }

    /// Connects accounts to the loan, then re-evaluates it. An accepted loan starts funding as soon as its lender
    /// and biller accounts are known.
    pub async fn connect_accounts(
        &self,
        loan_id: i64,
        borrower_account_id: Option<i64>,
        lender_account_id: Option<i64>,
        biller_account_id: Option<i64>,
    ) -> Result<AdvanceResult, LoanPaymentError> {
        let updated = self
            .db
            .update_loan_accounts(loan_id, borrower_account_id, lender_account_id, biller_account_id)
            .await?;
        if updated.is_none() {
            return Ok(AdvanceResult::NotFound);
        }
        self.evaluate(loan_id).await
    }

    async fn apply(&self, loan: &Loan, verdict: LoanVerdict) -> Result<AdvanceResult, LoanPaymentError> {
        match verdict {
            LoanVerdict::Stay => {
                trace!("🏦️ Loan #{} stays {}", loan.id, loan.state);
                Ok(AdvanceResult::Unchanged)
            },
            LoanVerdict::Transition { to, context } => self.transition(loan, to, &context).await,
            LoanVerdict::Stepped => {
                info!("🏦️ Loan #{} made progress while {}", loan.id, loan.state);
                let event = EventType::LoanStateStepped(LoanStateSteppedEvent::new(loan.id, loan.state));
                self.db.enqueue_events(&[event]).await?;
                Ok(AdvanceResult::Advanced)
            },
        }
    }

    async fn transition(&self, loan: &Loan, to: LoanState, context: &str) -> Result<AdvanceResult, LoanPaymentError> {
        let from = loan.state;
        if !allowed_next_states(from).contains(&to) {
            error!("🏦️ Refusing to move loan #{} from {from} to {to} ({context})", loan.id);
            return Err(LoanPaymentError::InvalidLoanTransition { loan_id: loan.id, from, to });
        }
        let event = EventType::LoanStateChanged(LoanStateChangedEvent::new(loan.id, from, to));
        if self.db.transition_loan(loan.id, from, to, &[event]).await?.is_some() {
            info!("🏦️ Loan #{} moved {from} → {to} ({context})", loan.id);
            return Ok(AdvanceResult::Advanced);
        }
        match self.db.fetch_loan(loan.id).await? {
            Some(l) if l.state == to => {
                debug!("🏦️ Loan #{} is already {to}. Duplicate ignored.", loan.id);
                Ok(AdvanceResult::Unchanged)
            },
            Some(_) => Err(OutOfSyncError::Loan { loan_id: loan.id, expected: from }.into()),
            None => Ok(AdvanceResult::NotFound),
        }
    }
}
