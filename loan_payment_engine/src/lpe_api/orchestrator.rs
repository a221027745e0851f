use std::fmt::Debug;

use log::*;

use crate::{
    db::traits::LoanPaymentDatabase,
    db_types::{LoanState, PaymentKind},
    events::EventType,
    lpe_api::{
        errors::{AdvanceResult, LoanPaymentError},
        loan_state::LoanStateApi,
        payment_kinds::RetryPolicy,
        payment_manager::LoanPaymentApi,
        step_machine::StepStateMachine,
        transfer_api::TransferExecutionApi,
    },
    providers::ProviderRegistry,
};

/// The payment stage a loan state change kicks off, if any.
pub fn stage_to_initiate(old_state: LoanState, new_state: LoanState) -> Option<PaymentKind> {
    use LoanState::*;
    match (old_state, new_state) {
        (Accepted | FundingPaused, Funding) => Some(PaymentKind::Funding),
        (Funded | DisbursingPaused, Disbursing) => Some(PaymentKind::Disbursement),
        (Disbursed | RepaymentPaused, Repaying) => Some(PaymentKind::Repayment),
        _ => None,
    }
}

/// `EventOrchestrator` wires the engine's components together. Each durable event is routed to the component that
/// reacts to it:
///
/// | Event                                   | Reaction                                 |
/// |-----------------------------------------|------------------------------------------|
/// | `TransferCompleted`, `TransferFailed`   | run the step state machine               |
/// | `PaymentStep{Pending,Completed,Failed}` | advance the payment                      |
/// | `PaymentStepped`                        | start the payment's next step            |
/// | `PaymentCompleted`, `PaymentFailed`     | evaluate the loan                        |
/// | `LoanStateChanged`                      | initiate the new stage's payment         |
/// | `LoanStateStepped` (repaying)           | initiate the next repayment              |
///
/// All handlers are idempotent, so events may safely be delivered more than once.
pub struct EventOrchestrator<B> {
    db: B,
    payments: LoanPaymentApi<B>,
    steps: StepStateMachine<B>,
    loans: LoanStateApi<B>,
}

impl<B> Debug for EventOrchestrator<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EventOrchestrator")
    }
}

impl<B: Clone> EventOrchestrator<B> {
    pub fn new(db: B, providers: ProviderRegistry, retry_policy: RetryPolicy) -> Self {
        let transfers = TransferExecutionApi::new(db.clone(), providers);
        Self {
            payments: LoanPaymentApi::new(db.clone()),
            steps: StepStateMachine::new(db.clone(), transfers, retry_policy),
            loans: LoanStateApi::new(db.clone()),
            db,
        }
    }

    pub fn payments(&self) -> &LoanPaymentApi<B> {
        &self.payments
    }

    pub fn steps(&self) -> &StepStateMachine<B> {
        &self.steps
    }

    pub fn transfers(&self) -> &TransferExecutionApi<B> {
        self.steps.transfers()
    }

    pub fn loans(&self) -> &LoanStateApi<B> {
        &self.loans
    }
}

impl<B> EventOrchestrator<B>
where B: LoanPaymentDatabase
{
    pub async fn handle(&self, event: &EventType) -> Result<AdvanceResult, LoanPaymentError> {
        trace!("📬️ Handling {event:?}");
        match event {
            EventType::TransferExecuted(_) | EventType::PaymentPending(_) => Ok(AdvanceResult::Unchanged),
            EventType::TransferCompleted(e) | EventType::TransferFailed(e) => {
                let Some(transfer) = self.db.fetch_transfer(e.transfer_id).await? else {
                    warn!("📬️ Transfer #{} has vanished", e.transfer_id);
                    return Ok(AdvanceResult::NotFound);
                };
                self.steps.advance(transfer.step_id).await
            },
            EventType::PaymentStepPending(e) | EventType::PaymentStepCompleted(e) | EventType::PaymentStepFailed(e) => {
                let Some(step) = self.db.fetch_step(e.step_id).await? else {
                    warn!("📬️ Step #{} has vanished", e.step_id);
                    return Ok(AdvanceResult::NotFound);
                };
                self.payments.advance(step.payment_id).await
            },
            EventType::PaymentStepped(e) => match self.payments.next_step(e.payment_id).await? {
                Some(step) => self.steps.start(step.id).await,
                None => {
                    debug!("📬️ Payment #{} has no step ready to start", e.payment_id);
                    Ok(AdvanceResult::Unchanged)
                },
            },
            EventType::PaymentCompleted(e) | EventType::PaymentFailed(e) => {
                self.loans.evaluate_payment_outcome(e.loan_id, e.payment_id).await
            },
            EventType::LoanStateChanged(e) => match stage_to_initiate(e.old_state, e.new_state) {
                Some(kind) => self.initiate(kind, e.loan_id).await,
                None => Ok(AdvanceResult::Unchanged),
            },
            EventType::LoanStateStepped(e) => match e.state {
                LoanState::Repaying => self.initiate(PaymentKind::Repayment, e.loan_id).await,
                _ => Ok(AdvanceResult::Unchanged),
            },
        }
    }

    async fn initiate(&self, kind: PaymentKind, loan_id: i64) -> Result<AdvanceResult, LoanPaymentError> {
        match self.payments.initiate_and_start(kind, loan_id).await? {
            Some(payment) => {
                debug!("📬️ {kind} payment #{} started for loan #{loan_id}", payment.id);
                Ok(AdvanceResult::Advanced)
            },
            None => Ok(AdvanceResult::Unchanged),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn stage_kickoff() {
        use LoanState::*;
        assert_eq!(stage_to_initiate(Accepted, Funding), Some(PaymentKind::Funding));
        assert_eq!(stage_to_initiate(FundingPaused, Funding), Some(PaymentKind::Funding));
        assert_eq!(stage_to_initiate(Funded, Disbursing), Some(PaymentKind::Disbursement));
        assert_eq!(stage_to_initiate(RepaymentPaused, Repaying), Some(PaymentKind::Repayment));
        assert_eq!(stage_to_initiate(Funding, Funded), None);
        assert_eq!(stage_to_initiate(Funding, Accepted), None);
    }
}
