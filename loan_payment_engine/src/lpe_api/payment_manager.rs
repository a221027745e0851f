use std::fmt::Debug;

use chrono::Utc;
use log::*;

use crate::{
    db::traits::{LoanPaymentDatabase, LoanPaymentDatabaseError},
    db_types::{
        FailureReason,
        LoanPayment,
        LoanPaymentStep,
        NewLoanPayment,
        NewPaymentStep,
        PaymentKind,
        PaymentState,
        RouteQuery,
        StepState,
    },
    events::{EventType, PaymentStateEvent, PaymentSteppedEvent},
    lpe_api::{
        errors::{AdvanceResult, LoanPaymentError, OutOfSyncError},
        payment_kinds::{policy_for, ZeroAmountPolicy},
        route_resolver::RouteResolver,
    },
};

/// `LoanPaymentApi` creates the payment for a loan stage, and moves payments forward as their steps progress.
pub struct LoanPaymentApi<B> {
    db: B,
    routes: RouteResolver<B>,
}

impl<B> Debug for LoanPaymentApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LoanPaymentApi")
    }
}

impl<B: Clone> LoanPaymentApi<B> {
    pub fn new(db: B) -> Self {
        Self { routes: RouteResolver::new(db.clone()), db }
    }
}

/// The step that may start next: the `Created` step right after the highest completed one, or the first step if none
/// has completed yet.
pub fn next_startable_step(steps: &[LoanPaymentStep]) -> Option<&LoanPaymentStep> {
    let next_order =
        steps.iter().filter(|s| s.state == StepState::Completed).map(|s| s.order).max().map(|o| o + 1).unwrap_or(0);
    steps.iter().find(|s| s.order == next_order && s.state == StepState::Created)
}

impl<B> LoanPaymentApi<B>
where B: LoanPaymentDatabase
{
    /// Creates the `kind` payment for the loan, with one step per route hop the stage uses.
    ///
    /// Returns `Ok(None)` when the stage is not ready to start: a payment of this kind is already under way (or done),
    /// or the loan is not yet connected to the accounts the stage needs. A missing route is a configuration error.
    pub async fn initiate(&self, kind: PaymentKind, loan_id: i64) -> Result<Option<LoanPayment>, LoanPaymentError> {
        let loan = self.db.fetch_loan(loan_id).await?.ok_or(LoanPaymentError::LoanNotFound(loan_id))?;
        let policy = policy_for(kind);
        let payments = self.db.fetch_payments_for_loan(loan_id).await?;
        if !(policy.can_initiate)(&loan, &payments) {
            debug!("🧾️ A {kind} payment cannot be started for loan #{loan_id} right now");
            return Ok(None);
        }
        let Some((from_id, to_id)) = (policy.resolve_accounts)(&loan) else {
            warn!("🧾️ Loan #{loan_id} is missing the accounts needed for a {kind} payment. Not initiating.");
            return Ok(None);
        };
        let number = (policy.payment_number)(&loan, &payments);
        let amount = (policy.compute_amount)(&loan, number);
        let now = Utc::now();
        let payment = NewLoanPayment::new(loan_id, kind, amount, from_id, to_id).with_payment_number(number);
        if amount.is_zero() && policy.zero_amount == ZeroAmountPolicy::CompleteImmediately {
            let Some((payment, _)) = self.db.insert_payment(payment.completed_immediately(now), vec![]).await? else {
                debug!("🧾️ Another {kind} payment for loan #{loan_id} got there first");
                return Ok(None);
            };
            info!("🧾️ {kind} payment #{} for loan #{loan_id} has nothing to move. Completed immediately.", payment.id);
            return Ok(Some(payment));
        }
        if amount.value() <= 0 {
            error!("🧾️ Refusing to create a {kind} payment of {amount} for loan #{loan_id}");
            return Err(LoanPaymentError::InvalidAmount { loan_id, kind, amount });
        }

        let from =
            self.db.fetch_payment_account(from_id).await?.ok_or(LoanPaymentDatabaseError::AccountNotFound(from_id))?;
        let to = self.db.fetch_payment_account(to_id).await?.ok_or(LoanPaymentDatabaseError::AccountNotFound(to_id))?;
        let query = RouteQuery { from: from.shape(), to: to.shape(), loan_stage: kind, loan_type: loan.loan_type };
        let route = self.routes.resolve_route(&query).await?;
        let hops = (policy.select_steps)(&route);
        if hops.is_empty() {
            error!("🧾️ Route #{} has no hops for a {kind} payment", route.id);
            return Err(LoanPaymentError::EmptyRoute { route_id: route.id, kind });
        }
        let steps = hops
            .iter()
            .enumerate()
            .map(|(i, hop)| NewPaymentStep {
                order: i as i64,
                from_account_id: hop.from_ref().resolve(from_id, to_id),
                to_account_id: hop.to_ref().resolve(from_id, to_id),
                amount,
            })
            .collect::<Vec<_>>();
        let Some((payment, steps)) = self.db.insert_payment(payment.initiated(now), steps).await? else {
            debug!("🧾️ Another {kind} payment for loan #{loan_id} got there first");
            return Ok(None);
        };
        info!(
            "🧾️ {kind} payment #{} of {amount} created for loan #{loan_id} using route '{}' ({} steps)",
            payment.id,
            route.name,
            steps.len()
        );
        Ok(Some(payment))
    }

    /// Initiates the payment and, if there is anything to move, advances it so that its first step starts.
    pub async fn initiate_and_start(
        &self,
        kind: PaymentKind,
        loan_id: i64,
    ) -> Result<Option<LoanPayment>, LoanPaymentError> {
        let Some(payment) = self.initiate(kind, loan_id).await? else {
            return Ok(None);
        };
        if payment.state == PaymentState::Completed {
            return Ok(Some(payment));
        }
        self.advance(payment.id).await?;
        let payment = self.db.fetch_payment(payment.id).await?.unwrap_or(payment);
        Ok(Some(payment))
    }

    /// Moves the payment along, based on the state of its steps. The first rule that applies wins:
    /// 1. Every step completed (or there are none): the payment completes.
    /// 2. The most recently started step failed: the payment fails, for the same reason.
    /// 3. A step is ready to start: the payment goes pending (if it was not already) and a `PaymentStepped` event
    ///    announces the step.
    /// 4. Otherwise, nothing changes.
    pub async fn advance(&self, payment_id: i64) -> Result<AdvanceResult, LoanPaymentError> {
        let Some(payment) = self.db.fetch_payment(payment_id).await? else {
            debug!("🧾️ Cannot advance payment #{payment_id}. It does not exist.");
            return Ok(AdvanceResult::NotFound);
        };
        let steps = self.db.fetch_steps_for_payment(payment_id).await?;
        let open = payment.is_active();

        if steps.iter().all(|s| s.state == StepState::Completed) && payment.state != PaymentState::Completed {
            if !open {
                warn!("🧾️ Payment #{payment_id} is {} but all of its steps completed", payment.state);
                return Ok(AdvanceResult::Unchanged);
            }
            let event = PaymentStateEvent::new(payment.loan_id, payment_id, payment.state);
            return self.transition(&payment, PaymentState::Completed, None, &[EventType::PaymentCompleted(event)]).await;
        }

        let last_started = steps.iter().filter(|s| s.state != StepState::Created).max_by_key(|s| s.order);
        if let Some(step) = last_started.filter(|s| s.state == StepState::Failed) {
            if !open {
                return Ok(AdvanceResult::Unchanged);
            }
            let reason = step.failure_reason.unwrap_or(FailureReason::BusinessError);
            info!("🧾️ Step #{} of payment #{payment_id} failed ({reason}). The payment fails with it.", step.id);
            let event = PaymentStateEvent::new(payment.loan_id, payment_id, payment.state);
            return self
                .transition(&payment, PaymentState::Failed, Some(reason), &[EventType::PaymentFailed(event)])
                .await;
        }

        if let Some(step) = next_startable_step(&steps).filter(|_| open) {
            let stepped = EventType::PaymentStepped(PaymentSteppedEvent::new(payment_id, payment.state));
            if payment.state == PaymentState::Created {
                debug!("🧾️ Payment #{payment_id} is starting with step #{}", step.id);
                let pending =
                    EventType::PaymentPending(PaymentStateEvent::new(payment.loan_id, payment_id, payment.state));
                return self.transition(&payment, PaymentState::Pending, None, &[pending, stepped]).await;
            }
            debug!("🧾️ Payment #{payment_id} is stepping to step #{} (order {})", step.id, step.order);
            self.db.enqueue_events(&[stepped]).await?;
            return Ok(AdvanceResult::Advanced);
        }

        trace!("🧾️ Nothing to do for payment #{payment_id}");
        Ok(AdvanceResult::Unchanged)
    }

    /// The step that should be started next for the payment, if any.
    pub async fn next_step(&self, payment_id: i64) -> Result<Option<LoanPaymentStep>, LoanPaymentError> {
        let steps = self.db.fetch_steps_for_payment(payment_id).await?;
        Ok(next_startable_step(&steps).cloned())
    }

    async fn transition(
        &self,
        payment: &LoanPayment,
        to: PaymentState,
        reason: Option<FailureReason>,
        events: &[EventType],
    ) -> Result<AdvanceResult, LoanPaymentError> {
        let updated = self.db.transition_payment(payment.id, payment.state, to, reason, events).await?;
        if updated.is_some() {
            info!("🧾️ Payment #{} moved {} → {to}", payment.id, payment.state);
            return Ok(AdvanceResult::Advanced);
        }
        // Someone else got there first. That is fine if they made the same change.
        match self.db.fetch_payment(payment.id).await? {
            Some(p) if p.state == to => {
                debug!("🧾️ Payment #{} is already {to}. Duplicate ignored.", payment.id);
                Ok(AdvanceResult::Unchanged)
            },
            Some(_) => Err(OutOfSyncError::Payment { payment_id: payment.id, expected: payment.state }.into()),
            None => Ok(AdvanceResult::NotFound),
        }
    }
}
