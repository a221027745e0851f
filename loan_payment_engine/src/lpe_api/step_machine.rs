//! The payment step state machine.
//!
//! A step wraps one or more transfer attempts. [`decide`] maps the step's state and its latest transfer to the action
//! to take. The table is a single exhaustive `match`: adding a step or transfer state will not compile until every
//! combination has been given an action.
use std::fmt::Debug;

use log::*;

use crate::{
    db::traits::{InsertTransferResult, LoanPaymentDatabase, LoanPaymentDatabaseError},
    db_types::{
        FailureReason,
        LoanPaymentStep,
        NewTransfer,
        PaymentProvider,
        StepState,
        Transfer,
        TransferErrorType,
        TransferState,
    },
    events::{EventType, StepStateEvent},
    lpe_api::{
        errors::{AdvanceResult, LoanPaymentError, OutOfSyncError},
        payment_kinds::RetryPolicy,
        transfer_api::TransferExecutionApi,
    },
};

/// What [`decide`] needs to know about a step's latest transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferSnapshot {
    pub id: i64,
    pub order: i64,
    pub state: TransferState,
    pub provider: PaymentProvider,
    pub error_type: Option<TransferErrorType>,
    /// Whether the attempt before this one failed
    pub previous_failed: bool,
}

impl TransferSnapshot {
    /// Snapshot of the latest attempt in `transfers` (which must be sorted by order).
    pub fn latest(transfers: &[Transfer]) -> Option<Self> {
        let latest = transfers.last()?;
        let previous_failed =
            transfers.iter().any(|t| t.order == latest.order - 1 && t.state == TransferState::Failed);
        Some(Self {
            id: latest.id,
            order: latest.order,
            state: latest.state,
            provider: latest.provider,
            error_type: latest.error_type,
            previous_failed,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction {
    /// The step has not been given a transfer yet
    AwaitTransfer,
    /// Move the step to `Pending` and submit its first transfer
    BeginPending,
    /// Submit a transfer that was created but never sent: a retry, or a first attempt whose submission was cut short
    ExecuteUnsent,
    /// The transfer is in flight
    Poll,
    Complete,
    Fail(FailureReason),
    /// Create and submit the next attempt
    Retry { next_order: i64 },
    OutOfSync(&'static str),
}

/// A finished step whose latest transfer finished the same way. Anything arriving for it now is a repeat delivery.
pub fn is_settled(step_state: StepState, transfer: Option<&TransferSnapshot>) -> bool {
    matches!(
        (step_state, transfer.map(|t| t.state)),
        (StepState::Completed, Some(TransferState::Completed)) | (StepState::Failed, Some(TransferState::Failed))
    )
}

pub fn decide(step_state: StepState, transfer: Option<&TransferSnapshot>, max_attempts: i64) -> StepAction {
    use StepAction::*;
    use StepState as S;
    use TransferState as T;
    match (step_state, transfer) {
        (S::Created, None) => AwaitTransfer,
        (S::Created, Some(TransferSnapshot { state: T::Created, order, .. })) => {
            if *order == 0 {
                BeginPending
            } else {
                OutOfSync("a step that has not started can only have its first transfer")
            }
        },
        (S::Created, Some(TransferSnapshot { state: T::Pending, .. })) => {
            OutOfSync("the transfer is in flight but the step never started")
        },
        (S::Created, Some(TransferSnapshot { state: T::Completed, .. })) => {
            OutOfSync("the transfer completed but the step never started")
        },
        (S::Created, Some(TransferSnapshot { state: T::Failed, .. })) => {
            OutOfSync("the transfer failed but the step never started")
        },
        (S::Pending, None) => OutOfSync("the step is pending without a transfer"),
        (S::Pending, Some(TransferSnapshot { state: T::Created, order, previous_failed, .. })) => {
            if *order == 0 || *previous_failed {
                ExecuteUnsent
            } else {
                OutOfSync("an unsent transfer on a pending step must be the first attempt or a retry of a failed one")
            }
        },
        (S::Pending, Some(TransferSnapshot { state: T::Pending, .. })) => Poll,
        (S::Pending, Some(TransferSnapshot { state: T::Completed, .. })) => Complete,
        (S::Pending, Some(TransferSnapshot { state: T::Failed, error_type, order, .. })) => match error_type {
            Some(TransferErrorType::Business) => Fail(FailureReason::BusinessError),
            Some(TransferErrorType::Technical) | None => {
                if order + 1 < max_attempts {
                    Retry { next_order: order + 1 }
                } else {
                    Fail(FailureReason::RetriesExhausted)
                }
            },
        },
        (
            S::Completed | S::Failed,
            None | Some(TransferSnapshot { state: T::Created | T::Pending | T::Completed | T::Failed, .. }),
        ) => OutOfSync("the step has already finished"),
    }
}

/// `StepStateMachine` drives a payment step from its transfers' outcomes.
pub struct StepStateMachine<B> {
    db: B,
    transfers: TransferExecutionApi<B>,
    retry_policy: RetryPolicy,
}

impl<B> Debug for StepStateMachine<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StepStateMachine")
    }
}

impl<B> StepStateMachine<B> {
    pub fn new(db: B, transfers: TransferExecutionApi<B>, retry_policy: RetryPolicy) -> Self {
        Self { db, transfers, retry_policy }
    }

    pub fn transfers(&self) -> &TransferExecutionApi<B> {
        &self.transfers
    }
}

impl<B> StepStateMachine<B>
where B: LoanPaymentDatabase
{
    /// Starts a `Created` step: creates its first transfer (on the source account's network) and submits it.
    ///
    /// Steps that already have transfers, or have already started, are simply advanced.
    pub async fn start(&self, step_id: i64) -> Result<AdvanceResult, LoanPaymentError> {
        let Some(step) = self.db.fetch_step(step_id).await? else {
            return Ok(AdvanceResult::NotFound);
        };
        if step.state == StepState::Created && self.db.fetch_transfers_for_step(step_id).await?.is_empty() {
            let source = self
                .db
                .fetch_payment_account(step.from_account_id)
                .await?
                .ok_or(LoanPaymentDatabaseError::AccountNotFound(step.from_account_id))?;
            self.create_transfer(&step, 0, source.provider).await?;
        }
        self.advance(step_id).await
    }

    /// Runs the decision table for the step and carries out the action.
    pub async fn advance(&self, step_id: i64) -> Result<AdvanceResult, LoanPaymentError> {
        let Some(step) = self.db.fetch_step(step_id).await? else {
            return Ok(AdvanceResult::NotFound);
        };
        let payment = self
            .db
            .fetch_payment(step.payment_id)
            .await?
            .ok_or(LoanPaymentDatabaseError::PaymentNotFound(step.payment_id))?;
        let transfers = self.db.fetch_transfers_for_step(step_id).await?;
        let snapshot = TransferSnapshot::latest(&transfers);
        if is_settled(step.state, snapshot.as_ref()) {
            debug!("🪜️ Step #{step_id} is already {}. Duplicate delivery ignored.", step.state);
            return Ok(AdvanceResult::Unchanged);
        }
        let max_attempts = self.retry_policy.max_transfer_attempts(payment.kind);
        let action = decide(step.state, snapshot.as_ref(), max_attempts);
        trace!("🪜️ Step #{step_id} ({}) with transfer {snapshot:?}: {action:?}", step.state);
        match (action, snapshot) {
            (StepAction::AwaitTransfer, _) => {
                debug!("🪜️ Step #{step_id} has no transfer yet");
                Ok(AdvanceResult::Unchanged)
            },
            (StepAction::Poll, _) => Ok(AdvanceResult::Unchanged),
            (StepAction::BeginPending, Some(transfer)) => {
                let event = EventType::PaymentStepPending(StepStateEvent::new(step_id, step.state));
                let result = self.transition(&step, StepState::Pending, None, event).await?;
                if result.is_advanced() {
                    self.submit(step_id, transfer.id).await?;
                }
                Ok(result)
            },
            (StepAction::ExecuteUnsent, Some(transfer)) => {
                info!("🪜️ Submitting unsent attempt #{} for step #{step_id}", transfer.order);
                self.submit(step_id, transfer.id).await
            },
            (StepAction::Complete, _) => {
                let event = EventType::PaymentStepCompleted(StepStateEvent::new(step_id, step.state));
                self.transition(&step, StepState::Completed, None, event).await
            },
            (StepAction::Fail(reason), _) => {
                let event = EventType::PaymentStepFailed(StepStateEvent::new(step_id, step.state));
                self.transition(&step, StepState::Failed, Some(reason), event).await
            },
            (StepAction::Retry { next_order }, Some(latest)) => {
                info!(
                    "🪜️ Transfer #{} for step #{step_id} failed with a technical error. Retrying (attempt {} of \
                     {max_attempts}).",
                    latest.id,
                    next_order + 1
                );
                match self.create_transfer(&step, next_order, latest.provider).await? {
                    Some(transfer) => self.submit(step_id, transfer.id).await,
                    None => Ok(AdvanceResult::Unchanged),
                }
            },
            (StepAction::OutOfSync(reason), snapshot) => Err(self.out_of_sync(&step, snapshot, reason)),
            (StepAction::BeginPending | StepAction::ExecuteUnsent | StepAction::Retry { .. }, None) => {
                Err(self.out_of_sync(&step, None, "the action needs a transfer, but there is none"))
            },
        }
    }

    /// Hands the transfer to its network. If that goes wrong for any reason other than a state conflict, the attempt
    /// is failed with a technical error, and the step's retry budget decides what happens next.
    async fn submit(&self, step_id: i64, transfer_id: i64) -> Result<AdvanceResult, LoanPaymentError> {
        match self.transfers.execute_transfer(transfer_id).await {
            Err(e) if !e.is_out_of_sync() => {
                warn!("🪜️ Transfer #{transfer_id} for step #{step_id} could not be submitted. {e}");
                self.transfers.abandon_transfer(transfer_id, &e).await
            },
            result => result,
        }
    }

    /// Creates transfer attempt `order` for the step. Returns `None` if that attempt already exists.
    async fn create_transfer(
        &self,
        step: &LoanPaymentStep,
        order: i64,
        provider: PaymentProvider,
    ) -> Result<Option<Transfer>, LoanPaymentError> {
        match self.db.insert_transfer(NewTransfer::for_step(step, order, provider)).await? {
            InsertTransferResult::Inserted(t) => {
                debug!("🪜️ Transfer #{} (attempt {order}) created for step #{} on {provider}", t.id, step.id);
                Ok(Some(t))
            },
            InsertTransferResult::AlreadyExists(id) => {
                debug!("🪜️ Attempt {order} for step #{} already exists as transfer #{id}", step.id);
                Ok(None)
            },
        }
    }

    async fn transition(
        &self,
        step: &LoanPaymentStep,
        to: StepState,
        reason: Option<FailureReason>,
        event: EventType,
    ) -> Result<AdvanceResult, LoanPaymentError> {
        if self.db.transition_step(step.id, step.state, to, reason, &[event]).await?.is_some() {
            info!(
                "🪜️ Step #{} (order {}) of payment #{} moved {} → {to}",
                step.id,
                step.order,
                step.payment_id,
                step.state
            );
            return Ok(AdvanceResult::Advanced);
        }
        match self.db.fetch_step(step.id).await? {
            Some(s) if s.state == to => {
                debug!("🪜️ Step #{} is already {to}. Duplicate ignored.", step.id);
                Ok(AdvanceResult::Unchanged)
            },
            Some(s) => Err(self.out_of_sync(&s, None, "the step changed while it was being updated")),
            None => Ok(AdvanceResult::NotFound),
        }
    }

    fn out_of_sync(
        &self,
        step: &LoanPaymentStep,
        transfer: Option<TransferSnapshot>,
        reason: &str,
    ) -> LoanPaymentError {
        let err = OutOfSyncError::Step {
            step_id: step.id,
            step_state: step.state,
            transfer_id: transfer.map(|t| t.id),
            transfer_state: transfer.map(|t| t.state),
            reason: reason.to_string(),
        };
        error!("🪜️ {err}");
        err.into()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn snap(order: i64, state: TransferState) -> TransferSnapshot {
        TransferSnapshot { id: 1, order, state, provider: PaymentProvider::Mock, error_type: None, previous_failed: false }
    }

    fn failed(order: i64, error_type: TransferErrorType) -> TransferSnapshot {
        TransferSnapshot { error_type: Some(error_type), ..snap(order, TransferState::Failed) }
    }

    #[test]
    fn created_steps() {
        assert_eq!(decide(StepState::Created, None, 3), StepAction::AwaitTransfer);
        assert_eq!(decide(StepState::Created, Some(&snap(0, TransferState::Created)), 3), StepAction::BeginPending);
        assert!(matches!(decide(StepState::Created, Some(&snap(1, TransferState::Created)), 3), StepAction::OutOfSync(_)));
        for state in [TransferState::Pending, TransferState::Completed, TransferState::Failed] {
            assert!(matches!(decide(StepState::Created, Some(&snap(0, state)), 3), StepAction::OutOfSync(_)));
        }
    }

    #[test]
    fn pending_steps() {
        assert!(matches!(decide(StepState::Pending, None, 3), StepAction::OutOfSync(_)));
        assert_eq!(decide(StepState::Pending, Some(&snap(0, TransferState::Pending)), 3), StepAction::Poll);
        assert_eq!(decide(StepState::Pending, Some(&snap(2, TransferState::Completed)), 3), StepAction::Complete);
        let retry = TransferSnapshot { previous_failed: true, ..snap(1, TransferState::Created) };
        assert_eq!(decide(StepState::Pending, Some(&retry), 3), StepAction::ExecuteUnsent);
        assert!(matches!(decide(StepState::Pending, Some(&snap(1, TransferState::Created)), 3), StepAction::OutOfSync(_)));
        // The step went pending, but its first transfer never reached the network
        assert_eq!(decide(StepState::Pending, Some(&snap(0, TransferState::Created)), 3), StepAction::ExecuteUnsent);
    }

    #[test]
    fn failed_transfers() {
        let business = failed(0, TransferErrorType::Business);
        assert_eq!(decide(StepState::Pending, Some(&business), 3), StepAction::Fail(FailureReason::BusinessError));
        let technical = failed(0, TransferErrorType::Technical);
        assert_eq!(decide(StepState::Pending, Some(&technical), 3), StepAction::Retry { next_order: 1 });
        let technical = failed(1, TransferErrorType::Technical);
        assert_eq!(decide(StepState::Pending, Some(&technical), 3), StepAction::Retry { next_order: 2 });
        let technical = failed(2, TransferErrorType::Technical);
        assert_eq!(decide(StepState::Pending, Some(&technical), 3), StepAction::Fail(FailureReason::RetriesExhausted));
        // No budget for retries at all
        let technical = failed(0, TransferErrorType::Technical);
        assert_eq!(decide(StepState::Pending, Some(&technical), 1), StepAction::Fail(FailureReason::RetriesExhausted));
        // An unclassified failure is treated as technical
        assert_eq!(
            decide(StepState::Pending, Some(&snap(0, TransferState::Failed)), 3),
            StepAction::Retry { next_order: 1 }
        );
    }

    #[test]
    fn settled_steps() {
        assert!(is_settled(StepState::Completed, Some(&snap(1, TransferState::Completed))));
        assert!(is_settled(StepState::Failed, Some(&snap(0, TransferState::Failed))));
        assert!(!is_settled(StepState::Completed, Some(&snap(0, TransferState::Failed))));
        assert!(!is_settled(StepState::Pending, Some(&snap(0, TransferState::Completed))));
        assert!(!is_settled(StepState::Failed, None));
    }

    #[test]
    fn finished_steps_never_move() {
        for step in [StepState::Completed, StepState::Failed] {
            assert!(matches!(decide(step, None, 3), StepAction::OutOfSync(_)));
            for state in TransferState::ALL {
                assert!(matches!(decide(step, Some(&snap(0, *state)), 3), StepAction::OutOfSync(_)));
            }
        }
    }
}
