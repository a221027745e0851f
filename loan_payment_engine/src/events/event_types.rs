//! The events the orchestration core raises.
//!
//! Every event carries the state its subject was in *before* the transition it announces, so a consumer can compare
//! against the current persisted state and spot stale or duplicate deliveries.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db_types::{LoanState, PaymentProvider, PaymentState, StepState, TransferState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepStateEvent {
    pub step_id: i64,
    pub original_step_state: StepState,
}

impl StepStateEvent {
    pub fn new(step_id: i64, original_step_state: StepState) -> Self {
        Self { step_id, original_step_state }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSteppedEvent {
    pub payment_id: i64,
    pub original_payment_state: PaymentState,
}

impl PaymentSteppedEvent {
    pub fn new(payment_id: i64, original_payment_state: PaymentState) -> Self {
        Self { payment_id, original_payment_state }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentStateEvent {
    pub loan_id: i64,
    pub payment_id: i64,
    pub original_payment_state: PaymentState,
}

impl PaymentStateEvent {
    pub fn new(loan_id: i64, payment_id: i64, original_payment_state: PaymentState) -> Self {
        Self { loan_id, payment_id, original_payment_state }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanStateChangedEvent {
    pub loan_id: i64,
    pub old_state: LoanState,
    pub new_state: LoanState,
}

impl LoanStateChangedEvent {
    pub fn new(loan_id: i64, old_state: LoanState, new_state: LoanState) -> Self {
        Self { loan_id, old_state, new_state }
    }
}

/// Raised when a loan makes progress inside a state without leaving it, e.g. one of several repayments completing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanStateSteppedEvent {
    pub loan_id: i64,
    pub state: LoanState,
}

impl LoanStateSteppedEvent {
    pub fn new(loan_id: i64, state: LoanState) -> Self {
        Self { loan_id, state }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferEvent {
    pub transfer_id: i64,
    pub provider: PaymentProvider,
}

impl TransferEvent {
    pub fn new(transfer_id: i64, provider: PaymentProvider) -> Self {
        Self { transfer_id, provider }
    }
}

/// The durable events. These go through the outbox, so they are serializable and must stay backwards compatible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum EventType {
    PaymentStepPending(StepStateEvent),
    PaymentStepCompleted(StepStateEvent),
    PaymentStepFailed(StepStateEvent),
    PaymentStepped(PaymentSteppedEvent),
    PaymentPending(PaymentStateEvent),
    PaymentCompleted(PaymentStateEvent),
    PaymentFailed(PaymentStateEvent),
    LoanStateChanged(LoanStateChangedEvent),
    LoanStateStepped(LoanStateSteppedEvent),
    TransferExecuted(TransferEvent),
    TransferCompleted(TransferEvent),
    TransferFailed(TransferEvent),
}

impl EventType {
    pub fn name(&self) -> &'static str {
        match self {
            EventType::PaymentStepPending(_) => "payment_step_pending",
            EventType::PaymentStepCompleted(_) => "payment_step_completed",
            EventType::PaymentStepFailed(_) => "payment_step_failed",
            EventType::PaymentStepped(_) => "payment_stepped",
            EventType::PaymentPending(_) => "payment_pending",
            EventType::PaymentCompleted(_) => "payment_completed",
            EventType::PaymentFailed(_) => "payment_failed",
            EventType::LoanStateChanged(_) => "loan_state_changed",
            EventType::LoanStateStepped(_) => "loan_state_stepped",
            EventType::TransferExecuted(_) => "transfer_executed",
            EventType::TransferCompleted(_) => "transfer_completed",
            EventType::TransferFailed(_) => "transfer_failed",
        }
    }
}

//--------------------------------------   Operator alerts   ---------------------------------------------------------
// These are not part of the durable flow. They are published straight to hooks so that someone gets paged.

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutOfSyncEvent {
    /// The outbox event whose handling tripped over the inconsistency, if any
    pub outbox_event_id: Option<i64>,
    pub message: String,
}

impl OutOfSyncEvent {
    pub fn new(outbox_event_id: Option<i64>, message: String) -> Self {
        Self { outbox_event_id, message }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaleStepEvent {
    pub step_id: i64,
    pub payment_id: i64,
    pub transfer_id: Option<i64>,
    pub transfer_state: Option<TransferState>,
    pub pending_since: DateTime<Utc>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn events_serialize_with_tag() {
        let event = EventType::PaymentStepCompleted(StepStateEvent::new(12, StepState::Pending));
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"event":"payment_step_completed","data":{"step_id":12,"original_step_state":"pending"}}"#);
        let back: EventType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
        assert_eq!(back.name(), "payment_step_completed");
    }
}
