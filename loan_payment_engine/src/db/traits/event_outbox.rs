use std::future::Future;

use chrono::{DateTime, Utc};

use crate::{
    db::traits::LoanPaymentDatabaseError,
    db_types::{OutboxEvent, OutboxStatus},
    events::EventType,
};

/// The durable event queue.
///
/// Rows move `pending → in_flight → dispatched`. A handler failure puts the row back to `pending` (or to `failed`,
/// the dead-letter state, when it should not be retried).
pub trait EventOutbox {
    /// Appends events that are not tied to a state transition.
    fn enqueue_events(&self, events: &[EventType]) -> impl Future<Output = Result<(), LoanPaymentDatabaseError>> + Send;

    /// Atomically marks up to `limit` of the oldest pending events as in-flight, and returns them.
    fn claim_pending_events(
        &self,
        limit: i64,
    ) -> impl Future<Output = Result<Vec<OutboxEvent>, LoanPaymentDatabaseError>> + Send;

    fn mark_event_dispatched(&self, event_id: i64) -> impl Future<Output = Result<(), LoanPaymentDatabaseError>> + Send;

    /// Returns the event to the queue for another attempt, recording the error.
    fn release_event(
        &self,
        event_id: i64,
        error: &str,
    ) -> impl Future<Output = Result<(), LoanPaymentDatabaseError>> + Send;

    /// Parks the event in the dead-letter state, recording the error.
    fn dead_letter_event(
        &self,
        event_id: i64,
        error: &str,
    ) -> impl Future<Output = Result<(), LoanPaymentDatabaseError>> + Send;

    /// Returns events that were claimed before `claimed_before` but never acknowledged (e.g. a crashed worker) to the
    /// queue. Returns the number of events released.
    fn release_stalled_events(
        &self,
        claimed_before: DateTime<Utc>,
    ) -> impl Future<Output = Result<u64, LoanPaymentDatabaseError>> + Send;

    fn count_events(&self, status: OutboxStatus) -> impl Future<Output = Result<i64, LoanPaymentDatabaseError>> + Send;
}
