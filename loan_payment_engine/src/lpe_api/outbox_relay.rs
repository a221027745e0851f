//! Delivers outbox events to the orchestrator.
//!
//! Events are claimed in batches and handled concurrently. A row is only marked dispatched once its handler has
//! succeeded, so every event is handled at least once. Handled events are then fanned out to the registered hooks.
//!
//! Failures are sorted three ways:
//! * out-of-sync errors are dead-lettered at once and raised with the operators,
//! * transient errors put the event back in the queue, until it runs out of attempts,
//! * anything else is dead-lettered and raised with the operators.
use std::{fmt::Debug, sync::Arc};

use futures_util::future::join_all;
use log::*;

use crate::{
    db::traits::LoanPaymentDatabase,
    db_types::OutboxEvent,
    events::{EventProducers, EventType, OutOfSyncEvent},
    lpe_api::{errors::LoanPaymentError, orchestrator::EventOrchestrator},
};

pub const DEFAULT_RELAY_BATCH_SIZE: i64 = 25;
pub const DEFAULT_MAX_DELIVERY_ATTEMPTS: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Dispatched,
    Retried,
    DeadLettered,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub dispatched: usize,
    pub retried: usize,
    pub dead_lettered: usize,
}

impl RelayStats {
    pub fn total(&self) -> usize {
        self.dispatched + self.retried + self.dead_lettered
    }

    fn record(&mut self, delivery: Delivery) {
        match delivery {
            Delivery::Dispatched => self.dispatched += 1,
            Delivery::Retried => self.retried += 1,
            Delivery::DeadLettered => self.dead_lettered += 1,
        }
    }

    fn merge(&mut self, other: RelayStats) {
        self.dispatched += other.dispatched;
        self.retried += other.retried;
        self.dead_lettered += other.dead_lettered;
    }
}

pub struct OutboxRelay<B> {
    db: B,
    orchestrator: Arc<EventOrchestrator<B>>,
    producers: EventProducers,
    batch_size: i64,
    max_attempts: i64,
}

impl<B> Debug for OutboxRelay<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OutboxRelay(batch_size: {}, max_attempts: {})", self.batch_size, self.max_attempts)
    }
}

impl<B> OutboxRelay<B> {
    pub fn new(db: B, orchestrator: Arc<EventOrchestrator<B>>, producers: EventProducers) -> Self {
        Self {
            db,
            orchestrator,
            producers,
            batch_size: DEFAULT_RELAY_BATCH_SIZE,
            max_attempts: DEFAULT_MAX_DELIVERY_ATTEMPTS,
        }
    }

    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: i64) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
}

impl<B> OutboxRelay<B>
where B: LoanPaymentDatabase
{
    /// Claims and delivers one batch of events.
    pub async fn run_once(&self) -> Result<RelayStats, LoanPaymentError> {
        let events = self.db.claim_pending_events(self.batch_size).await?;
        let mut stats = RelayStats::default();
        if events.is_empty() {
            return Ok(stats);
        }
        trace!("📬️ Relaying {} outbox events", events.len());
        let outcomes = join_all(events.iter().map(|e| self.deliver(e))).await;
        for outcome in outcomes {
            stats.record(outcome?);
        }
        debug!("📬️ Outbox batch done: {stats:?}");
        Ok(stats)
    }

    /// Keeps relaying until the outbox is empty, or `max_rounds` batches have been delivered.
    pub async fn run_until_idle(&self, max_rounds: usize) -> Result<RelayStats, LoanPaymentError> {
        let mut total = RelayStats::default();
        for _ in 0..max_rounds {
            let stats = self.run_once().await?;
            if stats.total() == 0 {
                break;
            }
            total.merge(stats);
        }
        Ok(total)
    }

    async fn deliver(&self, row: &OutboxEvent) -> Result<Delivery, LoanPaymentError> {
        let event = match serde_json::from_str::<EventType>(&row.payload) {
            Ok(e) => e,
            Err(e) => {
                let err = LoanPaymentError::InvalidEvent(format!("Outbox event #{} is unreadable. {e}", row.id));
                return self.dead_letter(row, &err).await;
            },
        };
        match self.orchestrator.handle(&event).await {
            Ok(result) => {
                trace!("📬️ Outbox event #{} ({}) handled: {result:?}", row.id, row.event_type);
                self.db.mark_event_dispatched(row.id).await?;
                self.producers.publish_event(event).await;
                Ok(Delivery::Dispatched)
            },
            Err(e) if e.is_retryable() && row.attempts + 1 < self.max_attempts => {
                warn!("📬️ Outbox event #{} ({}) failed, will retry. {e}", row.id, row.event_type);
                self.db.release_event(row.id, &e.to_string()).await?;
                Ok(Delivery::Retried)
            },
            Err(e) => self.dead_letter(row, &e).await,
        }
    }

    async fn dead_letter(&self, row: &OutboxEvent, err: &LoanPaymentError) -> Result<Delivery, LoanPaymentError> {
        error!("📬️ Outbox event #{} ({}) could not be handled and needs attention. {err}", row.id, row.event_type);
        self.db.dead_letter_event(row.id, &err.to_string()).await?;
        self.producers.publish_out_of_sync(OutOfSyncEvent::new(Some(row.id), err.to_string())).await;
        Ok(Delivery::DeadLettered)
    }
}
