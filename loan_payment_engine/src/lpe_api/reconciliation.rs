//! The reconciliation sweep.
//!
//! Events can be lost between a network update and the step machine, or a worker can die holding a batch of outbox
//! events. The sweep looks for the symptoms and either re-drives the step or raises it with the operators. It never
//! fails a step on its own account.
use std::{fmt::Debug, sync::Arc};

use chrono::{Duration, Utc};
use log::*;

use crate::{
    db::traits::LoanPaymentDatabase,
    db_types::{StepState, TransferState},
    events::{EventProducers, OutOfSyncEvent, StaleStepEvent},
    lpe_api::{errors::LoanPaymentError, orchestrator::EventOrchestrator},
};

#[derive(Debug, Clone, Copy)]
pub struct ReconciliationConfig {
    /// How long a finished transfer may wait for its step to catch up before the step is re-driven
    pub redrive_after: Duration,
    /// How long a transfer may stay pending before its step is reported as stale. Also the claim timeout for outbox
    /// events.
    pub stale_after: Duration,
    pub batch_size: i64,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self { redrive_after: Duration::minutes(1), stale_after: Duration::minutes(60), batch_size: 500 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationReport {
    /// Steps that were moved on by the sweep
    pub redriven: Vec<i64>,
    /// Steps whose transfer has been pending for too long
    pub stale: Vec<i64>,
    /// Steps that tripped an out-of-sync error
    pub out_of_sync: Vec<i64>,
    /// Outbox events put back in the queue
    pub released_events: u64,
}

pub struct ReconciliationApi<B> {
    db: B,
    orchestrator: Arc<EventOrchestrator<B>>,
    producers: EventProducers,
    config: ReconciliationConfig,
}

impl<B> Debug for ReconciliationApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ReconciliationApi({:?})", self.config)
    }
}

impl<B> ReconciliationApi<B> {
    pub fn new(
        db: B,
        orchestrator: Arc<EventOrchestrator<B>>,
        producers: EventProducers,
        config: ReconciliationConfig,
    ) -> Self {
        Self { db, orchestrator, producers, config }
    }
}

impl<B> ReconciliationApi<B>
where B: LoanPaymentDatabase
{
    pub async fn sweep(&self) -> Result<ReconciliationReport, LoanPaymentError> {
        let now = Utc::now();
        let mut report = ReconciliationReport {
            released_events: self.db.release_stalled_events(now - self.config.stale_after).await?,
            ..Default::default()
        };
        if report.released_events > 0 {
            warn!("🕰️ {} stalled outbox events were put back in the queue", report.released_events);
        }
        let steps = self.db.fetch_steps_in_state(StepState::Pending, self.config.batch_size).await?;
        for step in steps {
            let transfers = self.db.fetch_transfers_for_step(step.id).await?;
            let latest = transfers.last();
            let needs_redrive = match latest {
                // A pending step without a transfer is broken. Re-driving it will say so.
                None => true,
                Some(t) => match t.state {
                    TransferState::Created | TransferState::Completed | TransferState::Failed => {
                        t.updated_at < now - self.config.redrive_after
                    },
                    TransferState::Pending => {
                        if t.updated_at < now - self.config.stale_after {
                            warn!(
                                "🕰️ Step #{} has been waiting on transfer #{} since {}",
                                step.id, t.id, t.updated_at
                            );
                            report.stale.push(step.id);
                            let event = StaleStepEvent {
                                step_id: step.id,
                                payment_id: step.payment_id,
                                transfer_id: Some(t.id),
                                transfer_state: Some(t.state),
                                pending_since: t.updated_at,
                            };
                            self.producers.publish_stale_step(event).await;
                        }
                        false
                    },
                },
            };
            if !needs_redrive {
                continue;
            }
            match self.orchestrator.steps().advance(step.id).await {
                Ok(result) if result.is_advanced() => {
                    info!("🕰️ Step #{} was re-driven by the reconciliation sweep", step.id);
                    report.redriven.push(step.id);
                },
                Ok(_) => {},
                Err(e) if e.is_out_of_sync() => {
                    report.out_of_sync.push(step.id);
                    self.producers.publish_out_of_sync(OutOfSyncEvent::new(None, e.to_string())).await;
                },
                Err(e) => warn!("🕰️ Could not re-drive step #{}. {e}", step.id),
            }
        }
        debug!("🕰️ Reconciliation sweep complete: {report:?}");
        Ok(report)
    }
}
