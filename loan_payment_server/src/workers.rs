//! Background workers. Neither of these ever returns, so do not await the JoinHandles they give back.
use std::time::Duration;

use log::*;
use loan_payment_engine::{LoanPaymentDatabase, OutboxRelay, ReconciliationApi, ReconciliationReport};
use tokio::task::JoinHandle;

/// Starts the outbox relay. Each tick it drains the outbox, then sleeps until the next poll.
pub fn start_outbox_relay<B: LoanPaymentDatabase>(relay: OutboxRelay<B>, poll_interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(poll_interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!("🕰️ Outbox relay started. Polling every {}ms", poll_interval.as_millis());
        loop {
            timer.tick().await;
            match relay.run_until_idle(100).await {
                Ok(stats) if stats.total() > 0 => {
                    debug!("🕰️ Outbox relay delivered {} events: {stats:?}", stats.total())
                },
                Ok(_) => trace!("🕰️ Outbox is empty"),
                Err(e) => error!("🕰️ Error relaying outbox events: {e}"),
            }
        }
    })
}

/// Starts the reconciliation worker.
pub fn start_reconciliation_worker<B: LoanPaymentDatabase>(
    api: ReconciliationApi<B>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        info!("🕰️ Reconciliation worker started");
        loop {
            timer.tick().await;
            debug!("🕰️ Running reconciliation sweep");
            match api.sweep().await {
                Ok(report) => log_report(&report),
                Err(e) => error!("🕰️ Error running reconciliation sweep: {e}"),
            }
        }
    })
}

fn log_report(report: &ReconciliationReport) {
    if report.redriven.is_empty() && report.stale.is_empty() && report.out_of_sync.is_empty() {
        debug!("🕰️ Reconciliation found nothing to do");
        return;
    }
    info!(
        "🕰️ Reconciliation re-drove {} steps, found {} stale steps and {} out of sync",
        report.redriven.len(),
        report.stale.len(),
        report.out_of_sync.len()
    );
    debug!("🕰️ Re-driven steps: {}", id_list(&report.redriven));
    debug!("🕰️ Stale steps: {}", id_list(&report.stale));
    if !report.out_of_sync.is_empty() {
        error!("🕰️ Steps out of sync: {}", id_list(&report.out_of_sync));
    }
}

fn id_list(ids: &[i64]) -> String {
    ids.iter().map(|id| format!("#{id}")).collect::<Vec<String>>().join(", ")
}
