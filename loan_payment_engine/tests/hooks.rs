use std::{
    sync::{
        atomic::{AtomicI32, Ordering},
        Arc,
    },
    time::Duration,
};

use futures_util::FutureExt;
use log::*;
use loan_payment_engine::{
    db_types::{LoanState, OutboxStatus, StepState, TransferErrorType},
    events::{EventHandlers, EventHooks, EventType},
    test_utils::fixtures::TestSystem,
    EventOutbox,
    PaymentManagement,
    RetryPolicy,
};
use tokio::runtime::Runtime;

#[derive(Default, Clone)]
struct HookCalled {
    called: Arc<AtomicI32>,
}

impl HookCalled {
    pub fn called(&self) {
        let _ = self.called.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> i32 {
        self.called.load(Ordering::Relaxed)
    }
}

#[test]
fn on_loan_state_changed() {
    dotenvy::from_filename(".env.test").ok();
    let _ = env_logger::try_init();
    let rt = Runtime::new().unwrap();
    let changes = HookCalled::default();
    let all = HookCalled::default();
    let (changes_copy, all_copy) = (changes.clone(), all.clone());
    rt.block_on(async move {
        let mut hooks = EventHooks::default();
        hooks.on_event(move |event| {
            info!("🪝️ {event:?}");
            all_copy.called();
            if matches!(event, EventType::LoanStateChanged(_)) {
                changes_copy.called();
            }
            async {}.boxed()
        });
        let handlers = EventHandlers::new(64, hooks);
        let producers = handlers.producers();
        handlers.start_handlers();
        let sys = TestSystem::with_producers(producers, RetryPolicy::default()).await;
        let fixture = sys.loan_fixture(10_000, 0, 1, LoanState::Accepted).await;
        sys.orchestrator.loans().evaluate(fixture.loan.id).await.expect("Error evaluating loan");
        let stats = sys.settle().await;
        assert!(stats.dispatched > 1);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(all.count() as usize, stats.dispatched);
    });
    assert_eq!(changes.count(), 1);
    info!("🪝️ test complete");
}

#[test]
fn on_out_of_sync() {
    dotenvy::from_filename(".env.test").ok();
    let _ = env_logger::try_init();
    let rt = Runtime::new().unwrap();
    let alerts = HookCalled::default();
    let alerts_copy = alerts.clone();
    rt.block_on(async move {
        let mut hooks = EventHooks::default();
        hooks.on_out_of_sync(move |event| {
            warn!("🪝️ {}", event.message);
            assert!(event.outbox_event_id.is_some());
            alerts_copy.called();
            async {}.boxed()
        });
        let handlers = EventHandlers::new(8, hooks);
        let producers = handlers.producers();
        handlers.start_handlers();
        let sys = TestSystem::with_producers(producers, RetryPolicy::default()).await;
        let fixture = sys.loan_fixture(10_000, 0, 1, LoanState::Accepted).await;
        sys.orchestrator.loans().evaluate(fixture.loan.id).await.expect("Error evaluating loan");
        sys.settle().await;
        let payment = sys.payments(fixture.loan.id).await.pop().expect("Funding payment was not created");
        let step = sys.steps(payment.id).await.remove(0);
        assert_eq!(step.state, StepState::Pending);

        // Someone resets the step behind the engine's back
        let reset = sys.db.transition_step(step.id, StepState::Pending, StepState::Created, None, &[]).await;
        assert!(reset.expect("Error resetting step").is_some());
        let transfer = sys.latest_transfer(step.id).await;
        sys.network_fails(&transfer, TransferErrorType::Technical, "timeout").await;
        let stats = sys.settle().await;
        assert_eq!(stats.dead_lettered, 1);
        assert_eq!(sys.db.count_events(OutboxStatus::Failed).await.unwrap(), 1);
        // Nothing was retried, and the step was not failed on the engine's own account
        assert_eq!(sys.transfers(step.id).await.len(), 1);
        assert_eq!(sys.steps(payment.id).await[0].state, StepState::Created);
        tokio::time::sleep(Duration::from_millis(100)).await;
    });
    assert_eq!(alerts.count(), 1);
    info!("🪝️ test complete");
}
