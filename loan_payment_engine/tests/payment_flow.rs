use chrono::Duration;
use loan_payment_engine::{
    db_types::{
        AccountRef,
        Cents,
        FailureReason,
        LoanState,
        LoanType,
        NewLoan,
        OutboxStatus,
        NewTransfer,
        PaymentKind,
        PaymentProvider,
        PaymentState,
        RouteQuery,
        StepState,
        TransferErrorType,
        TransferState,
    },
    providers::ProviderRegistry,
    test_utils::fixtures::TestSystem,
    AdvanceResult,
    EventOrchestrator,
    EventOutbox,
    LoanManagement,
    LoanPaymentError,
    PaymentManagement,
    ReconciliationApi,
    ReconciliationConfig,
    RetryPolicy,
    RouteResolver,
    TransferManagement,
    TransferTransition,
};

const PRINCIPAL: i64 = 50_000;

/// Moves an accepted loan into funding and returns the funding payment's id.
async fn start_funding(sys: &TestSystem, loan_id: i64) -> i64 {
    let result = sys.orchestrator.loans().evaluate(loan_id).await.expect("Error evaluating loan");
    assert_eq!(result, AdvanceResult::Advanced);
    sys.settle().await;
    assert_eq!(sys.loan(loan_id).await.state, LoanState::Funding);
    let payments = sys.payments(loan_id).await;
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].kind, PaymentKind::Funding);
    payments[0].id
}

#[tokio::test]
async fn funding_survives_a_technical_failure() {
    let sys = TestSystem::new().await;
    let fixture = sys.loan_fixture(PRINCIPAL, 0, 1, LoanState::Accepted).await;
    let loan_id = fixture.loan.id;
    let payment_id = start_funding(&sys, loan_id).await;

    let payment = sys.payment(payment_id).await;
    assert_eq!(payment.state, PaymentState::Pending);
    assert_eq!(payment.amount.value(), PRINCIPAL);
    let steps = sys.steps(payment_id).await;
    assert_eq!(steps.len(), 2);
    assert_eq!(steps[0].from_account_id, fixture.lender.id);
    assert_eq!(steps[0].to_account_id, fixture.clearing.id);
    assert_eq!(steps[1].from_account_id, fixture.clearing.id);
    assert_eq!(steps[1].to_account_id, fixture.biller.id);
    assert_eq!(steps[0].state, StepState::Pending);
    assert_eq!(steps[1].state, StepState::Created);

    // First hop: the network times out, then the retry goes through
    let first = sys.latest_transfer(steps[0].id).await;
    assert_eq!(first.state, TransferState::Pending);
    assert_eq!(sys.network_fails(&first, TransferErrorType::Technical, "timeout").await, AdvanceResult::Advanced);
    sys.settle().await;
    let attempts = sys.transfers(steps[0].id).await;
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0].state, TransferState::Failed);
    assert_eq!(attempts[0].error().map(|e| e.code), Some("timeout".to_string()));
    assert_eq!(attempts[1].order, 1);
    assert_eq!(attempts[1].state, TransferState::Pending);
    assert_eq!(sys.steps(payment_id).await[0].state, StepState::Pending);

    sys.network_completes(&attempts[1]).await;
    sys.settle().await;
    let steps = sys.steps(payment_id).await;
    assert_eq!(steps[0].state, StepState::Completed);
    assert_eq!(steps[1].state, StepState::Pending);
    assert_eq!(sys.loan(loan_id).await.state, LoanState::Funding);

    // Second hop
    let second = sys.latest_transfer(steps[1].id).await;
    assert_eq!(second.from_account_id, fixture.clearing.id);
    sys.network_completes(&second).await;
    sys.settle().await;

    let payment = sys.payment(payment_id).await;
    assert_eq!(payment.state, PaymentState::Completed);
    assert!(payment.completed_at.is_some());
    assert!(sys.steps(payment_id).await.iter().all(|s| s.state == StepState::Completed));
    assert_eq!(sys.loan(loan_id).await.state, LoanState::Funded);
    assert_eq!(sys.network.submitted().await.len(), 3);
    assert_eq!(sys.db.count_events(OutboxStatus::Failed).await.unwrap(), 0);
}

#[tokio::test]
async fn business_failure_returns_the_loan_to_accepted() {
    let sys = TestSystem::new().await;
    let fixture = sys.loan_fixture(PRINCIPAL, 0, 1, LoanState::Accepted).await;
    let loan_id = fixture.loan.id;
    let payment_id = start_funding(&sys, loan_id).await;

    let steps = sys.steps(payment_id).await;
    let transfer = sys.latest_transfer(steps[0].id).await;
    sys.network_fails(&transfer, TransferErrorType::Business, "insufficient_funds").await;
    sys.settle().await;

    // No retries for business errors
    assert_eq!(sys.transfers(steps[0].id).await.len(), 1);
    let steps = sys.steps(payment_id).await;
    assert_eq!(steps[0].state, StepState::Failed);
    assert_eq!(steps[0].failure_reason, Some(FailureReason::BusinessError));
    assert_eq!(steps[1].state, StepState::Created);
    assert!(sys.transfers(steps[1].id).await.is_empty());
    let payment = sys.payment(payment_id).await;
    assert_eq!(payment.state, PaymentState::Failed);
    assert_eq!(payment.failure_reason, Some(FailureReason::BusinessError));
    assert_eq!(sys.loan(loan_id).await.state, LoanState::Accepted);
}

#[tokio::test]
async fn exhausted_retries_pause_funding_until_resumed() {
    let sys = TestSystem::new().await;
    let fixture = sys.loan_fixture(PRINCIPAL, 0, 1, LoanState::Accepted).await;
    let loan_id = fixture.loan.id;
    let payment_id = start_funding(&sys, loan_id).await;
    let step_id = sys.steps(payment_id).await[0].id;

    for attempt in 0..3 {
        let transfer = sys.latest_transfer(step_id).await;
        assert_eq!(transfer.order, attempt);
        sys.network_fails(&transfer, TransferErrorType::Technical, "gateway_error").await;
        sys.settle().await;
    }
    assert_eq!(sys.transfers(step_id).await.len(), 3);
    let payment = sys.payment(payment_id).await;
    assert_eq!(payment.state, PaymentState::Failed);
    assert_eq!(payment.failure_reason, Some(FailureReason::RetriesExhausted));
    assert_eq!(sys.loan(loan_id).await.state, LoanState::FundingPaused);

    // Evaluating again changes nothing
    assert_eq!(sys.orchestrator.loans().evaluate(loan_id).await.unwrap(), AdvanceResult::Unchanged);

    assert_eq!(sys.orchestrator.loans().resume_loan(loan_id).await.unwrap(), AdvanceResult::Advanced);
    sys.settle().await;
    assert_eq!(sys.loan(loan_id).await.state, LoanState::Funding);
    let payments = sys.payments(loan_id).await;
    assert_eq!(payments.len(), 2);
    let fresh = payments.iter().find(|p| p.id != payment_id).unwrap();
    assert_eq!(fresh.state, PaymentState::Pending);
    // The failed step is left alone
    assert_eq!(sys.steps(payment_id).await[0].state, StepState::Failed);
    // A loan that is not paused cannot be resumed
    assert_eq!(sys.orchestrator.loans().resume_loan(loan_id).await.unwrap(), AdvanceResult::Unchanged);
}

#[tokio::test]
async fn zero_fee_completes_immediately() {
    let sys = TestSystem::new().await;
    let fixture = sys.loan_fixture(PRINCIPAL, 0, 1, LoanState::Accepted).await;
    let payment = sys
        .orchestrator
        .payments()
        .initiate_and_start(PaymentKind::Fee, fixture.loan.id)
        .await
        .expect("Error initiating fee")
        .expect("A fee payment should have been created");
    assert_eq!(payment.state, PaymentState::Completed);
    assert!(payment.amount.is_zero());
    assert!(payment.completed_at.is_some());
    assert!(sys.steps(payment.id).await.is_empty());
    let stats = sys.settle().await;
    assert_eq!(stats.dispatched, 1);
    assert!(sys.network.submitted().await.is_empty());
    // The fee is done, so there is nothing more to start
    let again = sys.orchestrator.payments().initiate(PaymentKind::Fee, fixture.loan.id).await.unwrap();
    assert!(again.is_none());
    assert_eq!(sys.loan(fixture.loan.id).await.state, LoanState::Accepted);
}

#[tokio::test]
async fn funding_covers_principal_and_fee() {
    let sys = TestSystem::new().await;
    let fixture = sys.loan_fixture(PRINCIPAL, 250, 1, LoanState::Accepted).await;
    let payment_id = start_funding(&sys, fixture.loan.id).await;
    assert_eq!(sys.payment(payment_id).await.amount.value(), PRINCIPAL + 250);
    let steps = sys.steps(payment_id).await;
    assert!(steps.iter().all(|s| s.amount.value() == PRINCIPAL + 250));
    assert_eq!(sys.latest_transfer(steps[0].id).await.amount.value(), PRINCIPAL + 250);
}

#[tokio::test]
async fn non_zero_fee_uses_the_fee_route() {
    let sys = TestSystem::new().await;
    let fixture = sys.loan_fixture(PRINCIPAL, 250, 1, LoanState::Accepted).await;
    let payment =
        sys.orchestrator.payments().initiate_and_start(PaymentKind::Fee, fixture.loan.id).await.unwrap().unwrap();
    assert_eq!(payment.state, PaymentState::Pending);
    assert_eq!(payment.amount.value(), 250);
    sys.settle().await;
    let steps = sys.steps(payment.id).await;
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].from_account_id, fixture.lender.id);
    assert_eq!(steps[0].to_account_id, fixture.biller.id);
    let transfer = sys.latest_transfer(steps[0].id).await;
    sys.network_completes(&transfer).await;
    sys.settle().await;
    assert_eq!(sys.payment(payment.id).await.state, PaymentState::Completed);
}

#[tokio::test]
async fn duplicate_webhooks_are_ignored() {
    let sys = TestSystem::new().await;
    let fixture = sys.loan_fixture(PRINCIPAL, 0, 1, LoanState::Accepted).await;
    let payment_id = start_funding(&sys, fixture.loan.id).await;
    let step_id = sys.steps(payment_id).await[0].id;
    let transfer = sys.latest_transfer(step_id).await;

    let (a, b) = tokio::join!(sys.network_completes(&transfer), sys.network_completes(&transfer));
    assert_eq!([a, b].iter().filter(|r| r.is_advanced()).count(), 1);
    sys.settle().await;
    assert_eq!(sys.steps(payment_id).await[0].state, StepState::Completed);

    // Late deliveries, after everything has settled
    assert_eq!(sys.network_completes(&transfer).await, AdvanceResult::Unchanged);
    assert_eq!(
        sys.network_fails(&transfer, TransferErrorType::Business, "closed_account").await,
        AdvanceResult::Unchanged
    );
    assert_eq!(sys.settle().await.total(), 0);
    // Re-delivering the step's own events is harmless too
    assert_eq!(sys.orchestrator.steps().advance(step_id).await.unwrap(), AdvanceResult::Unchanged);
    assert_eq!(sys.transfers(step_id).await.len(), 1);
    assert_eq!(sys.latest_transfer(step_id).await.state, TransferState::Completed);
}

#[tokio::test]
async fn webhooks_must_come_from_the_transfers_network() {
    let sys = TestSystem::new().await;
    let fixture = sys.loan_fixture(PRINCIPAL, 0, 1, LoanState::Accepted).await;
    let payment_id = start_funding(&sys, fixture.loan.id).await;
    let transfer = sys.latest_transfer(sys.steps(payment_id).await[0].id).await;
    let transfers = sys.orchestrator.transfers();
    let err = transfers
        .handle_provider_update(loan_payment_engine::db_types::PaymentProvider::Tabapay, transfer.id, "{}")
        .await
        .unwrap_err();
    assert!(matches!(err, LoanPaymentError::InvalidEvent(_)));
    let err = transfers.handle_provider_update(transfer.provider, transfer.id, "garbage").await.unwrap_err();
    assert!(matches!(err, LoanPaymentError::InvalidEvent(_)));
    let result = transfers.handle_provider_update(transfer.provider, 9999, "{}").await.unwrap();
    assert_eq!(result, AdvanceResult::NotFound);
}

#[tokio::test]
async fn routes_resolve_deterministically() {
    let sys = TestSystem::new().await;
    let fixture = sys.loan_fixture(PRINCIPAL, 0, 1, LoanState::Accepted).await;
    let competitor = sys
        .direct_route("another lender to biller", fixture.lender.shape(), fixture.biller.shape(), &[PaymentKind::Funding])
        .await;
    assert!(competitor.id > fixture.funding_route.id);

    let resolver = RouteResolver::new(sys.db.clone());
    let query = RouteQuery {
        from: fixture.lender.shape(),
        to: fixture.biller.shape(),
        loan_stage: PaymentKind::Funding,
        loan_type: fixture.loan.loan_type,
    };
    for _ in 0..5 {
        let route = resolver.resolve_route(&query).await.expect("Route should resolve");
        assert_eq!(route.id, fixture.funding_route.id);
        assert_eq!(route.steps.len(), 2);
        assert!(route.steps.windows(2).all(|w| w[0].order < w[1].order));
        let hops = resolver.resolve_route_steps(&query).await.expect("Route should resolve");
        assert_eq!(hops, vec![
            (AccountRef::PaymentSource, AccountRef::Account(fixture.clearing.id)),
            (AccountRef::Account(fixture.clearing.id), AccountRef::PaymentDestination),
        ]);
    }

    let query = RouteQuery { loan_stage: PaymentKind::Refund, ..query };
    let err = resolver.resolve_route(&query).await.unwrap_err();
    assert!(matches!(err, LoanPaymentError::NoRouteFound(_)));
    let err = resolver.resolve_route_steps(&query).await.unwrap_err();
    assert!(matches!(err, LoanPaymentError::NoRouteFound(_)));
}

#[tokio::test]
async fn repayments_step_through_installments() {
    let sys = TestSystem::new().await;
    let fixture = sys.loan_fixture(10_001, 0, 2, LoanState::Disbursed).await;
    let loan_id = fixture.loan.id;
    assert_eq!(sys.orchestrator.loans().advance_loan(loan_id).await.unwrap(), AdvanceResult::Advanced);
    sys.settle().await;
    assert_eq!(sys.loan(loan_id).await.state, LoanState::Repaying);

    for (number, amount) in [(1, 5_000), (2, 5_001)] {
        let payments = sys.payments(loan_id).await;
        let payment = payments.iter().find(|p| p.payment_number == Some(number)).expect("Missing installment");
        assert_eq!(payment.kind, PaymentKind::Repayment);
        assert_eq!(payment.amount.value(), amount);
        assert_eq!(payment.from_account_id, fixture.borrower.id);
        assert_eq!(payment.to_account_id, fixture.lender.id);
        let step = &sys.steps(payment.id).await[0];
        let transfer = sys.latest_transfer(step.id).await;
        sys.network_completes(&transfer).await;
        sys.settle().await;
        assert_eq!(sys.payment(payment.id).await.state, PaymentState::Completed);
    }
    assert_eq!(sys.payments(loan_id).await.len(), 2);
    assert_eq!(sys.loan(loan_id).await.state, LoanState::Repaid);

    assert_eq!(sys.orchestrator.loans().advance_loan(loan_id).await.unwrap(), AdvanceResult::Advanced);
    sys.settle().await;
    assert_eq!(sys.loan(loan_id).await.state, LoanState::Closed);
    assert_eq!(sys.orchestrator.loans().advance_loan(loan_id).await.unwrap(), AdvanceResult::Unchanged);
}

#[tokio::test]
async fn failed_repayment_pauses_the_loan() {
    let sys = TestSystem::new().await;
    let fixture = sys.loan_fixture(10_000, 0, 4, LoanState::Disbursed).await;
    let loan_id = fixture.loan.id;
    sys.orchestrator.loans().advance_loan(loan_id).await.unwrap();
    sys.settle().await;
    let payment = sys.payments(loan_id).await.pop().unwrap();
    let transfer = sys.latest_transfer(sys.steps(payment.id).await[0].id).await;
    sys.network_fails(&transfer, TransferErrorType::Business, "card_declined").await;
    sys.settle().await;
    assert_eq!(sys.loan(loan_id).await.state, LoanState::RepaymentPaused);
}

#[tokio::test]
async fn connecting_accounts_starts_funding() {
    let sys = TestSystem::new().await;
    let fixture = sys.loan_fixture(PRINCIPAL, 0, 1, LoanState::Accepted).await;
    let loan = NewLoan::new(Cents::from(PRINCIPAL), LoanType::DirectBillPay)
        .with_state(LoanState::Accepted)
        .with_borrower(fixture.borrower.id);
    let loan = sys.db.insert_loan(loan).await.unwrap();
    // Without a lender and biller, there is nothing to fund
    assert_eq!(sys.orchestrator.loans().advance_loan(loan.id).await.unwrap(), AdvanceResult::Unchanged);
    assert!(sys.orchestrator.payments().initiate(PaymentKind::Funding, loan.id).await.unwrap().is_none());

    let loans = sys.orchestrator.loans();
    let result = loans.connect_accounts(loan.id, None, Some(fixture.lender.id), None).await.unwrap();
    assert_eq!(result, AdvanceResult::Unchanged);
    let result = loans.connect_accounts(loan.id, None, None, Some(fixture.biller.id)).await.unwrap();
    assert_eq!(result, AdvanceResult::Advanced);
    sys.settle().await;
    let loan = sys.loan(loan.id).await;
    assert_eq!(loan.state, LoanState::Funding);
    assert_eq!(loan.borrower_account_id, Some(fixture.borrower.id));
    assert_eq!(sys.payments(loan.id).await.len(), 1);
    assert_eq!(loans.connect_accounts(404, None, None, None).await.unwrap(), AdvanceResult::NotFound);
}

#[tokio::test]
async fn sweep_redrives_steps_that_missed_their_event() {
    let sys = TestSystem::new().await;
    let fixture = sys.loan_fixture(PRINCIPAL, 0, 1, LoanState::Accepted).await;
    let payment_id = start_funding(&sys, fixture.loan.id).await;
    let step_id = sys.steps(payment_id).await[0].id;
    let transfer = sys.latest_transfer(step_id).await;

    // The network's confirmation is recorded, but the event that should follow it is lost
    let transition = TransferTransition::new(transfer.id, TransferState::Pending, TransferState::Completed);
    sys.db.transition_transfer(transition, &[]).await.unwrap().expect("Transfer should have moved");
    assert_eq!(sys.settle().await.total(), 0);
    assert_eq!(sys.steps(payment_id).await[0].state, StepState::Pending);

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    let config = ReconciliationConfig { redrive_after: Duration::zero(), ..Default::default() };
    let sweep = ReconciliationApi::new(sys.db.clone(), sys.orchestrator.clone(), Default::default(), config);
    let report = sweep.sweep().await.expect("Error running sweep");
    assert_eq!(report.redriven, vec![step_id]);
    assert!(report.stale.is_empty());
    assert!(report.out_of_sync.is_empty());
    sys.settle().await;
    let steps = sys.steps(payment_id).await;
    assert_eq!(steps[0].state, StepState::Completed);
    assert_eq!(steps[1].state, StepState::Pending);

    // Running it again finds nothing to do
    let report = sweep.sweep().await.unwrap();
    assert!(report.redriven.is_empty());
}

#[tokio::test]
async fn sweep_reports_stale_steps_without_failing_them() {
    let sys = TestSystem::new().await;
    let fixture = sys.loan_fixture(PRINCIPAL, 0, 1, LoanState::Accepted).await;
    let payment_id = start_funding(&sys, fixture.loan.id).await;
    let step_id = sys.steps(payment_id).await[0].id;

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    let config = ReconciliationConfig { stale_after: Duration::zero(), ..Default::default() };
    let sweep = ReconciliationApi::new(sys.db.clone(), sys.orchestrator.clone(), Default::default(), config);
    let report = sweep.sweep().await.unwrap();
    assert_eq!(report.stale, vec![step_id]);
    assert!(report.redriven.is_empty());
    assert_eq!(sys.steps(payment_id).await[0].state, StepState::Pending);
    assert_eq!(sys.latest_transfer(step_id).await.state, TransferState::Pending);
    assert_eq!(sys.payment(payment_id).await.state, PaymentState::Pending);
}

#[tokio::test]
async fn concurrent_initiation_creates_one_payment() {
    let sys = TestSystem::new().await;
    let fixture = sys.loan_fixture(PRINCIPAL, 0, 1, LoanState::Funding).await;
    let loan_id = fixture.loan.id;
    let payments = sys.orchestrator.payments();
    let (a, b) =
        tokio::join!(payments.initiate(PaymentKind::Funding, loan_id), payments.initiate(PaymentKind::Funding, loan_id));
    let a = a.expect("Error initiating payment");
    let b = b.expect("Error initiating payment");
    assert_eq!(a.is_some() as u8 + b.is_some() as u8, 1);
    let stored = sys.payments(loan_id).await;
    assert_eq!(stored.len(), 1);
    assert_eq!(sys.steps(stored[0].id).await.len(), 2);
}

#[tokio::test]
async fn a_failed_payment_does_not_block_the_next_attempt() {
    let sys = TestSystem::new().await;
    let fixture = sys.loan_fixture(PRINCIPAL, 0, 1, LoanState::Funding).await;
    let loan_id = fixture.loan.id;
    let first = sys.orchestrator.payments().initiate(PaymentKind::Funding, loan_id).await.unwrap().unwrap();
    let failed = sys
        .db
        .transition_payment(first.id, first.state, PaymentState::Failed, Some(FailureReason::BusinessError), &[])
        .await
        .unwrap();
    assert!(failed.is_some());
    let second = sys.orchestrator.payments().initiate(PaymentKind::Funding, loan_id).await.unwrap();
    assert!(second.is_some_and(|p| p.id != first.id));
    assert_eq!(sys.payments(loan_id).await.len(), 2);
}

#[tokio::test]
async fn unsubmittable_transfer_is_retried() {
    let sys = TestSystem::new().await;
    let fixture = sys.loan_fixture(PRINCIPAL, 0, 1, LoanState::Funding).await;
    // No networks are configured here, so the first attempt cannot be handed to anyone
    let offline = EventOrchestrator::new(sys.db.clone(), ProviderRegistry::new(), RetryPolicy::default());
    let payment = offline
        .payments()
        .initiate(PaymentKind::Funding, fixture.loan.id)
        .await
        .expect("Error initiating payment")
        .expect("Funding should be ready");
    let step = sys.steps(payment.id).await.remove(0);
    let result = offline.steps().start(step.id).await.expect("A submission problem is not an error");
    assert_eq!(result, AdvanceResult::Advanced);
    assert_eq!(sys.steps(payment.id).await[0].state, StepState::Pending);
    let attempt = sys.latest_transfer(step.id).await;
    assert_eq!(attempt.order, 0);
    assert_eq!(attempt.state, TransferState::Failed);
    assert_eq!(attempt.error_type, Some(TransferErrorType::Technical));
    assert_eq!(attempt.error_code.as_deref(), Some("submission_failed"));

    sys.settle().await;
    let attempts = sys.transfers(step.id).await;
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[1].order, 1);
    assert_eq!(attempts[1].state, TransferState::Pending);
    assert_eq!(sys.steps(payment.id).await[0].state, StepState::Pending);
}

#[tokio::test]
async fn interrupted_submission_is_resumed() {
    let sys = TestSystem::new().await;
    let fixture = sys.loan_fixture(PRINCIPAL, 0, 1, LoanState::Funding).await;
    let payment = sys.orchestrator.payments().initiate(PaymentKind::Funding, fixture.loan.id).await.unwrap().unwrap();
    let step = sys.steps(payment.id).await.remove(0);
    // The step went pending and its first attempt was recorded, but the attempt never reached the network
    sys.db.insert_transfer(NewTransfer::for_step(&step, 0, PaymentProvider::Checkbook)).await.unwrap();
    let moved = sys.db.transition_step(step.id, StepState::Created, StepState::Pending, None, &[]).await.unwrap();
    assert!(moved.is_some());
    assert_eq!(sys.latest_transfer(step.id).await.state, TransferState::Created);

    let result = sys.orchestrator.steps().advance(step.id).await.expect("Step should not be out of sync");
    assert_eq!(result, AdvanceResult::Advanced);
    let attempts = sys.transfers(step.id).await;
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].state, TransferState::Pending);
    assert!(attempts[0].provider_reference.is_some());
}
