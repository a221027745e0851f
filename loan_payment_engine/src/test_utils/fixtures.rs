//! A fully wired engine on a throwaway database, with the mock network on every provider.
use std::sync::Arc;

use crate::{
    db::traits::{LoanManagement, PaymentManagement, RouteManagement, TransferManagement},
    db_types::{
        AccountOwnership,
        AccountShape,
        AccountType,
        Cents,
        Loan,
        LoanPayment,
        LoanPaymentStep,
        LoanState,
        LoanType,
        NewLoan,
        NewPaymentAccount,
        NewPaymentsRoute,
        PaymentAccount,
        PaymentKind,
        PaymentProvider,
        PaymentsRoute,
        Transfer,
        TransferErrorType,
    },
    events::EventProducers,
    providers::{MockNetwork, ProviderRegistry},
    test_utils::prepare_env::{prepare_test_env, random_db_path},
    AdvanceResult,
    EventOrchestrator,
    OutboxRelay,
    RelayStats,
    RetryPolicy,
    SqliteDatabase,
};

#[derive(Debug)]
pub struct TestSystem {
    pub db: SqliteDatabase,
    pub network: MockNetwork,
    pub orchestrator: Arc<EventOrchestrator<SqliteDatabase>>,
    pub relay: OutboxRelay<SqliteDatabase>,
}

/// The accounts and routes of a typical direct bill pay loan.
#[derive(Debug, Clone)]
pub struct LoanFixture {
    pub loan: Loan,
    pub borrower: PaymentAccount,
    pub lender: PaymentAccount,
    pub biller: PaymentAccount,
    pub clearing: PaymentAccount,
    /// Lender → clearing → biller
    pub funding_route: PaymentsRoute,
}

impl TestSystem {
    pub async fn new() -> Self {
        Self::with_producers(EventProducers::default(), RetryPolicy::default()).await
    }

    pub async fn with_producers(producers: EventProducers, retry_policy: RetryPolicy) -> Self {
        let url = random_db_path();
        prepare_test_env(&url).await;
        let db = SqliteDatabase::new_with_url(&url, 1).await.expect("Error creating connection to database");
        let network = MockNetwork::new();
        let registry = ProviderRegistry::mock_all(network.clone());
        let orchestrator = Arc::new(EventOrchestrator::new(db.clone(), registry, retry_policy));
        let relay = OutboxRelay::new(db.clone(), Arc::clone(&orchestrator), producers);
        Self { db, network, orchestrator, relay }
    }

    /// Delivers outbox events until there are none left.
    pub async fn settle(&self) -> RelayStats {
        self.relay.run_until_idle(200).await.expect("Error relaying events")
    }

    pub async fn account(
        &self,
        name: &str,
        account_type: AccountType,
        ownership: AccountOwnership,
        provider: PaymentProvider,
    ) -> PaymentAccount {
        self.db
            .insert_payment_account(NewPaymentAccount::new(name, account_type, ownership, provider))
            .await
            .expect("Error creating account")
    }

    /// A loan with borrower, lender and biller accounts, and routes for every stage. Funding goes through an internal
    /// clearing account in two hops. Everything else is a direct transfer.
    pub async fn loan_fixture(&self, amount: i64, fee: i64, payments_count: i64, state: LoanState) -> LoanFixture {
        use AccountOwnership::*;
        use AccountType::*;
        let borrower = self.account("borrower card", DebitCard, Personal, PaymentProvider::Tabapay).await;
        let lender = self.account("lender", BankAccount, Internal, PaymentProvider::Checkbook).await;
        let biller = self.account("biller", BillerNetwork, External, PaymentProvider::Checkbook).await;
        let clearing = self.account("clearing", BankAccount, Internal, PaymentProvider::Fiserv).await;
        let all_types = LoanType::ALL;

        let funding_route = NewPaymentsRoute::new("lender to biller via clearing", lender.shape(), biller.shape())
            .for_stages(&[PaymentKind::Funding])
            .for_loan_types(all_types)
            .with_step(None, Some(clearing.id))
            .with_step(Some(clearing.id), None);
        let funding_route = self.db.insert_route(funding_route).await.expect("Error creating route");
        self.direct_route("lender to biller", lender.shape(), biller.shape(), &[
            PaymentKind::Disbursement,
            PaymentKind::Fee,
        ])
        .await;
        self.direct_route("borrower to lender", borrower.shape(), lender.shape(), &[PaymentKind::Repayment]).await;
        self.direct_route("biller to lender", biller.shape(), lender.shape(), &[PaymentKind::Refund]).await;

        let loan = NewLoan::new(Cents::from(amount), LoanType::DirectBillPay)
            .with_fee(Cents::from(fee))
            .with_state(state)
            .with_payments_count(payments_count)
            .with_borrower(borrower.id)
            .with_lender(lender.id)
            .with_biller(biller.id);
        let loan = self.db.insert_loan(loan).await.expect("Error creating loan");
        LoanFixture { loan, borrower, lender, biller, clearing, funding_route }
    }

    pub async fn direct_route(
        &self,
        name: &str,
        from: AccountShape,
        to: AccountShape,
        stages: &[PaymentKind],
    ) -> PaymentsRoute {
        let route = NewPaymentsRoute::new(name, from, to)
            .for_stages(stages)
            .for_loan_types(LoanType::ALL)
            .with_step(None, None);
        self.db.insert_route(route).await.expect("Error creating route")
    }

    pub async fn loan(&self, loan_id: i64) -> Loan {
        self.db.fetch_loan(loan_id).await.expect("Error fetching loan").expect("Loan does not exist")
    }

    pub async fn payments(&self, loan_id: i64) -> Vec<LoanPayment> {
        self.db.fetch_payments_for_loan(loan_id).await.expect("Error fetching payments")
    }

    pub async fn payment(&self, payment_id: i64) -> LoanPayment {
        self.db.fetch_payment(payment_id).await.expect("Error fetching payment").expect("Payment does not exist")
    }

    pub async fn steps(&self, payment_id: i64) -> Vec<LoanPaymentStep> {
        self.db.fetch_steps_for_payment(payment_id).await.expect("Error fetching steps")
    }

    pub async fn transfers(&self, step_id: i64) -> Vec<Transfer> {
        self.db.fetch_transfers_for_step(step_id).await.expect("Error fetching transfers")
    }

    /// The most recent transfer attempt for the step.
    pub async fn latest_transfer(&self, step_id: i64) -> Transfer {
        self.transfers(step_id).await.pop().expect("Step has no transfers")
    }

    /// Delivers a "completed" webhook for the transfer, the way its network would.
    pub async fn network_completes(&self, transfer: &Transfer) -> AdvanceResult {
        let raw = format!(r#"{{"status":"completed","reference":"{}"}}"#, MockNetwork::reference_for(transfer.id));
        self.webhook(transfer, &raw).await
    }

    /// Delivers a "failed" webhook for the transfer.
    pub async fn network_fails(&self, transfer: &Transfer, error_type: TransferErrorType, code: &str) -> AdvanceResult {
        let raw = format!(
            r#"{{"status":"failed","reference":"{}","error":{{"type":"{error_type}","code":"{code}","message":"{code}"}}}}"#,
            MockNetwork::reference_for(transfer.id)
        );
        self.webhook(transfer, &raw).await
    }

    pub async fn webhook(&self, transfer: &Transfer, raw: &str) -> AdvanceResult {
        self.orchestrator
            .transfers()
            .handle_provider_update(transfer.provider, transfer.id, raw)
            .await
            .expect("Error handling transfer update")
    }
}
