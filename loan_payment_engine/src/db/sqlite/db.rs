use std::fmt::Debug;

use chrono::{DateTime, Utc};
use log::*;
use sqlx::SqlitePool;

use super::{accounts, db_url, loans, new_pool, outbox, payments, routes, steps, transfers, SqliteDatabaseError};
use crate::{
    db::traits::{
        EventOutbox,
        InsertTransferResult,
        LoanManagement,
        LoanPaymentDatabase,
        LoanPaymentDatabaseError,
        PaymentManagement,
        RouteManagement,
        TransferManagement,
        TransferTransition,
    },
    db_types::{
        FailureReason,
        Loan,
        LoanPayment,
        LoanPaymentStep,
        LoanState,
        NewLoan,
        NewLoanPayment,
        NewPaymentAccount,
        NewPaymentStep,
        NewPaymentsRoute,
        NewTransfer,
        OutboxEvent,
        OutboxStatus,
        PaymentAccount,
        PaymentState,
        PaymentsRoute,
        RouteQuery,
        StepState,
        Transfer,
    },
    events::{EventType, PaymentStateEvent},
};

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl SqliteDatabase {
    /// Creates a new database API object, using the URL in `LPG_DATABASE_URL`.
    pub async fn new(max_connections: u32) -> Result<Self, SqliteDatabaseError> {
        let url = db_url();
        SqliteDatabase::new_with_url(&url, max_connections).await
    }

    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, SqliteDatabaseError> {
        trace!("🗃️ Creating new database connection pool with url {url}");
        let pool = new_pool(url, max_connections).await?;
        Ok(Self { url: url.to_string(), pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Brings the schema up to date.
    pub async fn migrate(&self) -> Result<(), SqliteDatabaseError> {
        sqlx::migrate!("./src/db/sqlite/migrations").run(&self.pool).await?;
        info!("🗃️ Database migrations complete");
        Ok(())
    }
}

impl LoanPaymentDatabase for SqliteDatabase {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn close(&mut self) -> Result<(), LoanPaymentDatabaseError> {
        self.pool.close().await;
        Ok(())
    }
}

impl LoanManagement for SqliteDatabase {
    async fn insert_payment_account(&self, account: NewPaymentAccount) -> Result<PaymentAccount, LoanPaymentDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        let account = accounts::insert_account(account, &mut conn).await?;
        debug!("🗃️ Payment account #{} ({}) created", account.id, account.shape());
        Ok(account)
    }

    async fn fetch_payment_account(&self, account_id: i64) -> Result<Option<PaymentAccount>, LoanPaymentDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        Ok(accounts::fetch_account(account_id, &mut conn).await?)
    }

    async fn insert_loan(&self, loan: NewLoan) -> Result<Loan, LoanPaymentDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        let loan = loans::insert_loan(loan, &mut conn).await?;
        debug!("🗃️ Loan #{} created", loan.id);
        Ok(loan)
    }

    async fn fetch_loan(&self, loan_id: i64) -> Result<Option<Loan>, LoanPaymentDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        Ok(loans::fetch_loan(loan_id, &mut conn).await?)
    }

    async fn update_loan_accounts(
        &self,
        loan_id: i64,
        borrower_account_id: Option<i64>,
        lender_account_id: Option<i64>,
        biller_account_id: Option<i64>,
    ) -> Result<Option<Loan>, LoanPaymentDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        let loan =
            loans::update_accounts(loan_id, borrower_account_id, lender_account_id, biller_account_id, &mut conn).await?;
        Ok(loan)
    }

    /// In a single atomic transaction,
    /// * moves the loan from `from` to `to`, if the loan is still in `from`,
    /// * queues `events` in the outbox.
    async fn transition_loan(
        &self,
        loan_id: i64,
        from: LoanState,
        to: LoanState,
        events: &[EventType],
    ) -> Result<Option<Loan>, LoanPaymentDatabaseError> {
        let mut tx = self.pool.begin().await?;
        let loan = loans::transition_loan(loan_id, from, to, &mut tx).await?;
        if loan.is_some() {
            outbox::insert_events(events, &mut tx).await?;
            debug!("🗃️ Loan #{loan_id} moved {from} → {to}");
        } else {
            trace!("🗃️ Loan #{loan_id} was not in state {from}. No change made.");
        }
        tx.commit().await?;
        Ok(loan)
    }
}

impl PaymentManagement for SqliteDatabase {
    /// Stores the payment and all its steps in a single atomic transaction. Payments born `Completed` get their
    /// `PaymentCompleted` event queued here too.
    async fn insert_payment(
        &self,
        payment: NewLoanPayment,
        steps: Vec<NewPaymentStep>,
    ) -> Result<Option<(LoanPayment, Vec<LoanPaymentStep>)>, LoanPaymentDatabaseError> {
        let mut tx = self.pool.begin().await?;
        let Some(payment) = payments::insert_payment(payment, &mut tx).await? else {
            tx.rollback().await?;
            return Ok(None);
        };
        let mut saved = Vec::with_capacity(steps.len());
        for step in steps {
            saved.push(steps::insert_step(payment.id, step, &mut tx).await?);
        }
        if payment.state == PaymentState::Completed {
            let event = PaymentStateEvent::new(payment.loan_id, payment.id, PaymentState::Created);
            outbox::insert_events(&[EventType::PaymentCompleted(event)], &mut tx).await?;
        }
        tx.commit().await?;
        debug!(
            "🗃️ {} payment #{} for loan #{} saved with {} steps",
            payment.kind,
            payment.id,
            payment.loan_id,
            saved.len()
        );
        Ok(Some((payment, saved)))
    }

    async fn fetch_payment(&self, payment_id: i64) -> Result<Option<LoanPayment>, LoanPaymentDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        Ok(payments::fetch_payment(payment_id, &mut conn).await?)
    }

    async fn fetch_payments_for_loan(&self, loan_id: i64) -> Result<Vec<LoanPayment>, LoanPaymentDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        Ok(payments::fetch_payments_for_loan(loan_id, &mut conn).await?)
    }

    async fn transition_payment(
        &self,
        payment_id: i64,
        from: PaymentState,
        to: PaymentState,
        failure_reason: Option<FailureReason>,
        events: &[EventType],
    ) -> Result<Option<LoanPayment>, LoanPaymentDatabaseError> {
        let mut tx = self.pool.begin().await?;
        let payment = payments::transition_payment(payment_id, from, to, failure_reason, &mut tx).await?;
        if payment.is_some() {
            outbox::insert_events(events, &mut tx).await?;
            debug!("🗃️ Payment #{payment_id} moved {from} → {to}");
        }
        tx.commit().await?;
        Ok(payment)
    }

    async fn fetch_step(&self, step_id: i64) -> Result<Option<LoanPaymentStep>, LoanPaymentDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        Ok(steps::fetch_step(step_id, &mut conn).await?)
    }

    async fn fetch_steps_for_payment(&self, payment_id: i64) -> Result<Vec<LoanPaymentStep>, LoanPaymentDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        Ok(steps::fetch_steps_for_payment(payment_id, &mut conn).await?)
    }

    async fn fetch_steps_in_state(
        &self,
        state: StepState,
        limit: i64,
    ) -> Result<Vec<LoanPaymentStep>, LoanPaymentDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        Ok(steps::fetch_steps_in_state(state, limit, &mut conn).await?)
    }

    async fn transition_step(
        &self,
        step_id: i64,
        from: StepState,
        to: StepState,
        failure_reason: Option<FailureReason>,
        events: &[EventType],
    ) -> Result<Option<LoanPaymentStep>, LoanPaymentDatabaseError> {
        let mut tx = self.pool.begin().await?;
        let step = steps::transition_step(step_id, from, to, failure_reason, &mut tx).await?;
        if step.is_some() {
            outbox::insert_events(events, &mut tx).await?;
            debug!("🗃️ Step #{step_id} moved {from} → {to}");
        }
        tx.commit().await?;
        Ok(step)
    }
}

impl TransferManagement for SqliteDatabase {
    async fn insert_transfer(&self, transfer: NewTransfer) -> Result<InsertTransferResult, LoanPaymentDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        Ok(transfers::idempotent_insert(transfer, &mut conn).await?)
    }

    async fn fetch_transfer(&self, transfer_id: i64) -> Result<Option<Transfer>, LoanPaymentDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        Ok(transfers::fetch_transfer(transfer_id, &mut conn).await?)
    }

    async fn fetch_transfers_for_step(&self, step_id: i64) -> Result<Vec<Transfer>, LoanPaymentDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        Ok(transfers::fetch_transfers_for_step(step_id, &mut conn).await?)
    }

    async fn transition_transfer(
        &self,
        transition: TransferTransition,
        events: &[EventType],
    ) -> Result<Option<Transfer>, LoanPaymentDatabaseError> {
        let (id, from, to) = (transition.transfer_id, transition.from, transition.to);
        let mut tx = self.pool.begin().await?;
        let transfer = transfers::transition_transfer(transition, &mut tx).await?;
        if transfer.is_some() {
            outbox::insert_events(events, &mut tx).await?;
            debug!("🗃️ Transfer #{id} moved {from} → {to}");
        }
        tx.commit().await?;
        Ok(transfer)
    }
}

impl RouteManagement for SqliteDatabase {
    async fn insert_route(&self, route: NewPaymentsRoute) -> Result<PaymentsRoute, LoanPaymentDatabaseError> {
        let mut tx = self.pool.begin().await?;
        let route = routes::insert_route(route, &mut tx).await?;
        tx.commit().await?;
        Ok(route)
    }

    async fn fetch_matching_routes(&self, query: &RouteQuery) -> Result<Vec<PaymentsRoute>, LoanPaymentDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        Ok(routes::fetch_matching_routes(query, &mut conn).await?)
    }
}

impl EventOutbox for SqliteDatabase {
    async fn enqueue_events(&self, events: &[EventType]) -> Result<(), LoanPaymentDatabaseError> {
        let mut tx = self.pool.begin().await?;
        outbox::insert_events(events, &mut tx).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn claim_pending_events(&self, limit: i64) -> Result<Vec<OutboxEvent>, LoanPaymentDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        Ok(outbox::claim_pending(limit, &mut conn).await?)
    }

    async fn mark_event_dispatched(&self, event_id: i64) -> Result<(), LoanPaymentDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        Ok(outbox::settle_event(event_id, OutboxStatus::Dispatched, None, &mut conn).await?)
    }

    async fn release_event(&self, event_id: i64, error: &str) -> Result<(), LoanPaymentDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        Ok(outbox::settle_event(event_id, OutboxStatus::Pending, Some(error), &mut conn).await?)
    }

    async fn dead_letter_event(&self, event_id: i64, error: &str) -> Result<(), LoanPaymentDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        warn!("🗃️ Outbox event #{event_id} dead-lettered. {error}");
        Ok(outbox::settle_event(event_id, OutboxStatus::Failed, Some(error), &mut conn).await?)
    }

    async fn release_stalled_events(&self, claimed_before: DateTime<Utc>) -> Result<u64, LoanPaymentDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        Ok(outbox::release_stalled(claimed_before, &mut conn).await?)
    }

    async fn count_events(&self, status: OutboxStatus) -> Result<i64, LoanPaymentDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        Ok(outbox::count_events(status, &mut conn).await?)
    }
}
