//! Loan Payment Engine
//!
//! The Loan Payment Engine moves the money behind a loan's lifecycle: funding the loan, disbursing it, collecting fees
//! and repayments, and refunds. Each of these is a *payment*, executed as one or more *steps* along a configured
//! route, and each step is carried by one or more *transfer* attempts on a money-movement network.
//!
//! The library is divided into these main sections:
//! 1. Database management and control ([`mod@db`]). Currently, Sqlite is the supported backend. Backends implement
//!    the traits in [`db::traits`]; the data types they store are defined in [`db_types`] and are public.
//! 2. Transfer networks ([`providers`]). Adapters that submit transfers and translate the networks' updates and
//!    errors into the engine's canonical shapes.
//! 3. The payment engine public API ([`mod@lpe_api`]). Payment creation, the step state machine, transfer execution
//!    and loan state evaluation, tied together by an event orchestrator.
//!
//! Every state change is written together with the event that announces it, in a durable outbox. The
//! [`OutboxRelay`] delivers those events to the orchestrator at least once, and also fans them out to any hooks you
//! register (see [`events`]), so you can react to what the engine does without being able to interfere with it.
pub mod db;

pub mod db_types;
pub mod events;
pub mod lpe_api;
pub mod providers;

#[cfg(any(feature = "test_utils", test))]
pub mod test_utils;

#[cfg(feature = "sqlite")]
pub use db::sqlite::{db::SqliteDatabase, SqliteDatabaseError};
pub use db::traits::{
    EventOutbox,
    InsertTransferResult,
    LoanManagement,
    LoanPaymentDatabase,
    LoanPaymentDatabaseError,
    PaymentManagement,
    RouteManagement,
    TransferManagement,
    TransferTransition,
};
pub use lpe_api::{
    AdvanceResult,
    EventOrchestrator,
    LoanPaymentApi,
    LoanPaymentError,
    LoanStateApi,
    OutOfSyncError,
    OutboxRelay,
    ReconciliationApi,
    ReconciliationConfig,
    ReconciliationReport,
    RelayStats,
    RetryPolicy,
    RouteResolver,
    StepStateMachine,
    TransferExecutionApi,
};
