//! The payment engine's public API.
//!
//! * [`LoanPaymentApi`] creates and advances stage payments.
//! * [`StepStateMachine`] drives payment steps from their transfers.
//! * [`TransferExecutionApi`] talks to the transfer networks.
//! * [`LoanStateApi`] moves loans between states as payments finish.
//! * [`EventOrchestrator`] routes durable events between all of the above, and [`OutboxRelay`] delivers them.
//! * [`ReconciliationApi`] picks up after lost events and stuck transfers.
pub mod errors;
pub mod loan_state;
pub mod orchestrator;
pub mod outbox_relay;
pub mod payment_kinds;
pub mod payment_manager;
pub mod reconciliation;
pub mod route_resolver;
pub mod step_machine;
pub mod transfer_api;

pub use errors::{AdvanceResult, LoanPaymentError, OutOfSyncError};
pub use loan_state::LoanStateApi;
pub use orchestrator::EventOrchestrator;
pub use outbox_relay::{OutboxRelay, RelayStats};
pub use payment_kinds::RetryPolicy;
pub use payment_manager::LoanPaymentApi;
pub use reconciliation::{ReconciliationApi, ReconciliationConfig, ReconciliationReport};
pub use route_resolver::RouteResolver;
pub use step_machine::StepStateMachine;
pub use transfer_api::TransferExecutionApi;
