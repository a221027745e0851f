//! #  Database management and control.
//!
//! This module defines the interface contracts of the payment engine database *backends*.
//!
//! All state-changing calls are *conditional transitions*: the backend only applies the change if the record is still
//! in the state the caller expects, and reports a miss with `None` rather than an error. Every transition also takes a
//! list of events which the backend must write to the event outbox in the same atomic transaction. That pairing is
//! what gives the orchestrator at-least-once delivery without any in-memory bookkeeping.
//!
//! ## Traits
//!
//! * [`LoanPaymentDatabase`] is the umbrella trait a backend implements to drive the engine.
//! * [`LoanManagement`] covers loans and the payment accounts they reference.
//! * [`PaymentManagement`] covers loan payments and their steps.
//! * [`TransferManagement`] covers the transfer attempts behind each step.
//! * [`RouteManagement`] covers the (read-mostly) route templates.
//! * [`EventOutbox`] covers the durable event queue.
mod data_objects;
mod event_outbox;
mod loan_management;
mod loan_payment_database;
mod payment_management;
mod route_management;
mod transfer_management;

pub use data_objects::{InsertTransferResult, TransferTransition};
pub use event_outbox::EventOutbox;
pub use loan_management::LoanManagement;
pub use loan_payment_database::{LoanPaymentDatabase, LoanPaymentDatabaseError};
pub use payment_management::PaymentManagement;
pub use route_management::RouteManagement;
pub use transfer_management::TransferManagement;
