//! # Loan payment server
//! This crate hosts the HTTP front end of the loan payment gateway. It is responsible for:
//! * Receiving transfer status webhooks from the money-movement networks and handing them to the engine.
//! * Letting operators and upstream services start payments, move loans on to their next stage, and inspect them.
//! * Running the background workers: the outbox relay that drives payments forward, and the reconciliation sweep.
//!
//! ## Configuration
//! The server is configured via environment variables. See [config](config/index.html) for more information.
//!
//! ## Routes
//! The server exposes the following routes:
//! * `GET /health`: A health check route that returns a 200 OK response.
//! * `POST /webhook/transfers/{provider}/{transfer_id}`: Transfer status updates. Must be signed with the network's
//!   webhook key.
//! * `POST /api/loans/{loan_id}/payments/{kind}`: Start a payment of the given kind for a loan.
//! * `POST /api/loans/{loan_id}/advance`, `POST /api/loans/{loan_id}/resume`: Move a loan on, or out of a pause.
//! * `POST /api/loans/{loan_id}/accounts`: Attach payment accounts to a loan.
//! * `POST /api/payments/{payment_id}/advance`: Re-drive a payment.
//! * `GET /api/loans/{loan_id}`, `GET /api/payments/{payment_id}`: Current state.

pub mod cli;
pub mod config;
pub mod data_objects;
pub mod errors;

pub mod helpers;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod workers;

#[cfg(test)]
mod endpoint_tests;
