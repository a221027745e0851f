//! ACH batch adapter.
//!
//! ACH is not real-time. Submissions are queued into the current batch and are accepted as soon as they are queued;
//! settlement (or a return) is reported later. Returns carry a NACHA return code (`R01`, `R02`, ...), which is
//! classified here into business or technical failures.
use std::sync::Arc;

use log::*;
use regex::Regex;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::{
    db_types::{Cents, Transfer, TransferError},
    providers::{ProviderError, Submission, TransferNetwork, TransferUpdateDetails, TransferUpdateStatus},
};

/// Return codes where the account holder's situation, not the network, is at fault. Retrying these will not help.
const BUSINESS_RETURN_CODES: [(&str, &str); 10] = [
    ("R01", "insufficient_funds"),
    ("R02", "account_closed"),
    ("R03", "no_account"),
    ("R04", "invalid_account_number"),
    ("R07", "authorization_revoked"),
    ("R08", "payment_stopped"),
    ("R10", "unauthorized_debit"),
    ("R16", "account_frozen"),
    ("R20", "non_transaction_account"),
    ("R29", "corporate_not_authorized"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AchEntry {
    pub transfer_id: i64,
    pub trace_number: String,
    pub amount: Cents,
    pub from_account_id: i64,
    pub to_account_id: i64,
}

#[derive(Debug, Default)]
struct AchState {
    batch: Vec<AchEntry>,
    next_trace: u64,
}

#[derive(Debug, Clone, Default)]
pub struct AchNetwork {
    state: Arc<Mutex<AchState>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum AchStatus {
    Pending,
    Settled,
    Returned,
    Rejected,
}

#[derive(Debug, Deserialize)]
struct AchUpdate {
    trace_number: Option<String>,
    status: AchStatus,
    return_code: Option<String>,
    description: Option<String>,
}

impl AchNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the queued entries, leaving an empty batch behind.
    pub async fn drain_batch(&self) -> Vec<AchEntry> {
        let mut state = self.state.lock().await;
        let batch = std::mem::take(&mut state.batch);
        info!("💸️ ACH batch closed with {} entries", batch.len());
        batch
    }

    pub async fn batch_size(&self) -> usize {
        self.state.lock().await.batch.len()
    }
}

/// Translates a NACHA return code into the canonical error shape.
pub fn classify_return_code(code: &str, description: &str) -> TransferError {
    let code = code.trim().to_uppercase();
    let well_formed = Regex::new(r"^R\d{2}$").map(|re| re.is_match(&code)).unwrap_or(false);
    if !well_formed {
        return TransferError::technical("invalid_return_code", &format!("Unrecognised ACH return code '{code}'"));
    }
    match BUSINESS_RETURN_CODES.iter().find(|(c, _)| *c == code) {
        Some((_, canonical)) => TransferError::business(canonical, description),
        None => TransferError::technical(&format!("ach_{}", code.to_lowercase()), description),
    }
}

impl TransferNetwork for AchNetwork {
    fn name(&self) -> &'static str {
        "ach"
    }

    async fn submit(&self, transfer: &Transfer) -> Result<Submission, ProviderError> {
        if transfer.amount <= Cents::from(0) {
            return Ok(Submission::Rejected(TransferError::business(
                "invalid_amount",
                &format!("ACH entries must be for a positive amount, not {}", transfer.amount),
            )));
        }
        let mut state = self.state.lock().await;
        state.next_trace += 1;
        let trace_number = format!("ACH-{:09}", state.next_trace);
        state.batch.push(AchEntry {
            transfer_id: transfer.id,
            trace_number: trace_number.clone(),
            amount: transfer.amount,
            from_account_id: transfer.from_account_id,
            to_account_id: transfer.to_account_id,
        });
        debug!("💸️ Transfer #{} queued for ACH as {trace_number}", transfer.id);
        Ok(Submission::Accepted { reference: trace_number })
    }

    fn parse_update(&self, raw: &str) -> Option<TransferUpdateDetails> {
        let update = serde_json::from_str::<AchUpdate>(raw)
            .map_err(|e| warn!("💸️ Could not parse ACH update. {e}"))
            .ok()?;
        let status = match update.status {
            AchStatus::Pending => TransferUpdateStatus::Pending,
            AchStatus::Settled => TransferUpdateStatus::Completed,
            AchStatus::Returned | AchStatus::Rejected => {
                let description = update.description.as_deref().unwrap_or("ACH entry returned");
                let error = match update.return_code.as_deref() {
                    Some(code) => classify_return_code(code, description),
                    None => TransferError::technical("missing_return_code", description),
                };
                TransferUpdateStatus::Failed(error.with_raw_payload(raw))
            },
        };
        Some(TransferUpdateDetails { reference: update.trace_number, status })
    }

    fn parse_error(&self, raw: &str) -> TransferError {
        match self.parse_update(raw) {
            Some(TransferUpdateDetails { status: TransferUpdateStatus::Failed(e), .. }) => e,
            _ => {
                // Some originators only forward the bare code
                let code = raw.trim().trim_matches('"');
                classify_return_code(code, "ACH entry returned").with_raw_payload(raw)
            },
        }
    }
}
