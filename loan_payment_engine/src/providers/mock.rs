//! A scriptable in-process network, for development and tests.
//!
//! Submissions are accepted with a reference of the form `MOCK-{transfer_id}` unless a rejection has been queued, or
//! the network has been marked unreachable. Updates use the canonical JSON shape:
//!
//! ```json
//! {"status": "failed", "reference": "MOCK-12", "error": {"type": "technical", "code": "timeout", "message": "..."}}
//! ```
use std::{collections::VecDeque, sync::Arc};

use log::*;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::{
    db_types::{Transfer, TransferError, TransferErrorType},
    providers::{ProviderError, Submission, TransferNetwork, TransferUpdateDetails, TransferUpdateStatus},
};

#[derive(Debug, Default)]
struct MockState {
    submitted: Vec<i64>,
    rejections: VecDeque<TransferError>,
    unreachable: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MockNetwork {
    state: Arc<Mutex<MockState>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum MockStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Deserialize)]
struct MockError {
    #[serde(rename = "type")]
    error_type: TransferErrorType,
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct MockUpdate {
    status: MockStatus,
    reference: Option<String>,
    error: Option<MockError>,
}

impl MockNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reference_for(transfer_id: i64) -> String {
        format!("MOCK-{transfer_id}")
    }

    /// The next submission is rejected with `error`. Rejections queue up in order.
    pub async fn reject_next(&self, error: TransferError) {
        self.state.lock().await.rejections.push_back(error);
    }

    pub async fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().await.unreachable = unreachable;
    }

    /// Ids of every transfer accepted so far, in submission order.
    pub async fn submitted(&self) -> Vec<i64> {
        self.state.lock().await.submitted.clone()
    }
}

fn to_transfer_error(error: MockError, raw: &str) -> TransferError {
    TransferError {
        error_type: error.error_type,
        code: error.code,
        message: error.message,
        raw_payload: raw.to_string(),
    }
}

impl TransferNetwork for MockNetwork {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn submit(&self, transfer: &Transfer) -> Result<Submission, ProviderError> {
        let mut state = self.state.lock().await;
        if state.unreachable {
            return Err(ProviderError::Unreachable(self.name(), "the mock network is switched off".into()));
        }
        if let Some(error) = state.rejections.pop_front() {
            debug!("💸️ Mock network rejected transfer #{}: {error}", transfer.id);
            return Ok(Submission::Rejected(error));
        }
        state.submitted.push(transfer.id);
        trace!("💸️ Mock network accepted transfer #{} for {}", transfer.id, transfer.amount);
        Ok(Submission::Accepted { reference: Self::reference_for(transfer.id) })
    }

    fn parse_update(&self, raw: &str) -> Option<TransferUpdateDetails> {
        let update = match serde_json::from_str::<MockUpdate>(raw) {
            Ok(u) => u,
            Err(e) => {
                warn!("💸️ Could not parse mock network update. {e}");
                return None;
            },
        };
        let status = match update.status {
            MockStatus::Pending => TransferUpdateStatus::Pending,
            MockStatus::Completed => TransferUpdateStatus::Completed,
            MockStatus::Failed => {
                let error = update.error.map(|e| to_transfer_error(e, raw)).unwrap_or_else(|| {
                    TransferError::technical("unknown_failure", "The network reported a failure without details")
                        .with_raw_payload(raw)
                });
                TransferUpdateStatus::Failed(error)
            },
        };
        Some(TransferUpdateDetails { reference: update.reference, status })
    }

    fn parse_error(&self, raw: &str) -> TransferError {
        if let Ok(error) = serde_json::from_str::<MockError>(raw) {
            return to_transfer_error(error, raw);
        }
        match self.parse_update(raw) {
            Some(TransferUpdateDetails { status: TransferUpdateStatus::Failed(e), .. }) => e,
            _ => TransferError::technical("unparseable_error", "The failure payload was not recognised")
                .with_raw_payload(raw),
        }
    }
}
