use serde::{Deserialize, Serialize};

use crate::db_types::{Transfer, TransferError, TransferState};

#[derive(Debug, Clone)]
pub enum InsertTransferResult {
    Inserted(Transfer),
    /// A transfer with the same step and order already exists. Carries the id of the existing record.
    AlreadyExists(i64),
}

/// A conditional state change for a transfer. Optional fields are only written when present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferTransition {
    pub transfer_id: i64,
    pub from: TransferState,
    pub to: TransferState,
    pub provider_reference: Option<String>,
    pub error: Option<TransferError>,
}

impl TransferTransition {
    pub fn new(transfer_id: i64, from: TransferState, to: TransferState) -> Self {
        Self { transfer_id, from, to, provider_reference: None, error: None }
    }

    pub fn with_reference<S: Into<String>>(mut self, reference: S) -> Self {
        self.provider_reference = Some(reference.into());
        self
    }

    pub fn with_error(mut self, error: TransferError) -> Self {
        self.error = Some(error);
        self
    }
}
