//! # Transfer networks
//!
//! Every money-movement network the engine talks to is wrapped in an adapter that speaks the engine's canonical
//! language: transfers go in, [`Submission`]s and [`TransferUpdateDetails`] come out, and every network-specific
//! failure is translated to a [`TransferError`].
//!
//! Adapters are dispatched statically through [`NetworkAdapter`]. The [`ProviderRegistry`] decides which adapter
//! services each [`PaymentProvider`].
mod ach;
mod mock;

use std::{collections::HashMap, future::Future, sync::Arc};

pub use ach::{classify_return_code, AchEntry, AchNetwork};
pub use mock::MockNetwork;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db_types::{PaymentProvider, Transfer, TransferError};

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("The {0} network could not be reached. {1}")]
    Unreachable(&'static str, String),
    #[error("No network adapter is configured for provider {0}")]
    NotConfigured(PaymentProvider),
}

/// The network's answer to a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// The transfer is in flight. The network will report the outcome later.
    Accepted { reference: String },
    /// The network refused the transfer outright.
    Rejected(TransferError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferUpdateStatus {
    Pending,
    Completed,
    Failed(TransferError),
}

/// A provider update, translated to the canonical shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferUpdateDetails {
    pub reference: Option<String>,
    pub status: TransferUpdateStatus,
}

impl TransferUpdateDetails {
    pub fn completed() -> Self {
        Self { reference: None, status: TransferUpdateStatus::Completed }
    }

    pub fn failed(error: TransferError) -> Self {
        Self { reference: None, status: TransferUpdateStatus::Failed(error) }
    }
}

/// The capabilities every network adapter provides.
pub trait TransferNetwork {
    fn name(&self) -> &'static str;

    /// Hands the transfer to the network.
    fn submit(&self, transfer: &Transfer) -> impl Future<Output = Result<Submission, ProviderError>> + Send;

    /// Interprets a raw status update (e.g. a webhook body). Returns `None` if the payload is not recognised.
    fn parse_update(&self, raw: &str) -> Option<TransferUpdateDetails>;

    /// Interprets a raw failure payload. Unrecognised payloads become a technical error carrying the raw text.
    fn parse_error(&self, raw: &str) -> TransferError;
}

#[derive(Debug, Clone)]
pub enum NetworkAdapter {
    Mock(MockNetwork),
    Ach(AchNetwork),
}

impl TransferNetwork for NetworkAdapter {
    fn name(&self) -> &'static str {
        match self {
            NetworkAdapter::Mock(n) => n.name(),
            NetworkAdapter::Ach(n) => n.name(),
        }
    }

    async fn submit(&self, transfer: &Transfer) -> Result<Submission, ProviderError> {
        match self {
            NetworkAdapter::Mock(n) => n.submit(transfer).await,
            NetworkAdapter::Ach(n) => n.submit(transfer).await,
        }
    }

    fn parse_update(&self, raw: &str) -> Option<TransferUpdateDetails> {
        match self {
            NetworkAdapter::Mock(n) => n.parse_update(raw),
            NetworkAdapter::Ach(n) => n.parse_update(raw),
        }
    }

    fn parse_error(&self, raw: &str) -> TransferError {
        match self {
            NetworkAdapter::Mock(n) => n.parse_error(raw),
            NetworkAdapter::Ach(n) => n.parse_error(raw),
        }
    }
}

/// Maps each payment provider to the adapter that services it.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    adapters: HashMap<PaymentProvider, Arc<NetworkAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every provider is serviced by the same mock network.
    pub fn mock_all(mock: MockNetwork) -> Self {
        let adapter = Arc::new(NetworkAdapter::Mock(mock));
        let adapters = PaymentProvider::ALL.iter().map(|p| (*p, Arc::clone(&adapter))).collect();
        Self { adapters }
    }

    pub fn with_adapter(mut self, provider: PaymentProvider, adapter: NetworkAdapter) -> Self {
        self.adapters.insert(provider, Arc::new(adapter));
        self
    }

    pub fn adapter(&self, provider: PaymentProvider) -> Result<Arc<NetworkAdapter>, ProviderError> {
        self.adapters.get(&provider).cloned().ok_or(ProviderError::NotConfigured(provider))
    }
}
