use std::fmt::Debug;

use log::*;

use crate::{
    db::traits::{LoanPaymentDatabase, TransferTransition},
    db_types::{PaymentProvider, Transfer, TransferError, TransferState},
    events::{EventType, TransferEvent},
    lpe_api::errors::{AdvanceResult, LoanPaymentError},
    providers::{
        ProviderError,
        ProviderRegistry,
        Submission,
        TransferNetwork,
        TransferUpdateDetails,
        TransferUpdateStatus,
    },
};

/// `TransferExecutionApi` hands transfers to their network, and records what the network says about them.
///
/// Terminal transfer updates are idempotent: once a transfer has completed or failed, further updates for it are
/// reported as [`AdvanceResult::Unchanged`] and have no effect.
pub struct TransferExecutionApi<B> {
    db: B,
    providers: ProviderRegistry,
}

impl<B> Debug for TransferExecutionApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TransferExecutionApi")
    }
}

impl<B> TransferExecutionApi<B> {
    pub fn new(db: B, providers: ProviderRegistry) -> Self {
        Self { db, providers }
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }
}

impl<B> TransferExecutionApi<B>
where B: LoanPaymentDatabase
{
    /// Submits a `Created` transfer to its network.
    ///
    /// * Accepted: the transfer goes `Pending` and `TransferExecuted` is raised.
    /// * Rejected, or the network is unreachable: the transfer fails, and `TransferFailed` is raised. An unreachable
    ///   network is recorded as a technical error, so the step will retry.
    pub async fn execute_transfer(&self, transfer_id: i64) -> Result<AdvanceResult, LoanPaymentError> {
        let Some(transfer) = self.db.fetch_transfer(transfer_id).await? else {
            return Ok(AdvanceResult::NotFound);
        };
        if transfer.state != TransferState::Created {
            debug!("💸️ Transfer #{transfer_id} is already {}. Not submitting it again.", transfer.state);
            return Ok(AdvanceResult::Unchanged);
        }
        let network = self.providers.adapter(transfer.provider)?;
        let submission = match network.submit(&transfer).await {
            Ok(s) => s,
            Err(ProviderError::Unreachable(name, msg)) => {
                warn!("💸️ Could not submit transfer #{transfer_id} to {name}. {msg}");
                Submission::Rejected(TransferError::technical("network_unavailable", &msg))
            },
            Err(e) => return Err(e.into()),
        };
        let event = TransferEvent::new(transfer_id, transfer.provider);
        let (transition, event) = match submission {
            Submission::Accepted { reference } => {
                info!("💸️ Transfer #{transfer_id} ({}) accepted by {} as {reference}", transfer.amount, network.name());
                let t = TransferTransition::new(transfer_id, TransferState::Created, TransferState::Pending)
                    .with_reference(reference);
                (t, EventType::TransferExecuted(event))
            },
            Submission::Rejected(error) => {
                info!("💸️ Transfer #{transfer_id} was rejected by {}. {error}", network.name());
                let t = TransferTransition::new(transfer_id, TransferState::Created, TransferState::Failed)
                    .with_error(error);
                (t, EventType::TransferFailed(event))
            },
        };
        self.transition(&transfer, transition, event).await
    }

    /// Fails a `Created` transfer that could not be handed to its network. The failure is technical, so the step
    /// treats it like any other failed attempt and retries within its budget.
    pub async fn abandon_transfer(
        &self,
        transfer_id: i64,
        cause: &LoanPaymentError,
    ) -> Result<AdvanceResult, LoanPaymentError> {
        let Some(transfer) = self.db.fetch_transfer(transfer_id).await? else {
            return Ok(AdvanceResult::NotFound);
        };
        if transfer.state != TransferState::Created {
            debug!("💸️ Transfer #{transfer_id} is already {}. Not abandoning it.", transfer.state);
            return Ok(AdvanceResult::Unchanged);
        }
        info!("💸️ Transfer #{transfer_id} was never submitted. Recording it as a technical failure.");
        let error = TransferError::technical("submission_failed", &cause.to_string());
        let transition =
            TransferTransition::new(transfer_id, TransferState::Created, TransferState::Failed).with_error(error);
        let event = EventType::TransferFailed(TransferEvent::new(transfer_id, transfer.provider));
        self.transition(&transfer, transition, event).await
    }

    /// Marks a `Pending` transfer as completed.
    pub async fn complete_transfer(&self, transfer_id: i64) -> Result<AdvanceResult, LoanPaymentError> {
        let Some(transfer) = self.db.fetch_transfer(transfer_id).await? else {
            return Ok(AdvanceResult::NotFound);
        };
        if transfer.state != TransferState::Pending {
            debug!("💸️ Completion for transfer #{transfer_id} ignored. It is {}.", transfer.state);
            return Ok(AdvanceResult::Unchanged);
        }
        let transition = TransferTransition::new(transfer_id, TransferState::Pending, TransferState::Completed);
        let event = EventType::TransferCompleted(TransferEvent::new(transfer_id, transfer.provider));
        self.transition(&transfer, transition, event).await
    }

    /// Marks a `Pending` transfer as failed. The network's raw failure payload is translated to a [`TransferError`].
    pub async fn fail_transfer(&self, transfer_id: i64, error_payload: &str) -> Result<AdvanceResult, LoanPaymentError> {
        let Some(transfer) = self.db.fetch_transfer(transfer_id).await? else {
            return Ok(AdvanceResult::NotFound);
        };
        let error = self.providers.adapter(transfer.provider)?.parse_error(error_payload);
        self.record_failure(transfer, error).await
    }

    /// Translates a raw network update into the canonical shape. Returns `None` if the payload is not recognised.
    pub fn parse_transfer_update(
        &self,
        provider: PaymentProvider,
        raw: &str,
    ) -> Result<Option<TransferUpdateDetails>, LoanPaymentError> {
        Ok(self.providers.adapter(provider)?.parse_update(raw))
    }

    pub async fn apply_transfer_update(
        &self,
        transfer_id: i64,
        details: TransferUpdateDetails,
    ) -> Result<AdvanceResult, LoanPaymentError> {
        match details.status {
            TransferUpdateStatus::Pending => {
                trace!("💸️ Transfer #{transfer_id} is still pending");
                Ok(AdvanceResult::Unchanged)
            },
            TransferUpdateStatus::Completed => self.complete_transfer(transfer_id).await,
            TransferUpdateStatus::Failed(error) => {
                let Some(transfer) = self.db.fetch_transfer(transfer_id).await? else {
                    return Ok(AdvanceResult::NotFound);
                };
                self.record_failure(transfer, error).await
            },
        }
    }

    /// Parses and applies a provider's webhook for a transfer. The provider must be the one that carries the transfer.
    pub async fn handle_provider_update(
        &self,
        provider: PaymentProvider,
        transfer_id: i64,
        raw: &str,
    ) -> Result<AdvanceResult, LoanPaymentError> {
        let Some(transfer) = self.db.fetch_transfer(transfer_id).await? else {
            return Ok(AdvanceResult::NotFound);
        };
        if transfer.provider != provider {
            return Err(LoanPaymentError::InvalidEvent(format!(
                "Transfer #{transfer_id} is carried by {}, not {provider}",
                transfer.provider
            )));
        }
        let details = self.parse_transfer_update(provider, raw)?.ok_or_else(|| {
            LoanPaymentError::InvalidEvent(format!("Unrecognised {provider} update for transfer #{transfer_id}"))
        })?;
        self.apply_transfer_update(transfer_id, details).await
    }

    async fn record_failure(&self, transfer: Transfer, error: TransferError) -> Result<AdvanceResult, LoanPaymentError> {
        if transfer.state != TransferState::Pending {
            debug!("💸️ Failure for transfer #{} ignored. It is {}.", transfer.id, transfer.state);
            return Ok(AdvanceResult::Unchanged);
        }
        info!("💸️ Transfer #{} failed. {error}", transfer.id);
        let transition =
            TransferTransition::new(transfer.id, TransferState::Pending, TransferState::Failed).with_error(error);
        let event = EventType::TransferFailed(TransferEvent::new(transfer.id, transfer.provider));
        self.transition(&transfer, transition, event).await
    }

    async fn transition(
        &self,
        transfer: &Transfer,
        transition: TransferTransition,
        event: EventType,
    ) -> Result<AdvanceResult, LoanPaymentError> {
        match self.db.transition_transfer(transition, &[event]).await? {
            Some(_) => Ok(AdvanceResult::Advanced),
            None => {
                // A concurrent update won the race. Transfers absorb duplicates, so this is not an error.
                debug!("💸️ Transfer #{} moved on while it was being updated. Ignoring.", transfer.id);
                Ok(AdvanceResult::Unchanged)
            },
        }
    }
}
