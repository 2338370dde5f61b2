//! Read model for the adjudication screen.

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::domain::dispute::ENTITY_DISPUTE;
use crate::domain::escrow::ENTITY_ESCROW;
use crate::domain::{Dispute, EscrowTransaction, EvidenceByParty, User};
use crate::error::{EscrowError, EscrowResult};
use crate::ports::EscrowStore;
use crate::services::log_failure;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisputeDetails {
    pub escrow: EscrowTransaction,
    pub dispute: Dispute,
    pub customer: Option<User>,
    pub merchant: Option<User>,
    pub evidence: EvidenceByParty,
}

#[derive(Clone)]
pub struct DisputeDetailsService {
    store: Arc<dyn EscrowStore>,
}

impl DisputeDetailsService {
    pub fn new(store: Arc<dyn EscrowStore>) -> Self {
        Self { store }
    }

    /// Everything an adjudicator needs for one escrow's dispute, read from a
    /// single snapshot. An escrow that was never disputed is `NotFound`.
    pub async fn get_dispute_details(&self, escrow_id: Uuid) -> EscrowResult<DisputeDetails> {
        self.assemble(escrow_id)
            .await
            .map_err(|e| log_failure("get_dispute_details", e))
    }

    async fn assemble(&self, escrow_id: Uuid) -> EscrowResult<DisputeDetails> {
        let mut uow = self.store.snapshot().await?;

        let escrow = uow
            .find_escrow(escrow_id)
            .await?
            .ok_or_else(|| EscrowError::not_found(ENTITY_ESCROW, escrow_id))?;
        let dispute_id = escrow
            .dispute_id
            .ok_or_else(|| {
                EscrowError::not_found(ENTITY_DISPUTE, format!("for escrow {}", escrow_id))
            })?;
        let dispute = uow
            .find_dispute(dispute_id)
            .await?
            .ok_or_else(|| EscrowError::not_found(ENTITY_DISPUTE, dispute_id))?;

        let customer = uow.find_user(escrow.customer_id).await?;
        let merchant = match escrow.merchant_id {
            Some(merchant_id) => uow.find_user(merchant_id).await?,
            None => None,
        };
        let evidence = uow.list_evidence(dispute.id).await?;
        uow.rollback().await?;

        let evidence = EvidenceByParty::partition(evidence, &escrow);
        Ok(DisputeDetails {
            escrow,
            dispute,
            customer,
            merchant,
            evidence,
        })
    }
}
