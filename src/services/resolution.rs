//! Resolution engine: closes a dispute and moves the held funds in one unit
//! of work. Either both records change or neither does.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::domain::audit::{self, AuditEntry, ACTION_STATUS_CHANGED};
use crate::domain::{
    Dispute, DisputeStatus, EscrowStatus, EscrowTransaction, ReleaseDestination,
    ResolutionOutcome,
};
use crate::error::{EscrowError, EscrowResult};
use crate::ports::{EscrowStore, UnitOfWork};
use crate::services::disputes::lock_dispute;
use crate::services::ledger::{lock_escrow, persist_transition};
use crate::services::log_failure;
use crate::validation::{required_text, validate_enum, ValidationError, ADMIN_NOTES_MAX_LEN};

/// Raw adjudication input. `outcome` is checked against the known values
/// before anything is read.
#[derive(Debug, Clone, Deserialize)]
pub struct ResolveDisputeRequest {
    pub dispute_id: Uuid,
    pub outcome: String,
    pub admin_notes: String,
    pub admin_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct ValidatedResolution {
    pub dispute_id: Uuid,
    pub outcome: ResolutionOutcome,
    pub admin_notes: String,
    pub admin_id: Uuid,
}

impl ResolveDisputeRequest {
    pub fn validate(self) -> Result<ValidatedResolution, ValidationError> {
        let outcome = self.outcome.trim();
        validate_enum("outcome", outcome, &ResolutionOutcome::VALUES)?;
        let outcome = outcome
            .parse::<ResolutionOutcome>()
            .map_err(|e| ValidationError::new("outcome", e))?;

        Ok(ValidatedResolution {
            dispute_id: self.dispute_id,
            outcome,
            admin_notes: required_text("admin_notes", &self.admin_notes, ADMIN_NOTES_MAX_LEN)?,
            admin_id: self.admin_id,
        })
    }
}

/// Audit marker for a settlement made by an adjudicator's decision.
pub const SETTLED_BY_RESOLUTION: &str = "dispute_resolution";
/// Audit marker for a settlement made by releasing the escrow directly.
pub const SETTLED_BY_LEDGER_RELEASE: &str = "ledger_release";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolutionReceipt {
    pub dispute_id: Uuid,
    pub escrow_id: Uuid,
    pub dispute_status: DisputeStatus,
    pub escrow_status: EscrowStatus,
    pub message: String,
}

#[derive(Clone)]
pub struct ResolutionEngine {
    store: Arc<dyn EscrowStore>,
}

impl ResolutionEngine {
    pub fn new(store: Arc<dyn EscrowStore>) -> Self {
        Self { store }
    }

    /// Resolves a dispute. A dispute that is already resolved, including one
    /// resolved by a concurrent call, yields `Conflict`.
    pub async fn resolve(&self, request: ResolveDisputeRequest) -> EscrowResult<ResolutionReceipt> {
        let request = request
            .validate()
            .map_err(|e| log_failure("resolve_dispute", e.into()))?;
        self.resolve_validated(request)
            .await
            .map_err(|e| log_failure("resolve_dispute", e))
    }

    async fn resolve_validated(
        &self,
        request: ValidatedResolution,
    ) -> EscrowResult<ResolutionReceipt> {
        let mut uow = self.store.begin().await?;

        // Status is re-read under the row lock; a second resolver blocks here
        // until the first commits and then sees RESOLVED.
        let mut dispute = lock_dispute(uow.as_mut(), request.dispute_id).await?;
        if dispute.status == DisputeStatus::Resolved {
            return Err(EscrowError::Conflict(format!(
                "dispute {} is already resolved",
                dispute.id
            )));
        }
        let mut escrow = lock_escrow(uow.as_mut(), dispute.escrow_transaction_id).await?;

        settle(
            uow.as_mut(),
            &mut dispute,
            &mut escrow,
            request.outcome,
            request.admin_notes,
            request.admin_id,
            SETTLED_BY_RESOLUTION,
        )
        .await?;
        uow.commit().await?;

        tracing::info!(
            dispute_id = %dispute.id,
            escrow_id = %escrow.id,
            admin_id = %request.admin_id,
            outcome = %request.outcome,
            escrow_status = %escrow.status,
            "dispute resolved"
        );

        Ok(ResolutionReceipt {
            dispute_id: dispute.id,
            escrow_id: escrow.id,
            dispute_status: dispute.status,
            escrow_status: escrow.status,
            message: receipt_message(request.outcome.destination()).to_string(),
        })
    }
}

/// Closes a dispute and finalizes its escrow toward the outcome's payee. The
/// caller holds both row locks, taken dispute first. Nothing is written
/// unless both transitions are allowed.
pub(crate) async fn settle(
    uow: &mut dyn UnitOfWork,
    dispute: &mut Dispute,
    escrow: &mut EscrowTransaction,
    outcome: ResolutionOutcome,
    notes: String,
    admin_id: Uuid,
    settled_by: &str,
) -> EscrowResult<()> {
    let now = Utc::now();
    let dispute_before = dispute.status;
    let escrow_before = escrow.status;

    dispute.resolve(notes, admin_id, now)?;
    escrow.release(outcome.destination(), admin_id, now)?;

    uow.update_dispute(dispute).await?;
    uow.record_audit(&AuditEntry::new(
        dispute.id,
        audit::ENTITY_DISPUTE,
        ACTION_STATUS_CHANGED,
        Some(json!({ "status": dispute_before })),
        Some(json!({
            "status": dispute.status,
            "outcome": outcome,
            "escrow_status": escrow.status,
            "settled_by": settled_by,
        })),
        audit::actor(admin_id),
    ))
    .await?;
    persist_transition(uow, escrow_before, escrow, audit::actor(admin_id)).await
}

fn receipt_message(destination: ReleaseDestination) -> &'static str {
    match destination {
        ReleaseDestination::Merchant => "Dispute resolved. Funds will be released to merchant.",
        ReleaseDestination::Customer => "Dispute resolved. Funds will be refunded to customer.",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(outcome: &str, notes: &str) -> ResolveDisputeRequest {
        ResolveDisputeRequest {
            dispute_id: Uuid::new_v4(),
            outcome: outcome.to_string(),
            admin_notes: notes.to_string(),
            admin_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn validate_parses_outcome() {
        let valid = request("RELEASE_TO_MERCHANT", "delivery confirmed by courier")
            .validate()
            .unwrap();
        assert_eq!(valid.outcome, ResolutionOutcome::ReleaseToMerchant);
        assert_eq!(valid.admin_notes, "delivery confirmed by courier");
    }

    #[test]
    fn validate_rejects_unknown_outcome() {
        let err = request("SPLIT_FUNDS", "half each").validate().unwrap_err();
        assert_eq!(err.field, "outcome");
    }

    #[test]
    fn validate_rejects_blank_notes() {
        let err = request("REFUND_CUSTOMER", "  \u{0007} ").validate().unwrap_err();
        assert_eq!(err.field, "admin_notes");
    }

    #[test]
    fn receipt_messages_name_the_payee() {
        assert_eq!(
            receipt_message(ReleaseDestination::Merchant),
            "Dispute resolved. Funds will be released to merchant."
        );
        assert_eq!(
            receipt_message(ReleaseDestination::Customer),
            "Dispute resolved. Funds will be refunded to customer."
        );
    }
}
