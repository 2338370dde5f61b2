//! Dispute case: filing, evidence, and review.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::domain::audit::{self, AuditEntry, ENTITY_DISPUTE_EVIDENCE};
use crate::domain::dispute::ENTITY_DISPUTE;
use crate::domain::escrow::ENTITY_ESCROW;
use crate::domain::{Dispute, DisputeEvidence, EvidenceByParty};
use crate::error::{EscrowError, EscrowResult};
use crate::ports::{EscrowStore, UnitOfWork};
use crate::services::ledger::{lock_escrow, mark_disputed};
use crate::services::log_failure;
use crate::validation::{
    optional_text, required_text, ValidationError, DESCRIPTION_MAX_LEN, FILE_REF_MAX_LEN,
    REASON_MAX_LEN,
};

#[derive(Debug, Clone, Deserialize)]
pub struct OpenDisputeRequest {
    pub escrow_id: Uuid,
    pub filed_by: Uuid,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct ValidatedOpenDispute {
    pub escrow_id: Uuid,
    pub filed_by: Uuid,
    pub reason: String,
}

impl OpenDisputeRequest {
    pub fn validate(self) -> Result<ValidatedOpenDispute, ValidationError> {
        Ok(ValidatedOpenDispute {
            escrow_id: self.escrow_id,
            filed_by: self.filed_by,
            reason: required_text("reason", &self.reason, REASON_MAX_LEN)?,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttachEvidenceRequest {
    pub dispute_id: Uuid,
    pub uploaded_by: Uuid,
    pub file_ref: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ValidatedAttachEvidence {
    pub dispute_id: Uuid,
    pub uploaded_by: Uuid,
    pub file_ref: String,
    pub description: Option<String>,
}

impl AttachEvidenceRequest {
    pub fn validate(self) -> Result<ValidatedAttachEvidence, ValidationError> {
        let file_ref = self.file_ref.trim();
        if file_ref.chars().any(char::is_whitespace) {
            return Err(ValidationError::new(
                "file_ref",
                "must be a storage reference without whitespace",
            ));
        }

        Ok(ValidatedAttachEvidence {
            dispute_id: self.dispute_id,
            uploaded_by: self.uploaded_by,
            file_ref: required_text("file_ref", file_ref, FILE_REF_MAX_LEN)?,
            description: optional_text(
                "description",
                self.description.as_deref(),
                DESCRIPTION_MAX_LEN,
            )?,
        })
    }
}

#[derive(Clone)]
pub struct DisputeCase {
    store: Arc<dyn EscrowStore>,
}

impl DisputeCase {
    pub fn new(store: Arc<dyn EscrowStore>) -> Self {
        Self { store }
    }

    /// Files a dispute against an `ACTIVE` escrow and freezes the escrow in
    /// the same unit of work.
    pub async fn open(&self, request: OpenDisputeRequest) -> EscrowResult<Dispute> {
        let request = request
            .validate()
            .map_err(|e| log_failure("open_dispute", e.into()))?;
        self.open_validated(request)
            .await
            .map_err(|e| log_failure("open_dispute", e))
    }

    async fn open_validated(&self, request: ValidatedOpenDispute) -> EscrowResult<Dispute> {
        let mut uow = self.store.begin().await?;
        let mut escrow = lock_escrow(uow.as_mut(), request.escrow_id).await?;
        escrow.ensure_active("dispute")?;

        // The dispute row goes first: the escrow references it.
        let dispute = Dispute::open(escrow.id, request.filed_by, request.reason);
        uow.insert_dispute(&dispute).await?;
        uow.record_audit(&AuditEntry::creation(
            dispute.id,
            audit::ENTITY_DISPUTE,
            json!({
                "escrow_transaction_id": dispute.escrow_transaction_id,
                "status": dispute.status,
            }),
            audit::actor(dispute.filed_by),
        ))
        .await?;
        mark_disputed(
            uow.as_mut(),
            &mut escrow,
            &dispute,
            audit::actor(dispute.filed_by),
        )
        .await?;
        uow.commit().await?;

        tracing::info!(
            dispute_id = %dispute.id,
            escrow_id = %escrow.id,
            filed_by = %dispute.filed_by,
            "dispute opened"
        );
        Ok(dispute)
    }

    pub async fn attach_evidence(
        &self,
        request: AttachEvidenceRequest,
    ) -> EscrowResult<DisputeEvidence> {
        let request = request
            .validate()
            .map_err(|e| log_failure("attach_evidence", e.into()))?;
        self.attach_validated(request)
            .await
            .map_err(|e| log_failure("attach_evidence", e))
    }

    async fn attach_validated(
        &self,
        request: ValidatedAttachEvidence,
    ) -> EscrowResult<DisputeEvidence> {
        let mut uow = self.store.begin().await?;
        // Locked so a concurrent resolution cannot slip in between the
        // status check and the insert.
        let dispute = lock_dispute(uow.as_mut(), request.dispute_id).await?;
        dispute.ensure_accepts_evidence()?;

        let evidence = DisputeEvidence::new(
            dispute.id,
            request.uploaded_by,
            request.file_ref,
            request.description,
        );
        uow.insert_evidence(&evidence).await?;
        uow.record_audit(&AuditEntry::creation(
            evidence.id,
            ENTITY_DISPUTE_EVIDENCE,
            json!({ "dispute_id": dispute.id, "file_ref": evidence.file_ref }),
            audit::actor(evidence.uploaded_by),
        ))
        .await?;
        uow.commit().await?;

        tracing::info!(
            dispute_id = %dispute.id,
            evidence_id = %evidence.id,
            uploaded_by = %evidence.uploaded_by,
            "evidence attached"
        );
        Ok(evidence)
    }

    /// Evidence grouped by the escrow party that uploaded it.
    pub async fn list_evidence_by_party(&self, dispute_id: Uuid) -> EscrowResult<EvidenceByParty> {
        self.list_evidence_inner(dispute_id)
            .await
            .map_err(|e| log_failure("list_evidence", e))
    }

    async fn list_evidence_inner(&self, dispute_id: Uuid) -> EscrowResult<EvidenceByParty> {
        let mut uow = self.store.snapshot().await?;
        let dispute = uow
            .find_dispute(dispute_id)
            .await?
            .ok_or_else(|| EscrowError::not_found(ENTITY_DISPUTE, dispute_id))?;
        let escrow = uow
            .find_escrow(dispute.escrow_transaction_id)
            .await?
            .ok_or_else(|| EscrowError::not_found(ENTITY_ESCROW, dispute.escrow_transaction_id))?;
        let evidence = uow.list_evidence(dispute.id).await?;
        uow.rollback().await?;

        Ok(EvidenceByParty::partition(evidence, &escrow))
    }

    /// An adjudicator picks up an `OPEN` dispute.
    pub async fn begin_review(&self, dispute_id: Uuid, admin_id: Uuid) -> EscrowResult<Dispute> {
        self.begin_review_inner(dispute_id, admin_id)
            .await
            .map_err(|e| log_failure("begin_review", e))
    }

    async fn begin_review_inner(&self, dispute_id: Uuid, admin_id: Uuid) -> EscrowResult<Dispute> {
        let mut uow = self.store.begin().await?;
        let mut dispute = lock_dispute(uow.as_mut(), dispute_id).await?;

        let before = dispute.status;
        dispute.begin_review(Utc::now())?;
        uow.update_dispute(&dispute).await?;
        uow.record_audit(&AuditEntry::status_change(
            dispute.id,
            audit::ENTITY_DISPUTE,
            before.as_str(),
            dispute.status.as_str(),
            audit::actor(admin_id),
        ))
        .await?;
        uow.commit().await?;

        tracing::info!(dispute_id = %dispute.id, admin_id = %admin_id, "dispute under review");
        Ok(dispute)
    }
}

pub(crate) async fn lock_dispute(
    uow: &mut dyn UnitOfWork,
    dispute_id: Uuid,
) -> EscrowResult<Dispute> {
    uow.lock_dispute(dispute_id)
        .await?
        .ok_or_else(|| EscrowError::not_found(ENTITY_DISPUTE, dispute_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_request_requires_reason() {
        let request = OpenDisputeRequest {
            escrow_id: Uuid::new_v4(),
            filed_by: Uuid::new_v4(),
            reason: " \t ".to_string(),
        };
        assert_eq!(request.validate().unwrap_err().field, "reason");
    }

    #[test]
    fn evidence_request_trims_and_drops_blank_description() {
        let request = AttachEvidenceRequest {
            dispute_id: Uuid::new_v4(),
            uploaded_by: Uuid::new_v4(),
            file_ref: "  s3://evidence/photo.jpg ".to_string(),
            description: Some("   ".to_string()),
        };
        let valid = request.validate().unwrap();
        assert_eq!(valid.file_ref, "s3://evidence/photo.jpg");
        assert!(valid.description.is_none());
    }

    #[test]
    fn evidence_request_rejects_empty_or_spaced_ref() {
        let mut request = AttachEvidenceRequest {
            dispute_id: Uuid::new_v4(),
            uploaded_by: Uuid::new_v4(),
            file_ref: "".to_string(),
            description: None,
        };
        assert_eq!(request.clone().validate().unwrap_err().field, "file_ref");

        request.file_ref = "s3://evidence/my photo.jpg".to_string();
        assert_eq!(request.validate().unwrap_err().field, "file_ref");
    }
}
