mod common;

use escrow_core::adapters::WriteKind;
use escrow_core::domain::{DisputeStatus, EscrowStatus};
use escrow_core::error::EscrowError;
use escrow_core::services::{AttachEvidenceRequest, OpenDisputeRequest};
use uuid::Uuid;

use common::{fixture, user};

fn evidence(dispute_id: Uuid, uploaded_by: Uuid, file_ref: &str) -> AttachEvidenceRequest {
    AttachEvidenceRequest {
        dispute_id,
        uploaded_by,
        file_ref: file_ref.to_string(),
        description: None,
    }
}

#[tokio::test]
async fn test_open_dispute_freezes_escrow() {
    let fx = fixture().await;
    let escrow = fx.active_escrow().await;

    let dispute = fx
        .core
        .open_dispute(OpenDisputeRequest {
            escrow_id: escrow.id,
            filed_by: fx.customer.id,
            reason: "  Package arrived   empty ".to_string(),
        })
        .await
        .unwrap();

    assert_eq!(dispute.status, DisputeStatus::Open);
    assert_eq!(dispute.escrow_transaction_id, escrow.id);
    assert_eq!(dispute.reason, "Package arrived empty");

    let escrow = fx.escrow(escrow.id).await;
    assert_eq!(escrow.status, EscrowStatus::Disputed);
    assert_eq!(escrow.dispute_id, Some(dispute.id));
    assert!(escrow.invariants_hold());
}

#[tokio::test]
async fn test_second_dispute_on_same_escrow_is_rejected_without_changes() {
    let fx = fixture().await;
    let (escrow, _) = fx.disputed_escrow().await;

    let err = fx
        .core
        .open_dispute(OpenDisputeRequest {
            escrow_id: escrow.id,
            filed_by: fx.merchant.id,
            reason: "Customer is lying".to_string(),
        })
        .await
        .unwrap_err();

    assert!(matches!(err, EscrowError::InvalidTransition { .. }));
    assert_eq!(fx.escrow(escrow.id).await, escrow);
}

#[tokio::test]
async fn test_open_dispute_on_missing_escrow() {
    let fx = fixture().await;
    let err = fx
        .core
        .open_dispute(OpenDisputeRequest {
            escrow_id: Uuid::new_v4(),
            filed_by: fx.customer.id,
            reason: "No such order".to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, EscrowError::NotFound { .. }));
}

#[tokio::test]
async fn test_open_dispute_requires_reason() {
    let fx = fixture().await;
    let escrow = fx.active_escrow().await;

    let err = fx
        .core
        .open_dispute(OpenDisputeRequest {
            escrow_id: escrow.id,
            filed_by: fx.customer.id,
            reason: "\u{0000}  ".to_string(),
        })
        .await
        .unwrap_err();

    assert!(matches!(err, EscrowError::ValidationFailed(ref v) if v.field == "reason"));
    assert_eq!(fx.escrow(escrow.id).await.status, EscrowStatus::Active);
}

#[tokio::test]
async fn test_open_dispute_is_atomic() {
    let fx = fixture().await;
    let escrow = fx.active_escrow().await;
    let request = OpenDisputeRequest {
        escrow_id: escrow.id,
        filed_by: fx.customer.id,
        reason: "Wrong size delivered".to_string(),
    };

    fx.store.fail_next(WriteKind::UpdateEscrow).await;
    let err = fx.core.open_dispute(request.clone()).await.unwrap_err();
    assert!(matches!(err, EscrowError::Persistence(_)));
    assert_eq!(fx.escrow(escrow.id).await, escrow);
    assert!(fx.core.get_dispute_details(escrow.id).await.is_err());

    let dispute = fx.core.open_dispute(request).await.unwrap();
    assert_eq!(fx.escrow(escrow.id).await.dispute_id, Some(dispute.id));
}

#[tokio::test]
async fn test_evidence_accepted_until_resolution() {
    let fx = fixture().await;
    let (_, dispute) = fx.disputed_escrow().await;

    let photo = fx
        .core
        .attach_evidence(AttachEvidenceRequest {
            description: Some("Photo of the empty box".to_string()),
            ..evidence(dispute.id, fx.customer.id, "s3://evidence/box.jpg")
        })
        .await
        .unwrap();
    assert_eq!(photo.dispute_id, dispute.id);
    assert_eq!(photo.description.as_deref(), Some("Photo of the empty box"));

    fx.core
        .disputes
        .begin_review(dispute.id, fx.admin.id)
        .await
        .unwrap();
    fx.core
        .attach_evidence(evidence(dispute.id, fx.merchant.id, "s3://evidence/waybill.pdf"))
        .await
        .unwrap();

    fx.core
        .resolve_dispute(fx.resolve_request(
            dispute.id,
            "REFUND_CUSTOMER",
            "Courier confirmed loss",
        ))
        .await
        .unwrap();

    let err = fx
        .core
        .attach_evidence(evidence(dispute.id, fx.customer.id, "s3://evidence/late.jpg"))
        .await
        .unwrap_err();
    assert!(matches!(err, EscrowError::DisputeClosed(id) if id == dispute.id));
    assert_eq!(err.user_message(), "This dispute is closed to new evidence.");

    let buckets = fx
        .core
        .disputes
        .list_evidence_by_party(dispute.id)
        .await
        .unwrap();
    assert_eq!(buckets.len(), 2);
}

#[tokio::test]
async fn test_evidence_for_missing_dispute() {
    let fx = fixture().await;
    let err = fx
        .core
        .attach_evidence(evidence(Uuid::new_v4(), fx.customer.id, "s3://evidence/a.jpg"))
        .await
        .unwrap_err();
    assert!(matches!(err, EscrowError::NotFound { entity: "dispute", .. }));
}

#[tokio::test]
async fn test_evidence_insert_rolls_back_with_audit_failure() {
    let fx = fixture().await;
    let (_, dispute) = fx.disputed_escrow().await;

    fx.store.fail_next(WriteKind::RecordAudit).await;
    let err = fx
        .core
        .attach_evidence(evidence(dispute.id, fx.customer.id, "s3://evidence/a.jpg"))
        .await
        .unwrap_err();
    assert!(matches!(err, EscrowError::Persistence(_)));

    let buckets = fx
        .core
        .disputes
        .list_evidence_by_party(dispute.id)
        .await
        .unwrap();
    assert!(buckets.is_empty());
}

#[tokio::test]
async fn test_evidence_grouped_by_party_keeps_outsiders() {
    let fx = fixture().await;
    let (_, dispute) = fx.disputed_escrow().await;
    let courier = user("Swift Couriers", "MERCHANT");

    for (uploader, file_ref) in [
        (fx.customer.id, "s3://evidence/chat.png"),
        (fx.merchant.id, "s3://evidence/pod.pdf"),
        (fx.customer.id, "s3://evidence/box.jpg"),
        (courier.id, "s3://evidence/tracking.csv"),
    ] {
        fx.core
            .attach_evidence(evidence(dispute.id, uploader, file_ref))
            .await
            .unwrap();
    }

    let buckets = fx
        .core
        .disputes
        .list_evidence_by_party(dispute.id)
        .await
        .unwrap();
    assert_eq!(buckets.customer.len(), 2);
    assert_eq!(buckets.merchant.len(), 1);
    assert_eq!(buckets.other.len(), 1);
    assert_eq!(buckets.other[0].uploaded_by, courier.id);
}

#[tokio::test]
async fn test_begin_review_moves_open_dispute_only() {
    let fx = fixture().await;
    let (_, dispute) = fx.disputed_escrow().await;

    let reviewed = fx
        .core
        .disputes
        .begin_review(dispute.id, fx.admin.id)
        .await
        .unwrap();
    assert_eq!(reviewed.status, DisputeStatus::UnderReview);
    assert!(reviewed.invariants_hold());

    let err = fx
        .core
        .disputes
        .begin_review(dispute.id, fx.admin.id)
        .await
        .unwrap_err();
    assert!(matches!(err, EscrowError::InvalidTransition { .. }));

    let trail = fx.core.ledger.audit_trail(dispute.id, 10).await.unwrap();
    assert_eq!(trail[0].action, "status_changed");
    assert_eq!(trail[0].actor, format!("user:{}", fx.admin.id));
}

#[tokio::test]
async fn test_dispute_details_read_model() {
    let fx = fixture().await;
    let (escrow, dispute) = fx.disputed_escrow().await;
    fx.core
        .attach_evidence(evidence(dispute.id, fx.customer.id, "s3://evidence/box.jpg"))
        .await
        .unwrap();
    fx.core
        .attach_evidence(evidence(dispute.id, fx.merchant.id, "s3://evidence/pod.pdf"))
        .await
        .unwrap();

    let details = fx.core.get_dispute_details(escrow.id).await.unwrap();
    assert_eq!(details.escrow, escrow);
    assert_eq!(details.dispute, dispute);
    assert_eq!(details.customer.as_ref(), Some(&fx.customer));
    assert_eq!(details.merchant.as_ref(), Some(&fx.merchant));
    assert_eq!(details.evidence.customer.len(), 1);
    assert_eq!(details.evidence.merchant.len(), 1);
    assert!(details.evidence.other.is_empty());
}

#[tokio::test]
async fn test_dispute_details_requires_a_dispute() {
    let fx = fixture().await;
    let escrow = fx.active_escrow().await;

    let err = fx.core.get_dispute_details(escrow.id).await.unwrap_err();
    assert!(matches!(err, EscrowError::NotFound { entity: "dispute", .. }));

    let err = fx.core.get_dispute_details(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, EscrowError::NotFound { .. }));
}

#[tokio::test]
async fn test_dispute_details_without_merchant() {
    let fx = fixture().await;
    let mut request = fx.new_escrow_request("12.50");
    request.merchant_id = None;
    let escrow = fx.core.ledger.hold(request).await.unwrap();
    fx.core
        .open_dispute(OpenDisputeRequest {
            escrow_id: escrow.id,
            filed_by: fx.customer.id,
            reason: "Seller vanished".to_string(),
        })
        .await
        .unwrap();

    let details = fx.core.get_dispute_details(escrow.id).await.unwrap();
    assert!(details.merchant.is_none());
    assert_eq!(details.customer.as_ref(), Some(&fx.customer));
}
