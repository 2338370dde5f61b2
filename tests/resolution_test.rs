mod common;

use escrow_core::adapters::WriteKind;
use escrow_core::domain::{DisputeStatus, EscrowStatus};
use escrow_core::error::EscrowError;
use escrow_core::services::OpenDisputeRequest;
use uuid::Uuid;

use common::fixture;

#[tokio::test]
async fn test_refund_customer_closes_dispute_and_refunds() {
    let fx = fixture().await;
    let (escrow, dispute) = fx.disputed_escrow().await;

    let receipt = fx
        .core
        .resolve_dispute(fx.resolve_request(
            dispute.id,
            "REFUND_CUSTOMER",
            "Courier confirmed the parcel was lost.",
        ))
        .await
        .unwrap();

    assert_eq!(receipt.dispute_id, dispute.id);
    assert_eq!(receipt.escrow_id, escrow.id);
    assert_eq!(receipt.dispute_status, DisputeStatus::Resolved);
    assert_eq!(receipt.escrow_status, EscrowStatus::Refunded);
    assert_eq!(
        receipt.message,
        "Dispute resolved. Funds will be refunded to customer."
    );

    let details = fx.core.get_dispute_details(escrow.id).await.unwrap();
    assert_eq!(details.dispute.status, DisputeStatus::Resolved);
    assert_eq!(
        details.dispute.resolution.as_deref(),
        Some("Courier confirmed the parcel was lost.")
    );
    assert_eq!(details.dispute.resolved_by, Some(fx.admin.id));
    assert!(details.dispute.resolved_at.is_some());
    assert!(details.dispute.invariants_hold());

    assert_eq!(details.escrow.status, EscrowStatus::Refunded);
    assert_eq!(details.escrow.released_by, Some(fx.admin.id));
    assert_eq!(details.escrow.dispute_id, Some(dispute.id));
    assert!(details.escrow.invariants_hold());
}

#[tokio::test]
async fn test_release_to_merchant_releases_funds() {
    let fx = fixture().await;
    let (escrow, dispute) = fx.disputed_escrow().await;
    fx.core
        .disputes
        .begin_review(dispute.id, fx.admin.id)
        .await
        .unwrap();

    let receipt = fx
        .core
        .resolve_dispute(fx.resolve_request(
            dispute.id,
            "RELEASE_TO_MERCHANT",
            "Signed proof of delivery on file.",
        ))
        .await
        .unwrap();

    assert_eq!(receipt.escrow_status, EscrowStatus::Released);
    assert_eq!(
        receipt.message,
        "Dispute resolved. Funds will be released to merchant."
    );
    let escrow = fx.escrow(escrow.id).await;
    assert_eq!(escrow.status, EscrowStatus::Released);
    assert!(escrow.released_at.is_some());
}

#[tokio::test]
async fn test_resolution_requires_notes() {
    let fx = fixture().await;
    let (escrow, dispute) = fx.disputed_escrow().await;

    let err = fx
        .core
        .resolve_dispute(fx.resolve_request(dispute.id, "REFUND_CUSTOMER", "   "))
        .await
        .unwrap_err();
    assert!(matches!(err, EscrowError::ValidationFailed(ref v) if v.field == "admin_notes"));

    let details = fx.core.get_dispute_details(escrow.id).await.unwrap();
    assert_eq!(details.dispute, dispute);
    assert_eq!(details.escrow, escrow);
}

#[tokio::test]
async fn test_resolution_rejects_unknown_outcome() {
    let fx = fixture().await;
    let (escrow, dispute) = fx.disputed_escrow().await;

    let err = fx
        .core
        .resolve_dispute(fx.resolve_request(dispute.id, "SPLIT_FUNDS", "Half each"))
        .await
        .unwrap_err();
    assert!(matches!(err, EscrowError::ValidationFailed(ref v) if v.field == "outcome"));
    assert_eq!(fx.escrow(escrow.id).await.status, EscrowStatus::Disputed);
}

#[tokio::test]
async fn test_second_resolution_conflicts_and_changes_nothing() {
    let fx = fixture().await;
    let (escrow, dispute) = fx.disputed_escrow().await;
    fx.core
        .resolve_dispute(fx.resolve_request(dispute.id, "REFUND_CUSTOMER", "Item lost"))
        .await
        .unwrap();
    let settled = fx.core.get_dispute_details(escrow.id).await.unwrap();

    let err = fx
        .core
        .resolve_dispute(fx.resolve_request(
            dispute.id,
            "RELEASE_TO_MERCHANT",
            "Second thoughts",
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, EscrowError::Conflict(_)));
    assert!(!err.is_retryable());

    let after = fx.core.get_dispute_details(escrow.id).await.unwrap();
    assert_eq!(after, settled);
    assert_eq!(after.escrow.status, EscrowStatus::Refunded);
}

#[tokio::test]
async fn test_resolution_of_missing_dispute() {
    let fx = fixture().await;
    let err = fx
        .core
        .resolve_dispute(fx.resolve_request(Uuid::new_v4(), "REFUND_CUSTOMER", "n/a"))
        .await
        .unwrap_err();
    assert!(matches!(err, EscrowError::NotFound { entity: "dispute", .. }));
}

#[tokio::test]
async fn test_resolution_is_atomic_when_escrow_write_fails() {
    let fx = fixture().await;
    let (escrow, dispute) = fx.disputed_escrow().await;
    let request = fx.resolve_request(dispute.id, "RELEASE_TO_MERCHANT", "Delivered");

    fx.store.fail_next(WriteKind::UpdateEscrow).await;
    let err = fx.core.resolve_dispute(request.clone()).await.unwrap_err();
    assert!(matches!(err, EscrowError::Persistence(_)));
    assert!(err.is_retryable());

    let details = fx.core.get_dispute_details(escrow.id).await.unwrap();
    assert_eq!(details.dispute, dispute);
    assert_eq!(details.escrow, escrow);

    let receipt = fx.core.resolve_dispute(request).await.unwrap();
    assert_eq!(receipt.escrow_status, EscrowStatus::Released);
}

#[tokio::test]
async fn test_resolution_is_atomic_when_commit_fails() {
    let fx = fixture().await;
    let (escrow, dispute) = fx.disputed_escrow().await;
    let trail_before = fx.core.ledger.audit_trail(dispute.id, 50).await.unwrap();

    fx.store.fail_next(WriteKind::Commit).await;
    let err = fx
        .core
        .resolve_dispute(fx.resolve_request(dispute.id, "REFUND_CUSTOMER", "Lost"))
        .await
        .unwrap_err();
    assert!(matches!(err, EscrowError::Persistence(_)));

    let details = fx.core.get_dispute_details(escrow.id).await.unwrap();
    assert_eq!(details.dispute.status, dispute.status);
    assert_eq!(details.escrow.status, EscrowStatus::Disputed);
    assert_eq!(
        fx.core.ledger.audit_trail(dispute.id, 50).await.unwrap(),
        trail_before
    );
}

#[tokio::test]
async fn test_concurrent_resolutions_settle_exactly_once() {
    let fx = fixture().await;
    let (escrow, dispute) = fx.disputed_escrow().await;

    let mut handles = Vec::new();
    for attempt in 0..8 {
        let core = fx.core.clone();
        let outcome = if attempt % 2 == 0 {
            "REFUND_CUSTOMER"
        } else {
            "RELEASE_TO_MERCHANT"
        };
        let request = fx.resolve_request(dispute.id, outcome, "Concurrent decision");
        handles.push(tokio::spawn(async move { core.resolve_dispute(request).await }));
    }

    let mut receipts = Vec::new();
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(receipt) => receipts.push(receipt),
            Err(EscrowError::Conflict(_)) => conflicts += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(receipts.len(), 1);
    assert_eq!(conflicts, 7);

    let escrow = fx.escrow(escrow.id).await;
    assert_eq!(escrow.status, receipts[0].escrow_status);
    assert!(escrow.invariants_hold());

    let escrow_changes = fx
        .core
        .ledger
        .audit_trail(escrow.id, 50)
        .await
        .unwrap()
        .into_iter()
        .filter(|entry| entry.action == "status_changed")
        .count();
    // ACTIVE -> DISPUTED, then the single resolution.
    assert_eq!(escrow_changes, 2);
}

#[tokio::test]
async fn test_release_to_missing_merchant_is_rejected() {
    let fx = fixture().await;
    let mut request = fx.new_escrow_request("3000.00");
    request.merchant_id = None;
    let escrow = fx.core.ledger.hold(request).await.unwrap();
    let dispute = fx
        .core
        .open_dispute(OpenDisputeRequest {
            escrow_id: escrow.id,
            filed_by: fx.customer.id,
            reason: "Never shipped".to_string(),
        })
        .await
        .unwrap();

    let err = fx
        .core
        .resolve_dispute(fx.resolve_request(dispute.id, "RELEASE_TO_MERCHANT", "Pay out"))
        .await
        .unwrap_err();
    assert!(matches!(err, EscrowError::InvalidTransition { .. }));

    let details = fx.core.get_dispute_details(escrow.id).await.unwrap();
    assert_eq!(details.dispute.status, DisputeStatus::Open);
    assert_eq!(details.escrow.status, EscrowStatus::Disputed);

    let receipt = fx
        .core
        .resolve_dispute(fx.resolve_request(dispute.id, "REFUND_CUSTOMER", "Refund instead"))
        .await
        .unwrap();
    assert_eq!(receipt.escrow_status, EscrowStatus::Refunded);
}

#[tokio::test]
async fn test_resolution_leaves_audit_trail_for_both_records() {
    let fx = fixture().await;
    let (escrow, dispute) = fx.disputed_escrow().await;
    fx.core
        .resolve_dispute(fx.resolve_request(dispute.id, "REFUND_CUSTOMER", "Lost in transit"))
        .await
        .unwrap();

    let actor = format!("user:{}", fx.admin.id);

    let dispute_trail = fx.core.ledger.audit_trail(dispute.id, 10).await.unwrap();
    let latest = &dispute_trail[0];
    assert_eq!(latest.action, "status_changed");
    assert_eq!(latest.actor, actor);
    let new_val = latest.new_val.as_ref().unwrap();
    assert_eq!(new_val["status"], "RESOLVED");
    assert_eq!(new_val["outcome"], "REFUND_CUSTOMER");
    assert_eq!(new_val["escrow_status"], "REFUNDED");

    let escrow_trail = fx.core.ledger.audit_trail(escrow.id, 10).await.unwrap();
    assert_eq!(escrow_trail[0].actor, actor);
    assert_eq!(escrow_trail[0].old_val.as_ref().unwrap(), "DISPUTED");
    assert_eq!(escrow_trail[0].new_val.as_ref().unwrap(), "REFUNDED");
}
