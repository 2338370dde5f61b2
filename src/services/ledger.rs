//! Escrow ledger: custody of held funds and the escrow state machine.

use std::sync::Arc;

use bigdecimal::BigDecimal;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::domain::audit::{self, AuditEntry, ACTOR_SYSTEM, ENTITY_ESCROW_TRANSACTION};
use crate::domain::escrow::ENTITY_ESCROW;
use crate::domain::{
    Dispute, EscrowRef, EscrowStatus, EscrowTransaction, ReleaseDestination, ResolutionOutcome,
};
use crate::error::{EscrowError, EscrowResult};
use crate::ports::{EscrowStore, UnitOfWork};
use crate::services::disputes::lock_dispute;
use crate::services::log_failure;
use crate::services::resolution::{settle, SETTLED_BY_LEDGER_RELEASE};
use crate::utils::cursor;
use crate::validation::{validate_currency, validate_positive_amount, ValidationError};

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;
pub const MAX_AUDIT_ENTRIES: i64 = 200;

pub(crate) const ENTITY_USER: &str = "user";

/// Funds for an order entering custody.
#[derive(Debug, Clone, Deserialize)]
pub struct NewEscrowRequest {
    pub order_id: Uuid,
    pub customer_id: Uuid,
    pub merchant_id: Option<Uuid>,
    pub amount: BigDecimal,
    pub currency: String,
}

#[derive(Debug, Clone)]
pub struct ValidatedNewEscrow {
    pub order_id: Uuid,
    pub customer_id: Uuid,
    pub merchant_id: Option<Uuid>,
    pub amount: BigDecimal,
    pub currency: String,
}

impl NewEscrowRequest {
    pub fn validate(self) -> Result<ValidatedNewEscrow, ValidationError> {
        validate_positive_amount(&self.amount)?;
        let currency = validate_currency(&self.currency)?;
        if self.merchant_id == Some(self.customer_id) {
            return Err(ValidationError::new(
                "merchant_id",
                "must differ from customer_id",
            ));
        }

        Ok(ValidatedNewEscrow {
            order_id: self.order_id,
            customer_id: self.customer_id,
            merchant_id: self.merchant_id,
            amount: self.amount,
            currency,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EscrowListQuery {
    pub status: Option<EscrowStatus>,
    pub cursor: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EscrowPage {
    pub items: Vec<EscrowTransaction>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EscrowStatusCount {
    pub status: EscrowStatus,
    pub count: i64,
}

#[derive(Clone)]
pub struct EscrowLedger {
    store: Arc<dyn EscrowStore>,
}

impl EscrowLedger {
    pub fn new(store: Arc<dyn EscrowStore>) -> Self {
        Self { store }
    }

    /// Places an order's funds in custody as a new `ACTIVE` escrow.
    pub async fn hold(&self, request: NewEscrowRequest) -> EscrowResult<EscrowTransaction> {
        let request = request
            .validate()
            .map_err(|e| log_failure("hold", e.into()))?;
        self.hold_validated(request)
            .await
            .map_err(|e| log_failure("hold", e))
    }

    async fn hold_validated(&self, request: ValidatedNewEscrow) -> EscrowResult<EscrowTransaction> {
        let mut uow = self.store.begin().await?;

        require_user(uow.as_mut(), request.customer_id).await?;
        if let Some(merchant_id) = request.merchant_id {
            require_user(uow.as_mut(), merchant_id).await?;
        }
        if uow.find_escrow_by_order(request.order_id).await?.is_some() {
            return Err(EscrowError::Conflict(format!(
                "order {} already has an escrow",
                request.order_id
            )));
        }

        let escrow = EscrowTransaction::new(
            request.order_id,
            request.customer_id,
            request.merchant_id,
            request.amount,
            request.currency,
        );
        uow.insert_escrow(&escrow).await?;
        uow.record_audit(&AuditEntry::creation(
            escrow.id,
            ENTITY_ESCROW_TRANSACTION,
            json!({
                "order_id": escrow.order_id,
                "amount": escrow.amount.to_string(),
                "currency": escrow.currency,
                "status": escrow.status,
            }),
            ACTOR_SYSTEM,
        ))
        .await?;
        uow.commit().await?;

        tracing::info!(
            escrow_id = %escrow.id,
            order_id = %escrow.order_id,
            amount = %escrow.amount,
            currency = %escrow.currency,
            "escrow opened"
        );
        Ok(escrow)
    }

    pub async fn get_by_order_or_id(
        &self,
        reference: EscrowRef,
    ) -> EscrowResult<EscrowTransaction> {
        self.lookup(reference)
            .await
            .map_err(|e| log_failure("get_escrow", e))
    }

    async fn lookup(&self, reference: EscrowRef) -> EscrowResult<EscrowTransaction> {
        let mut uow = self.store.snapshot().await?;
        let found = match reference {
            EscrowRef::Id(id) => uow.find_escrow(id).await?,
            EscrowRef::Order(order_id) => uow.find_escrow_by_order(order_id).await?,
        };
        uow.rollback().await?;
        found.ok_or_else(|| EscrowError::not_found(ENTITY_ESCROW, reference))
    }

    /// Entry point for the holding-period trigger: `ACTIVE → PENDING_RELEASE`.
    pub async fn mark_pending_release(&self, escrow_id: Uuid) -> EscrowResult<EscrowTransaction> {
        self.mark_pending_release_inner(escrow_id)
            .await
            .map_err(|e| log_failure("mark_pending_release", e))
    }

    async fn mark_pending_release_inner(&self, escrow_id: Uuid) -> EscrowResult<EscrowTransaction> {
        let mut uow = self.store.begin().await?;
        let mut escrow = lock_escrow(uow.as_mut(), escrow_id).await?;

        let before = escrow.status;
        escrow.mark_pending_release(Utc::now())?;
        persist_transition(uow.as_mut(), before, &escrow, ACTOR_SYSTEM).await?;
        uow.commit().await?;

        tracing::info!(escrow_id = %escrow.id, "escrow pending release");
        Ok(escrow)
    }

    /// Finalizes an escrow. A `DISPUTED` escrow is settled together with its
    /// dispute, which is closed with a note recording the direct release.
    pub async fn release(
        &self,
        escrow_id: Uuid,
        admin_id: Uuid,
        destination: ReleaseDestination,
    ) -> EscrowResult<EscrowTransaction> {
        self.release_inner(escrow_id, admin_id, destination)
            .await
            .map_err(|e| log_failure("release", e))
    }

    async fn release_inner(
        &self,
        escrow_id: Uuid,
        admin_id: Uuid,
        destination: ReleaseDestination,
    ) -> EscrowResult<EscrowTransaction> {
        let mut uow = self.store.begin().await?;

        // Locks are taken dispute first, then escrow, as the resolution
        // engine does.
        let linked = match uow.find_escrow(escrow_id).await? {
            Some(escrow) if escrow.status == EscrowStatus::Disputed => escrow.dispute_id,
            Some(_) => None,
            None => return Err(EscrowError::not_found(ENTITY_ESCROW, escrow_id)),
        };
        let dispute = match linked {
            Some(dispute_id) => Some(lock_dispute(uow.as_mut(), dispute_id).await?),
            None => None,
        };
        let mut escrow = lock_escrow(uow.as_mut(), escrow_id).await?;

        let settled_dispute = match dispute {
            Some(mut dispute) => {
                settle(
                    uow.as_mut(),
                    &mut dispute,
                    &mut escrow,
                    ResolutionOutcome::from(destination),
                    ledger_release_note(destination).to_string(),
                    admin_id,
                    SETTLED_BY_LEDGER_RELEASE,
                )
                .await?;
                Some(dispute.id)
            }
            None => {
                if escrow.status == EscrowStatus::Disputed {
                    return Err(EscrowError::Conflict(format!(
                        "escrow {} was disputed while being released",
                        escrow.id
                    )));
                }
                let before = escrow.status;
                escrow.release(destination, admin_id, Utc::now())?;
                persist_transition(uow.as_mut(), before, &escrow, audit::actor(admin_id))
                    .await?;
                None
            }
        };
        uow.commit().await?;

        tracing::info!(
            escrow_id = %escrow.id,
            admin_id = %admin_id,
            status = %escrow.status,
            dispute_id = ?settled_dispute,
            "escrow finalized"
        );
        Ok(escrow)
    }

    /// Newest first, optionally filtered by status.
    pub async fn list(&self, query: EscrowListQuery) -> EscrowResult<EscrowPage> {
        self.list_inner(query)
            .await
            .map_err(|e| log_failure("list_escrows", e))
    }

    async fn list_inner(&self, query: EscrowListQuery) -> EscrowResult<EscrowPage> {
        let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE);
        if !(1..=MAX_PAGE_SIZE).contains(&limit) {
            return Err(ValidationError::new(
                "limit",
                format!("must be between 1 and {}", MAX_PAGE_SIZE),
            )
            .into());
        }
        let after = query
            .cursor
            .as_deref()
            .map(cursor::decode)
            .transpose()
            .map_err(|e| ValidationError::new("cursor", e))?;

        let mut uow = self.store.snapshot().await?;
        let mut items = uow.list_escrows(query.status, after, limit + 1).await?;
        uow.rollback().await?;

        let next_cursor = if items.len() as i64 > limit {
            items.truncate(limit as usize);
            items
                .last()
                .map(|last| cursor::encode(last.created_at, last.id))
        } else {
            None
        };

        Ok(EscrowPage { items, next_cursor })
    }

    /// One entry per status, zeros included.
    pub async fn status_counts(&self) -> EscrowResult<Vec<EscrowStatusCount>> {
        self.status_counts_inner()
            .await
            .map_err(|e| log_failure("escrow_status_counts", e))
    }

    async fn status_counts_inner(&self) -> EscrowResult<Vec<EscrowStatusCount>> {
        let mut uow = self.store.snapshot().await?;
        let counts = uow.escrow_status_counts().await?;
        uow.rollback().await?;

        Ok(EscrowStatus::ALL
            .into_iter()
            .map(|status| EscrowStatusCount {
                status,
                count: counts.get(&status).copied().unwrap_or(0),
            })
            .collect())
    }

    /// Audit entries for any escrow, dispute or ticket id, newest first.
    pub async fn audit_trail(&self, entity_id: Uuid, limit: i64) -> EscrowResult<Vec<AuditEntry>> {
        self.audit_trail_inner(entity_id, limit.clamp(1, MAX_AUDIT_ENTRIES))
            .await
            .map_err(|e| log_failure("audit_trail", e))
    }

    async fn audit_trail_inner(
        &self,
        entity_id: Uuid,
        limit: i64,
    ) -> EscrowResult<Vec<AuditEntry>> {
        let mut uow = self.store.snapshot().await?;
        let entries = uow.list_audit(entity_id, limit).await?;
        uow.rollback().await?;
        Ok(entries)
    }
}

pub(crate) async fn lock_escrow(
    uow: &mut dyn UnitOfWork,
    escrow_id: Uuid,
) -> EscrowResult<EscrowTransaction> {
    uow.lock_escrow(escrow_id)
        .await?
        .ok_or_else(|| EscrowError::not_found(ENTITY_ESCROW, escrow_id))
}

pub(crate) async fn require_user(uow: &mut dyn UnitOfWork, user_id: Uuid) -> EscrowResult<()> {
    match uow.find_user(user_id).await? {
        Some(_) => Ok(()),
        None => Err(EscrowError::not_found(ENTITY_USER, user_id)),
    }
}

/// Freezes a locked `ACTIVE` escrow under a dispute written earlier in the
/// same unit of work.
pub(crate) async fn mark_disputed(
    uow: &mut dyn UnitOfWork,
    escrow: &mut EscrowTransaction,
    dispute: &Dispute,
    actor: impl Into<String>,
) -> EscrowResult<()> {
    if dispute.escrow_transaction_id != escrow.id {
        return Err(ValidationError::new(
            "dispute_id",
            "belongs to another escrow transaction",
        )
        .into());
    }

    let before = escrow.status;
    escrow.mark_disputed(dispute.id, dispute.created_at)?;
    persist_transition(uow, before, escrow, actor).await
}

fn ledger_release_note(destination: ReleaseDestination) -> &'static str {
    match destination {
        ReleaseDestination::Merchant => "Settled by direct escrow release to merchant.",
        ReleaseDestination::Customer => "Settled by direct escrow refund to customer.",
    }
}

/// Writes an escrow whose status changed, plus its audit entry.
pub(crate) async fn persist_transition(
    uow: &mut dyn UnitOfWork,
    before: EscrowStatus,
    escrow: &EscrowTransaction,
    actor: impl Into<String>,
) -> EscrowResult<()> {
    uow.update_escrow(escrow).await?;
    uow.record_audit(&AuditEntry::status_change(
        escrow.id,
        ENTITY_ESCROW_TRANSACTION,
        before.as_str(),
        escrow.status.as_str(),
        actor,
    ))
    .await?;
    Ok(())
}
