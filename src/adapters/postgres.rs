//! Postgres implementation of the storage port.

use std::collections::HashMap;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::domain::{
    AuditEntry, Dispute, DisputeEvidence, EscrowStatus, EscrowTransaction, SupportResponse,
    SupportTicket, User,
};
use crate::ports::{
    EscrowPosition, EscrowStore, RepositoryError, RepositoryResult, UnitOfWork,
};

const ESCROW_COLUMNS: &str = "id, order_id, customer_id, merchant_id, amount, currency, status, \
    dispute_id, created_at, updated_at, released_at, released_by";

const DISPUTE_COLUMNS: &str = "id, escrow_transaction_id, filed_by, reason, status, resolution, \
    resolved_by, resolved_at, created_at, updated_at";

const TICKET_COLUMNS: &str = "id, ticket_number, user_id, subject, message, status, priority, \
    assigned_to, created_at, updated_at, resolved_at";

#[derive(Clone)]
pub struct PostgresEscrowStore {
    pool: PgPool,
}

impl PostgresEscrowStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EscrowStore for PostgresEscrowStore {
    async fn begin(&self) -> RepositoryResult<Box<dyn UnitOfWork>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }

    async fn snapshot(&self) -> RepositoryResult<Box<dyn UnitOfWork>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }

    async fn ping(&self) -> RepositoryResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// A single database transaction. Dropped without commit, sqlx rolls it back.
struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

impl PgUnitOfWork {
    async fn fetch_escrow(
        &mut self,
        filter: &str,
        key: Uuid,
        lock: bool,
    ) -> RepositoryResult<Option<EscrowTransaction>> {
        let sql = format!(
            "SELECT {} FROM escrow_transactions WHERE {} = $1{}",
            ESCROW_COLUMNS,
            filter,
            if lock { " FOR UPDATE" } else { "" }
        );
        let row = sqlx::query_as::<_, EscrowRow>(&sql)
            .bind(key)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(EscrowRow::into_domain).transpose()
    }

    async fn fetch_dispute(&mut self, id: Uuid, lock: bool) -> RepositoryResult<Option<Dispute>> {
        let sql = format!(
            "SELECT {} FROM disputes WHERE id = $1{}",
            DISPUTE_COLUMNS,
            if lock { " FOR UPDATE" } else { "" }
        );
        let row = sqlx::query_as::<_, DisputeRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(DisputeRow::into_domain).transpose()
    }

    async fn fetch_ticket(
        &mut self,
        id: Uuid,
        lock: bool,
    ) -> RepositoryResult<Option<SupportTicket>> {
        let sql = format!(
            "SELECT {} FROM support_tickets WHERE id = $1{}",
            TICKET_COLUMNS,
            if lock { " FOR UPDATE" } else { "" }
        );
        let row = sqlx::query_as::<_, TicketRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(TicketRow::into_domain).transpose()
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn find_user(&mut self, id: Uuid) -> RepositoryResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, full_name, email, role FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(UserRow::into_domain))
    }

    async fn find_escrow(&mut self, id: Uuid) -> RepositoryResult<Option<EscrowTransaction>> {
        self.fetch_escrow("id", id, false).await
    }

    async fn find_escrow_by_order(
        &mut self,
        order_id: Uuid,
    ) -> RepositoryResult<Option<EscrowTransaction>> {
        self.fetch_escrow("order_id", order_id, false).await
    }

    async fn lock_escrow(&mut self, id: Uuid) -> RepositoryResult<Option<EscrowTransaction>> {
        self.fetch_escrow("id", id, true).await
    }

    async fn insert_escrow(&mut self, escrow: &EscrowTransaction) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO escrow_transactions (
                id, order_id, customer_id, merchant_id, amount, currency, status,
                dispute_id, created_at, updated_at, released_at, released_by
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(escrow.id)
        .bind(escrow.order_id)
        .bind(escrow.customer_id)
        .bind(escrow.merchant_id)
        .bind(&escrow.amount)
        .bind(&escrow.currency)
        .bind(escrow.status.as_str())
        .bind(escrow.dispute_id)
        .bind(escrow.created_at)
        .bind(escrow.updated_at)
        .bind(escrow.released_at)
        .bind(escrow.released_by)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_escrow(&mut self, escrow: &EscrowTransaction) -> RepositoryResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE escrow_transactions
            SET status = $2, dispute_id = $3, updated_at = $4, released_at = $5, released_by = $6
            WHERE id = $1
            "#,
        )
        .bind(escrow.id)
        .bind(escrow.status.as_str())
        .bind(escrow.dispute_id)
        .bind(escrow.updated_at)
        .bind(escrow.released_at)
        .bind(escrow.released_by)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!(
                "escrow transaction {}",
                escrow.id
            )));
        }
        Ok(())
    }

    async fn list_escrows(
        &mut self,
        status: Option<EscrowStatus>,
        after: Option<EscrowPosition>,
        limit: i64,
    ) -> RepositoryResult<Vec<EscrowTransaction>> {
        let sql = format!(
            r#"
            SELECT {} FROM escrow_transactions
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::timestamptz IS NULL OR (created_at, id) < ($2, $3))
            ORDER BY created_at DESC, id DESC
            LIMIT $4
            "#,
            ESCROW_COLUMNS
        );
        let rows = sqlx::query_as::<_, EscrowRow>(&sql)
            .bind(status.map(|s| s.as_str()))
            .bind(after.map(|(created_at, _)| created_at))
            .bind(after.map(|(_, id)| id))
            .bind(limit)
            .fetch_all(&mut *self.tx)
            .await?;

        rows.into_iter().map(EscrowRow::into_domain).collect()
    }

    async fn escrow_status_counts(&mut self) -> RepositoryResult<HashMap<EscrowStatus, i64>> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT status, COUNT(*) FROM escrow_transactions GROUP BY status",
        )
        .fetch_all(&mut *self.tx)
        .await?;

        rows.into_iter()
            .map(|(status, count)| {
                let status = status.parse().map_err(RepositoryError::Corrupt)?;
                Ok((status, count))
            })
            .collect()
    }

    async fn find_dispute(&mut self, id: Uuid) -> RepositoryResult<Option<Dispute>> {
        self.fetch_dispute(id, false).await
    }

    async fn lock_dispute(&mut self, id: Uuid) -> RepositoryResult<Option<Dispute>> {
        self.fetch_dispute(id, true).await
    }

    async fn insert_dispute(&mut self, dispute: &Dispute) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO disputes (
                id, escrow_transaction_id, filed_by, reason, status, resolution,
                resolved_by, resolved_at, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(dispute.id)
        .bind(dispute.escrow_transaction_id)
        .bind(dispute.filed_by)
        .bind(&dispute.reason)
        .bind(dispute.status.as_str())
        .bind(&dispute.resolution)
        .bind(dispute.resolved_by)
        .bind(dispute.resolved_at)
        .bind(dispute.created_at)
        .bind(dispute.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_dispute(&mut self, dispute: &Dispute) -> RepositoryResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE disputes
            SET status = $2, resolution = $3, resolved_by = $4, resolved_at = $5, updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(dispute.id)
        .bind(dispute.status.as_str())
        .bind(&dispute.resolution)
        .bind(dispute.resolved_by)
        .bind(dispute.resolved_at)
        .bind(dispute.updated_at)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("dispute {}", dispute.id)));
        }
        Ok(())
    }

    async fn insert_evidence(&mut self, evidence: &DisputeEvidence) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO dispute_evidence
                (id, dispute_id, uploaded_by, file_ref, description, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(evidence.id)
        .bind(evidence.dispute_id)
        .bind(evidence.uploaded_by)
        .bind(&evidence.file_ref)
        .bind(&evidence.description)
        .bind(evidence.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn list_evidence(&mut self, dispute_id: Uuid) -> RepositoryResult<Vec<DisputeEvidence>> {
        let rows = sqlx::query_as::<_, EvidenceRow>(
            r#"
            SELECT id, dispute_id, uploaded_by, file_ref, description, created_at
            FROM dispute_evidence
            WHERE dispute_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(dispute_id)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rows.into_iter().map(EvidenceRow::into_domain).collect())
    }

    async fn find_ticket(&mut self, id: Uuid) -> RepositoryResult<Option<SupportTicket>> {
        self.fetch_ticket(id, false).await
    }

    async fn lock_ticket(&mut self, id: Uuid) -> RepositoryResult<Option<SupportTicket>> {
        self.fetch_ticket(id, true).await
    }

    async fn insert_ticket(&mut self, ticket: &SupportTicket) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO support_tickets (
                id, ticket_number, user_id, subject, message, status, priority,
                assigned_to, created_at, updated_at, resolved_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(ticket.id)
        .bind(&ticket.ticket_number)
        .bind(ticket.user_id)
        .bind(&ticket.subject)
        .bind(&ticket.message)
        .bind(ticket.status.as_str())
        .bind(ticket.priority.as_str())
        .bind(ticket.assigned_to)
        .bind(ticket.created_at)
        .bind(ticket.updated_at)
        .bind(ticket.resolved_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_ticket(&mut self, ticket: &SupportTicket) -> RepositoryResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE support_tickets
            SET status = $2, priority = $3, assigned_to = $4, updated_at = $5, resolved_at = $6
            WHERE id = $1
            "#,
        )
        .bind(ticket.id)
        .bind(ticket.status.as_str())
        .bind(ticket.priority.as_str())
        .bind(ticket.assigned_to)
        .bind(ticket.updated_at)
        .bind(ticket.resolved_at)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!(
                "support ticket {}",
                ticket.id
            )));
        }
        Ok(())
    }

    async fn insert_response(&mut self, response: &SupportResponse) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO support_responses
                (id, ticket_id, responder_id, responder_type, message, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(response.id)
        .bind(response.ticket_id)
        .bind(response.responder_id)
        .bind(response.responder_type.as_str())
        .bind(&response.message)
        .bind(response.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn list_responses(&mut self, ticket_id: Uuid) -> RepositoryResult<Vec<SupportResponse>> {
        let rows = sqlx::query_as::<_, ResponseRow>(
            r#"
            SELECT id, ticket_id, responder_id, responder_type, message, created_at
            FROM support_responses
            WHERE ticket_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(ticket_id)
        .fetch_all(&mut *self.tx)
        .await?;

        rows.into_iter().map(ResponseRow::into_domain).collect()
    }

    async fn record_audit(&mut self, entry: &AuditEntry) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs
                (id, entity_id, entity_type, action, old_val, new_val, actor, timestamp)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(entry.id)
        .bind(entry.entity_id)
        .bind(&entry.entity_type)
        .bind(&entry.action)
        .bind(&entry.old_val)
        .bind(&entry.new_val)
        .bind(&entry.actor)
        .bind(entry.timestamp)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn list_audit(
        &mut self,
        entity_id: Uuid,
        limit: i64,
    ) -> RepositoryResult<Vec<AuditEntry>> {
        let rows = sqlx::query_as::<_, AuditRow>(
            r#"
            SELECT id, entity_id, entity_type, action, old_val, new_val, actor, timestamp
            FROM audit_logs
            WHERE entity_id = $1
            ORDER BY timestamp DESC, seq DESC
            LIMIT $2
            "#,
        )
        .bind(entity_id)
        .bind(limit)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rows.into_iter().map(AuditRow::into_domain).collect())
    }

    async fn commit(self: Box<Self>) -> RepositoryResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> RepositoryResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

// Row types stay private to the adapter. Status columns are TEXT and are
// parsed on the way out; an unknown value means the row is corrupt.

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    full_name: String,
    email: String,
    role: String,
}

impl UserRow {
    fn into_domain(self) -> User {
        User {
            id: self.id,
            full_name: self.full_name,
            email: self.email,
            role: self.role,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EscrowRow {
    id: Uuid,
    order_id: Uuid,
    customer_id: Uuid,
    merchant_id: Option<Uuid>,
    amount: BigDecimal,
    currency: String,
    status: String,
    dispute_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    released_at: Option<DateTime<Utc>>,
    released_by: Option<Uuid>,
}

impl EscrowRow {
    fn into_domain(self) -> RepositoryResult<EscrowTransaction> {
        Ok(EscrowTransaction {
            id: self.id,
            order_id: self.order_id,
            customer_id: self.customer_id,
            merchant_id: self.merchant_id,
            amount: self.amount,
            currency: self.currency,
            status: self.status.parse().map_err(RepositoryError::Corrupt)?,
            dispute_id: self.dispute_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
            released_at: self.released_at,
            released_by: self.released_by,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct DisputeRow {
    id: Uuid,
    escrow_transaction_id: Uuid,
    filed_by: Uuid,
    reason: String,
    status: String,
    resolution: Option<String>,
    resolved_by: Option<Uuid>,
    resolved_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl DisputeRow {
    fn into_domain(self) -> RepositoryResult<Dispute> {
        Ok(Dispute {
            id: self.id,
            escrow_transaction_id: self.escrow_transaction_id,
            filed_by: self.filed_by,
            reason: self.reason,
            status: self.status.parse().map_err(RepositoryError::Corrupt)?,
            resolution: self.resolution,
            resolved_by: self.resolved_by,
            resolved_at: self.resolved_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EvidenceRow {
    id: Uuid,
    dispute_id: Uuid,
    uploaded_by: Uuid,
    file_ref: String,
    description: Option<String>,
    created_at: DateTime<Utc>,
}

impl EvidenceRow {
    fn into_domain(self) -> DisputeEvidence {
        DisputeEvidence {
            id: self.id,
            dispute_id: self.dispute_id,
            uploaded_by: self.uploaded_by,
            file_ref: self.file_ref,
            description: self.description,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TicketRow {
    id: Uuid,
    ticket_number: String,
    user_id: Uuid,
    subject: String,
    message: String,
    status: String,
    priority: String,
    assigned_to: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    resolved_at: Option<DateTime<Utc>>,
}

impl TicketRow {
    fn into_domain(self) -> RepositoryResult<SupportTicket> {
        Ok(SupportTicket {
            id: self.id,
            ticket_number: self.ticket_number,
            user_id: self.user_id,
            subject: self.subject,
            message: self.message,
            status: self.status.parse().map_err(RepositoryError::Corrupt)?,
            priority: self.priority.parse().map_err(RepositoryError::Corrupt)?,
            assigned_to: self.assigned_to,
            created_at: self.created_at,
            updated_at: self.updated_at,
            resolved_at: self.resolved_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ResponseRow {
    id: Uuid,
    ticket_id: Uuid,
    responder_id: Uuid,
    responder_type: String,
    message: String,
    created_at: DateTime<Utc>,
}

impl ResponseRow {
    fn into_domain(self) -> RepositoryResult<SupportResponse> {
        Ok(SupportResponse {
            id: self.id,
            ticket_id: self.ticket_id,
            responder_id: self.responder_id,
            responder_type: self
                .responder_type
                .parse()
                .map_err(RepositoryError::Corrupt)?,
            message: self.message,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AuditRow {
    id: Uuid,
    entity_id: Uuid,
    entity_type: String,
    action: String,
    old_val: Option<serde_json::Value>,
    new_val: Option<serde_json::Value>,
    actor: String,
    timestamp: DateTime<Utc>,
}

impl AuditRow {
    fn into_domain(self) -> AuditEntry {
        AuditEntry {
            id: self.id,
            entity_id: self.entity_id,
            entity_type: self.entity_type,
            action: self.action,
            old_val: self.old_val,
            new_val: self.new_val,
            actor: self.actor,
            timestamp: self.timestamp,
        }
    }
}
