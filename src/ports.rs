//! Storage port. Services talk to persistence only through these traits, so
//! the same engine runs against PostgreSQL or the in-memory store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{
    AuditEntry, Dispute, DisputeEvidence, EscrowStatus, EscrowTransaction, SupportResponse,
    SupportTicket, User,
};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("unique constraint violated: {0}")]
    Conflict(String),

    #[error("stored value could not be decoded: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("row".to_string()),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                RepositoryError::Conflict(
                    db_err
                        .constraint()
                        .unwrap_or("unique constraint")
                        .to_string(),
                )
            }
            other => RepositoryError::Database(other.to_string()),
        }
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Position in a newest-first escrow listing: rows strictly older than this
/// `(created_at, id)` pair come next.
pub type EscrowPosition = (DateTime<Utc>, Uuid);

/// Hands out units of work. Each domain operation runs inside exactly one.
#[async_trait]
pub trait EscrowStore: Send + Sync {
    /// Starts a read-write unit of work. Dropping it without `commit` rolls
    /// everything back.
    async fn begin(&self) -> RepositoryResult<Box<dyn UnitOfWork>>;

    /// Starts a read-only unit of work that sees one consistent snapshot.
    async fn snapshot(&self) -> RepositoryResult<Box<dyn UnitOfWork>>;

    /// Cheap liveness probe for health checks.
    async fn ping(&self) -> RepositoryResult<()>;
}

/// One transaction against the store. `lock_*` reads take a row lock held
/// until commit or rollback; `find_*` reads do not.
#[async_trait]
pub trait UnitOfWork: Send {
    async fn find_user(&mut self, id: Uuid) -> RepositoryResult<Option<User>>;

    async fn find_escrow(&mut self, id: Uuid) -> RepositoryResult<Option<EscrowTransaction>>;
    async fn find_escrow_by_order(
        &mut self,
        order_id: Uuid,
    ) -> RepositoryResult<Option<EscrowTransaction>>;
    async fn lock_escrow(&mut self, id: Uuid) -> RepositoryResult<Option<EscrowTransaction>>;
    async fn insert_escrow(&mut self, escrow: &EscrowTransaction) -> RepositoryResult<()>;
    async fn update_escrow(&mut self, escrow: &EscrowTransaction) -> RepositoryResult<()>;
    async fn list_escrows(
        &mut self,
        status: Option<EscrowStatus>,
        after: Option<EscrowPosition>,
        limit: i64,
    ) -> RepositoryResult<Vec<EscrowTransaction>>;
    async fn escrow_status_counts(&mut self) -> RepositoryResult<HashMap<EscrowStatus, i64>>;

    async fn find_dispute(&mut self, id: Uuid) -> RepositoryResult<Option<Dispute>>;
    async fn lock_dispute(&mut self, id: Uuid) -> RepositoryResult<Option<Dispute>>;
    async fn insert_dispute(&mut self, dispute: &Dispute) -> RepositoryResult<()>;
    async fn update_dispute(&mut self, dispute: &Dispute) -> RepositoryResult<()>;

    async fn insert_evidence(&mut self, evidence: &DisputeEvidence) -> RepositoryResult<()>;
    async fn list_evidence(&mut self, dispute_id: Uuid) -> RepositoryResult<Vec<DisputeEvidence>>;

    async fn find_ticket(&mut self, id: Uuid) -> RepositoryResult<Option<SupportTicket>>;
    async fn lock_ticket(&mut self, id: Uuid) -> RepositoryResult<Option<SupportTicket>>;
    async fn insert_ticket(&mut self, ticket: &SupportTicket) -> RepositoryResult<()>;
    async fn update_ticket(&mut self, ticket: &SupportTicket) -> RepositoryResult<()>;
    async fn insert_response(&mut self, response: &SupportResponse) -> RepositoryResult<()>;
    /// Responses for a ticket, oldest first.
    async fn list_responses(&mut self, ticket_id: Uuid) -> RepositoryResult<Vec<SupportResponse>>;

    async fn record_audit(&mut self, entry: &AuditEntry) -> RepositoryResult<()>;
    /// Audit entries for one entity, newest first.
    async fn list_audit(&mut self, entity_id: Uuid, limit: i64)
        -> RepositoryResult<Vec<AuditEntry>>;

    async fn commit(self: Box<Self>) -> RepositoryResult<()>;
    async fn rollback(self: Box<Self>) -> RepositoryResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_not_found_maps_to_not_found() {
        let err: RepositoryError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, RepositoryError::NotFound(_)));
    }

    #[test]
    fn pool_timeout_maps_to_database() {
        let err: RepositoryError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, RepositoryError::Database(_)));
    }
}
