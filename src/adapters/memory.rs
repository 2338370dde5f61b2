//! In-memory implementation of the storage port.
//!
//! A unit of work holds the store's lock for its whole lifetime and mutates a
//! private copy of the state; `commit` swaps the copy in. Units of work are
//! therefore fully serialized and nothing uncommitted is ever visible.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::domain::{
    AuditEntry, Dispute, DisputeEvidence, EscrowStatus, EscrowTransaction, SupportResponse,
    SupportTicket, User,
};
use crate::ports::{
    EscrowPosition, EscrowStore, RepositoryError, RepositoryResult, UnitOfWork,
};

/// Kinds of write that can be armed to fail, for exercising rollback paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteKind {
    InsertEscrow,
    UpdateEscrow,
    InsertDispute,
    UpdateDispute,
    InsertEvidence,
    InsertTicket,
    UpdateTicket,
    InsertResponse,
    RecordAudit,
    Commit,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    users: HashMap<Uuid, User>,
    escrows: HashMap<Uuid, EscrowTransaction>,
    disputes: HashMap<Uuid, Dispute>,
    evidence: Vec<DisputeEvidence>,
    tickets: HashMap<Uuid, SupportTicket>,
    responses: Vec<SupportResponse>,
    audit: Vec<AuditEntry>,
}

#[derive(Clone, Default)]
pub struct InMemoryEscrowStore {
    state: Arc<Mutex<MemoryState>>,
    faults: Arc<Mutex<HashSet<WriteKind>>>,
}

impl InMemoryEscrowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Users come from the auth service; this seeds them directly.
    pub async fn insert_user(&self, user: User) {
        self.state.lock().await.users.insert(user.id, user);
    }

    /// Makes the next write of `kind` fail with a database error.
    pub async fn fail_next(&self, kind: WriteKind) {
        self.faults.lock().await.insert(kind);
    }

    async fn unit_of_work(&self, read_only: bool) -> MemoryUnitOfWork {
        let committed = self.state.clone().lock_owned().await;
        let working = committed.clone();
        MemoryUnitOfWork {
            committed,
            working,
            read_only,
            faults: self.faults.clone(),
        }
    }
}

#[async_trait]
impl EscrowStore for InMemoryEscrowStore {
    async fn begin(&self) -> RepositoryResult<Box<dyn UnitOfWork>> {
        Ok(Box::new(self.unit_of_work(false).await))
    }

    async fn snapshot(&self) -> RepositoryResult<Box<dyn UnitOfWork>> {
        Ok(Box::new(self.unit_of_work(true).await))
    }

    async fn ping(&self) -> RepositoryResult<()> {
        Ok(())
    }
}

struct MemoryUnitOfWork {
    committed: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    read_only: bool,
    faults: Arc<Mutex<HashSet<WriteKind>>>,
}

impl MemoryUnitOfWork {
    async fn check_write(&self, kind: WriteKind) -> RepositoryResult<()> {
        if self.read_only {
            return Err(RepositoryError::Database(
                "cannot write in a read-only snapshot".to_string(),
            ));
        }
        if self.faults.lock().await.remove(&kind) {
            return Err(RepositoryError::Database(format!(
                "injected failure on {:?}",
                kind
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn find_user(&mut self, id: Uuid) -> RepositoryResult<Option<User>> {
        Ok(self.working.users.get(&id).cloned())
    }

    async fn find_escrow(&mut self, id: Uuid) -> RepositoryResult<Option<EscrowTransaction>> {
        Ok(self.working.escrows.get(&id).cloned())
    }

    async fn find_escrow_by_order(
        &mut self,
        order_id: Uuid,
    ) -> RepositoryResult<Option<EscrowTransaction>> {
        Ok(self
            .working
            .escrows
            .values()
            .find(|escrow| escrow.order_id == order_id)
            .cloned())
    }

    async fn lock_escrow(&mut self, id: Uuid) -> RepositoryResult<Option<EscrowTransaction>> {
        self.find_escrow(id).await
    }

    async fn insert_escrow(&mut self, escrow: &EscrowTransaction) -> RepositoryResult<()> {
        self.check_write(WriteKind::InsertEscrow).await?;
        if self.working.escrows.contains_key(&escrow.id) {
            return Err(RepositoryError::Conflict("escrow_transactions_pkey".to_string()));
        }
        if self
            .working
            .escrows
            .values()
            .any(|existing| existing.order_id == escrow.order_id)
        {
            return Err(RepositoryError::Conflict(
                "escrow_transactions_order_id_key".to_string(),
            ));
        }
        self.working.escrows.insert(escrow.id, escrow.clone());
        Ok(())
    }

    async fn update_escrow(&mut self, escrow: &EscrowTransaction) -> RepositoryResult<()> {
        self.check_write(WriteKind::UpdateEscrow).await?;
        match self.working.escrows.get_mut(&escrow.id) {
            Some(existing) => {
                *existing = escrow.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound(format!(
                "escrow transaction {}",
                escrow.id
            ))),
        }
    }

    async fn list_escrows(
        &mut self,
        status: Option<EscrowStatus>,
        after: Option<EscrowPosition>,
        limit: i64,
    ) -> RepositoryResult<Vec<EscrowTransaction>> {
        let mut rows: Vec<EscrowTransaction> = self
            .working
            .escrows
            .values()
            .filter(|escrow| status.map_or(true, |s| escrow.status == s))
            .filter(|escrow| after.map_or(true, |pos| (escrow.created_at, escrow.id) < pos))
            .cloned()
            .collect();
        rows.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn escrow_status_counts(&mut self) -> RepositoryResult<HashMap<EscrowStatus, i64>> {
        let mut counts = HashMap::new();
        for escrow in self.working.escrows.values() {
            *counts.entry(escrow.status).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn find_dispute(&mut self, id: Uuid) -> RepositoryResult<Option<Dispute>> {
        Ok(self.working.disputes.get(&id).cloned())
    }

    async fn lock_dispute(&mut self, id: Uuid) -> RepositoryResult<Option<Dispute>> {
        self.find_dispute(id).await
    }

    async fn insert_dispute(&mut self, dispute: &Dispute) -> RepositoryResult<()> {
        self.check_write(WriteKind::InsertDispute).await?;
        if self
            .working
            .disputes
            .values()
            .any(|existing| existing.escrow_transaction_id == dispute.escrow_transaction_id)
        {
            return Err(RepositoryError::Conflict(
                "disputes_escrow_transaction_id_key".to_string(),
            ));
        }
        self.working.disputes.insert(dispute.id, dispute.clone());
        Ok(())
    }

    async fn update_dispute(&mut self, dispute: &Dispute) -> RepositoryResult<()> {
        self.check_write(WriteKind::UpdateDispute).await?;
        match self.working.disputes.get_mut(&dispute.id) {
            Some(existing) => {
                *existing = dispute.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound(format!("dispute {}", dispute.id))),
        }
    }

    async fn insert_evidence(&mut self, evidence: &DisputeEvidence) -> RepositoryResult<()> {
        self.check_write(WriteKind::InsertEvidence).await?;
        self.working.evidence.push(evidence.clone());
        Ok(())
    }

    async fn list_evidence(&mut self, dispute_id: Uuid) -> RepositoryResult<Vec<DisputeEvidence>> {
        Ok(self
            .working
            .evidence
            .iter()
            .filter(|item| item.dispute_id == dispute_id)
            .cloned()
            .collect())
    }

    async fn find_ticket(&mut self, id: Uuid) -> RepositoryResult<Option<SupportTicket>> {
        Ok(self.working.tickets.get(&id).cloned())
    }

    async fn lock_ticket(&mut self, id: Uuid) -> RepositoryResult<Option<SupportTicket>> {
        self.find_ticket(id).await
    }

    async fn insert_ticket(&mut self, ticket: &SupportTicket) -> RepositoryResult<()> {
        self.check_write(WriteKind::InsertTicket).await?;
        if self
            .working
            .tickets
            .values()
            .any(|existing| existing.ticket_number == ticket.ticket_number)
        {
            return Err(RepositoryError::Conflict(
                "support_tickets_ticket_number_key".to_string(),
            ));
        }
        self.working.tickets.insert(ticket.id, ticket.clone());
        Ok(())
    }

    async fn update_ticket(&mut self, ticket: &SupportTicket) -> RepositoryResult<()> {
        self.check_write(WriteKind::UpdateTicket).await?;
        match self.working.tickets.get_mut(&ticket.id) {
            Some(existing) => {
                *existing = ticket.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound(format!(
                "support ticket {}",
                ticket.id
            ))),
        }
    }

    async fn insert_response(&mut self, response: &SupportResponse) -> RepositoryResult<()> {
        self.check_write(WriteKind::InsertResponse).await?;
        self.working.responses.push(response.clone());
        Ok(())
    }

    async fn list_responses(&mut self, ticket_id: Uuid) -> RepositoryResult<Vec<SupportResponse>> {
        let mut responses: Vec<SupportResponse> = self
            .working
            .responses
            .iter()
            .filter(|response| response.ticket_id == ticket_id)
            .cloned()
            .collect();
        responses.sort_by_key(|response| response.created_at);
        Ok(responses)
    }

    async fn record_audit(&mut self, entry: &AuditEntry) -> RepositoryResult<()> {
        self.check_write(WriteKind::RecordAudit).await?;
        self.working.audit.push(entry.clone());
        Ok(())
    }

    async fn list_audit(
        &mut self,
        entity_id: Uuid,
        limit: i64,
    ) -> RepositoryResult<Vec<AuditEntry>> {
        // Insertion order breaks timestamp ties.
        let mut entries: Vec<(usize, AuditEntry)> = self
            .working
            .audit
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.entity_id == entity_id)
            .map(|(seq, entry)| (seq, entry.clone()))
            .collect();
        entries.sort_by(|(seq_a, a), (seq_b, b)| {
            (b.timestamp, seq_b).cmp(&(a.timestamp, seq_a))
        });
        Ok(entries
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|(_, entry)| entry)
            .collect())
    }

    async fn commit(self: Box<Self>) -> RepositoryResult<()> {
        if self.read_only {
            return Ok(());
        }
        self.check_write(WriteKind::Commit).await?;
        let MemoryUnitOfWork {
            mut committed,
            working,
            ..
        } = *self;
        *committed = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> RepositoryResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;

    fn escrow() -> EscrowTransaction {
        EscrowTransaction::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Some(Uuid::new_v4()),
            BigDecimal::from(2500),
            "NGN".to_string(),
        )
    }

    #[tokio::test]
    async fn uncommitted_work_is_discarded() {
        let store = InMemoryEscrowStore::new();
        let escrow = escrow();

        let mut uow = store.begin().await.unwrap();
        uow.insert_escrow(&escrow).await.unwrap();
        drop(uow);

        let mut read = store.snapshot().await.unwrap();
        assert!(read.find_escrow(escrow.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn committed_work_is_visible() {
        let store = InMemoryEscrowStore::new();
        let escrow = escrow();

        let mut uow = store.begin().await.unwrap();
        uow.insert_escrow(&escrow).await.unwrap();
        uow.commit().await.unwrap();

        let mut read = store.snapshot().await.unwrap();
        assert_eq!(read.find_escrow(escrow.id).await.unwrap(), Some(escrow));
    }

    #[tokio::test]
    async fn duplicate_order_is_a_conflict() {
        let store = InMemoryEscrowStore::new();
        let first = escrow();
        let mut second = escrow();
        second.order_id = first.order_id;

        let mut uow = store.begin().await.unwrap();
        uow.insert_escrow(&first).await.unwrap();
        let err = uow.insert_escrow(&second).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn armed_fault_fires_once() {
        let store = InMemoryEscrowStore::new();
        store.fail_next(WriteKind::InsertEscrow).await;

        let mut uow = store.begin().await.unwrap();
        assert!(uow.insert_escrow(&escrow()).await.is_err());
        assert!(uow.insert_escrow(&escrow()).await.is_ok());
    }

    #[tokio::test]
    async fn snapshot_rejects_writes() {
        let store = InMemoryEscrowStore::new();
        let mut read = store.snapshot().await.unwrap();
        assert!(read.insert_escrow(&escrow()).await.is_err());
    }
}
