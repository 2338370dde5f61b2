#![allow(dead_code)]

use std::str::FromStr;
use std::sync::Arc;

use bigdecimal::BigDecimal;
use escrow_core::adapters::InMemoryEscrowStore;
use escrow_core::domain::{Dispute, EscrowTransaction, User};
use escrow_core::services::{NewEscrowRequest, OpenDisputeRequest, ResolveDisputeRequest};
use escrow_core::EscrowCore;
use uuid::Uuid;

pub struct Fixture {
    pub store: InMemoryEscrowStore,
    pub core: EscrowCore,
    pub customer: User,
    pub merchant: User,
    pub admin: User,
}

pub fn user(name: &str, role: &str) -> User {
    let id = Uuid::new_v4();
    User {
        id,
        full_name: name.to_string(),
        email: format!("{}-{}@example.com", name.to_lowercase().replace(' ', "."), id.simple()),
        role: role.to_string(),
    }
}

pub async fn fixture() -> Fixture {
    let store = InMemoryEscrowStore::new();
    let customer = user("Ada Obi", "CUSTOMER");
    let merchant = user("Kemi Stores", "MERCHANT");
    let admin = user("Support Lead", "ADMIN");
    for u in [&customer, &merchant, &admin] {
        store.insert_user(u.clone()).await;
    }

    Fixture {
        core: EscrowCore::new(Arc::new(store.clone())),
        store,
        customer,
        merchant,
        admin,
    }
}

impl Fixture {
    pub fn new_escrow_request(&self, amount: &str) -> NewEscrowRequest {
        NewEscrowRequest {
            order_id: Uuid::new_v4(),
            customer_id: self.customer.id,
            merchant_id: Some(self.merchant.id),
            amount: BigDecimal::from_str(amount).unwrap(),
            currency: "NGN".to_string(),
        }
    }

    pub async fn active_escrow(&self) -> EscrowTransaction {
        self.core
            .ledger
            .hold(self.new_escrow_request("45000.00"))
            .await
            .unwrap()
    }

    pub async fn disputed_escrow(&self) -> (EscrowTransaction, Dispute) {
        let escrow = self.active_escrow().await;
        let dispute = self
            .core
            .open_dispute(OpenDisputeRequest {
                escrow_id: escrow.id,
                filed_by: self.customer.id,
                reason: "Item never arrived".to_string(),
            })
            .await
            .unwrap();
        let escrow = self.escrow(escrow.id).await;
        (escrow, dispute)
    }

    pub async fn escrow(&self, escrow_id: Uuid) -> EscrowTransaction {
        self.core
            .ledger
            .get_by_order_or_id(escrow_core::domain::EscrowRef::Id(escrow_id))
            .await
            .unwrap()
    }

    pub fn resolve_request(
        &self,
        dispute_id: Uuid,
        outcome: &str,
        notes: &str,
    ) -> ResolveDisputeRequest {
        ResolveDisputeRequest {
            dispute_id,
            outcome: outcome.to_string(),
            admin_notes: notes.to_string(),
            admin_id: self.admin.id,
        }
    }
}
