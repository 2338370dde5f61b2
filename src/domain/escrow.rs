//! Escrow transaction entity and its custody state machine.
//!
//! ```text
//! ACTIVE ──dispute filed──▶ DISPUTED ──resolve──▶ RELEASED | REFUNDED
//!   │
//!   ├──holding period elapses──▶ PENDING_RELEASE ──release──▶ RELEASED | REFUNDED
//!   │
//!   └──early release (no dispute)──▶ RELEASED | REFUNDED
//! ```
//!
//! `RELEASED` and `REFUNDED` are terminal. `released_at`/`released_by` are set
//! exactly when the status is terminal, and `dispute_id` is never cleared once
//! set.

use std::fmt;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EscrowError, EscrowResult};

pub const ENTITY_ESCROW: &str = "escrow transaction";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscrowStatus {
    Active,
    Disputed,
    PendingRelease,
    Released,
    Refunded,
}

impl EscrowStatus {
    pub const ALL: [EscrowStatus; 5] = [
        EscrowStatus::Active,
        EscrowStatus::Disputed,
        EscrowStatus::PendingRelease,
        EscrowStatus::Released,
        EscrowStatus::Refunded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EscrowStatus::Active => "ACTIVE",
            EscrowStatus::Disputed => "DISPUTED",
            EscrowStatus::PendingRelease => "PENDING_RELEASE",
            EscrowStatus::Released => "RELEASED",
            EscrowStatus::Refunded => "REFUNDED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EscrowStatus::Released | EscrowStatus::Refunded)
    }
}

impl fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EscrowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EscrowStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown escrow status '{}'", s))
    }
}

/// Who receives the held funds when an escrow is finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReleaseDestination {
    Merchant,
    Customer,
}

impl ReleaseDestination {
    pub fn terminal_status(&self) -> EscrowStatus {
        match self {
            ReleaseDestination::Merchant => EscrowStatus::Released,
            ReleaseDestination::Customer => EscrowStatus::Refunded,
        }
    }
}

/// Lookup key accepted by the ledger: either the escrow's own id or the id of
/// the order it holds funds for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscrowRef {
    Id(Uuid),
    Order(Uuid),
}

impl fmt::Display for EscrowRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EscrowRef::Id(id) => write!(f, "{}", id),
            EscrowRef::Order(order_id) => write!(f, "order:{}", order_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscrowTransaction {
    pub id: Uuid,
    pub order_id: Uuid,
    pub customer_id: Uuid,
    pub merchant_id: Option<Uuid>,
    pub amount: BigDecimal,
    pub currency: String,
    pub status: EscrowStatus,
    pub dispute_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
    pub released_by: Option<Uuid>,
}

impl EscrowTransaction {
    pub fn new(
        order_id: Uuid,
        customer_id: Uuid,
        merchant_id: Option<Uuid>,
        amount: BigDecimal,
        currency: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            order_id,
            customer_id,
            merchant_id,
            amount,
            currency,
            status: EscrowStatus::Active,
            dispute_id: None,
            created_at: now,
            updated_at: now,
            released_at: None,
            released_by: None,
        }
    }

    /// Guards the transitions that only an `ACTIVE` escrow may take.
    pub fn ensure_active(&self, action: &'static str) -> EscrowResult<()> {
        if self.status != EscrowStatus::Active {
            return Err(EscrowError::invalid_transition(
                ENTITY_ESCROW,
                self.status,
                action,
            ));
        }
        Ok(())
    }

    pub fn mark_disputed(&mut self, dispute_id: Uuid, at: DateTime<Utc>) -> EscrowResult<()> {
        self.ensure_active("dispute")?;

        self.status = EscrowStatus::Disputed;
        self.dispute_id = Some(dispute_id);
        self.updated_at = at;
        Ok(())
    }

    pub fn mark_pending_release(&mut self, at: DateTime<Utc>) -> EscrowResult<()> {
        self.ensure_active("start release of")?;

        self.status = EscrowStatus::PendingRelease;
        self.updated_at = at;
        Ok(())
    }

    /// Finalizes the escrow. Accepts `DISPUTED`, `PENDING_RELEASE`, and an
    /// `ACTIVE` escrow that never had a dispute.
    pub fn release(
        &mut self,
        destination: ReleaseDestination,
        admin_id: Uuid,
        at: DateTime<Utc>,
    ) -> EscrowResult<EscrowStatus> {
        let allowed = match self.status {
            EscrowStatus::Disputed | EscrowStatus::PendingRelease => true,
            EscrowStatus::Active => self.dispute_id.is_none(),
            EscrowStatus::Released | EscrowStatus::Refunded => false,
        };
        if !allowed {
            return Err(EscrowError::invalid_transition(
                ENTITY_ESCROW,
                self.status,
                "release",
            ));
        }

        if destination == ReleaseDestination::Merchant && self.merchant_id.is_none() {
            return Err(EscrowError::invalid_transition(
                "escrow transaction without a merchant",
                self.status,
                "release to merchant",
            ));
        }

        let status = destination.terminal_status();
        self.status = status;
        self.released_at = Some(at);
        self.released_by = Some(admin_id);
        self.updated_at = at;
        Ok(status)
    }

    pub fn is_party(&self, user_id: Uuid) -> bool {
        self.customer_id == user_id || self.merchant_id == Some(user_id)
    }

    /// Checks the release-audit and dispute-reference invariants.
    pub fn invariants_hold(&self) -> bool {
        let release_fields_set = self.released_at.is_some() && self.released_by.is_some();
        let release_fields_clear = self.released_at.is_none() && self.released_by.is_none();
        let release_ok = if self.status.is_terminal() {
            release_fields_set
        } else {
            release_fields_clear
        };
        let dispute_ok = self.status != EscrowStatus::Disputed || self.dispute_id.is_some();
        release_ok && dispute_ok
    }
}
