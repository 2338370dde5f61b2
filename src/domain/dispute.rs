//! Dispute lifecycle and evidence.
//!
//! A dispute moves `OPEN → UNDER_REVIEW → RESOLVED` (or straight from `OPEN`
//! to `RESOLVED`). Evidence may be attached until it is resolved.
//! `resolution`, `resolved_by` and `resolved_at` are set together, exactly
//! when the status is `RESOLVED`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::escrow::{EscrowTransaction, ReleaseDestination};
use crate::error::{EscrowError, EscrowResult};

pub const ENTITY_DISPUTE: &str = "dispute";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisputeStatus {
    Open,
    UnderReview,
    Resolved,
}

impl DisputeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisputeStatus::Open => "OPEN",
            DisputeStatus::UnderReview => "UNDER_REVIEW",
            DisputeStatus::Resolved => "RESOLVED",
        }
    }
}

impl fmt::Display for DisputeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DisputeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPEN" => Ok(DisputeStatus::Open),
            "UNDER_REVIEW" => Ok(DisputeStatus::UnderReview),
            "RESOLVED" => Ok(DisputeStatus::Resolved),
            other => Err(format!("unknown dispute status '{}'", other)),
        }
    }
}

/// The adjudicator's decision on where the held funds go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolutionOutcome {
    RefundCustomer,
    ReleaseToMerchant,
}

impl ResolutionOutcome {
    pub const VALUES: [&'static str; 2] = ["REFUND_CUSTOMER", "RELEASE_TO_MERCHANT"];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionOutcome::RefundCustomer => "REFUND_CUSTOMER",
            ResolutionOutcome::ReleaseToMerchant => "RELEASE_TO_MERCHANT",
        }
    }

    pub fn destination(&self) -> ReleaseDestination {
        match self {
            ResolutionOutcome::RefundCustomer => ReleaseDestination::Customer,
            ResolutionOutcome::ReleaseToMerchant => ReleaseDestination::Merchant,
        }
    }
}

impl From<ReleaseDestination> for ResolutionOutcome {
    fn from(destination: ReleaseDestination) -> Self {
        match destination {
            ReleaseDestination::Merchant => ResolutionOutcome::ReleaseToMerchant,
            ReleaseDestination::Customer => ResolutionOutcome::RefundCustomer,
        }
    }
}

impl fmt::Display for ResolutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResolutionOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "REFUND_CUSTOMER" => Ok(ResolutionOutcome::RefundCustomer),
            "RELEASE_TO_MERCHANT" => Ok(ResolutionOutcome::ReleaseToMerchant),
            other => Err(format!("unknown resolution outcome '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dispute {
    pub id: Uuid,
    pub escrow_transaction_id: Uuid,
    pub filed_by: Uuid,
    pub reason: String,
    pub status: DisputeStatus,
    pub resolution: Option<String>,
    pub resolved_by: Option<Uuid>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Dispute {
    pub fn open(escrow_transaction_id: Uuid, filed_by: Uuid, reason: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            escrow_transaction_id,
            filed_by,
            reason,
            status: DisputeStatus::Open,
            resolution: None,
            resolved_by: None,
            resolved_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn accepts_evidence(&self) -> bool {
        matches!(self.status, DisputeStatus::Open | DisputeStatus::UnderReview)
    }

    pub fn ensure_accepts_evidence(&self) -> EscrowResult<()> {
        if !self.accepts_evidence() {
            return Err(EscrowError::DisputeClosed(self.id));
        }
        Ok(())
    }

    pub fn begin_review(&mut self, at: DateTime<Utc>) -> EscrowResult<()> {
        match self.status {
            DisputeStatus::Open => {
                self.status = DisputeStatus::UnderReview;
                self.updated_at = at;
                Ok(())
            }
            DisputeStatus::UnderReview => Err(EscrowError::invalid_transition(
                ENTITY_DISPUTE,
                self.status,
                "begin review of",
            )),
            DisputeStatus::Resolved => Err(EscrowError::DisputeClosed(self.id)),
        }
    }

    /// Closes the dispute. A second resolution is a conflict, never a no-op.
    pub fn resolve(
        &mut self,
        resolution: String,
        admin_id: Uuid,
        at: DateTime<Utc>,
    ) -> EscrowResult<()> {
        if self.status == DisputeStatus::Resolved {
            return Err(EscrowError::Conflict(format!(
                "dispute {} is already resolved",
                self.id
            )));
        }

        self.status = DisputeStatus::Resolved;
        self.resolution = Some(resolution);
        self.resolved_by = Some(admin_id);
        self.resolved_at = Some(at);
        self.updated_at = at;
        Ok(())
    }

    pub fn invariants_hold(&self) -> bool {
        let all_set =
            self.resolution.is_some() && self.resolved_by.is_some() && self.resolved_at.is_some();
        let none_set =
            self.resolution.is_none() && self.resolved_by.is_none() && self.resolved_at.is_none();
        if self.status == DisputeStatus::Resolved {
            all_set
        } else {
            none_set
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisputeEvidence {
    pub id: Uuid,
    pub dispute_id: Uuid,
    pub uploaded_by: Uuid,
    pub file_ref: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DisputeEvidence {
    pub fn new(
        dispute_id: Uuid,
        uploaded_by: Uuid,
        file_ref: String,
        description: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            dispute_id,
            uploaded_by,
            file_ref,
            description,
            created_at: Utc::now(),
        }
    }
}

/// Evidence split by who uploaded it. Items from someone who is neither the
/// customer nor the merchant land in `other`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvidenceByParty {
    pub customer: Vec<DisputeEvidence>,
    pub merchant: Vec<DisputeEvidence>,
    pub other: Vec<DisputeEvidence>,
}

impl EvidenceByParty {
    pub fn partition(evidence: Vec<DisputeEvidence>, escrow: &EscrowTransaction) -> Self {
        let mut buckets = EvidenceByParty::default();
        for item in evidence {
            let bucket = if !escrow.is_party(item.uploaded_by) {
                &mut buckets.other
            } else if item.uploaded_by == escrow.customer_id {
                &mut buckets.customer
            } else {
                &mut buckets.merchant
            };
            bucket.push(item);
        }
        buckets
    }

    pub fn len(&self) -> usize {
        self.customer.len() + self.merchant.len() + self.other.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
