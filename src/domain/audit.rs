//! Audit trail entries, written in the same unit of work as the change they
//! describe.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub const ENTITY_ESCROW_TRANSACTION: &str = "escrow_transaction";
pub const ENTITY_DISPUTE: &str = "dispute";
pub const ENTITY_DISPUTE_EVIDENCE: &str = "dispute_evidence";
pub const ENTITY_SUPPORT_TICKET: &str = "support_ticket";

pub const ACTION_CREATED: &str = "created";
pub const ACTION_STATUS_CHANGED: &str = "status_changed";
pub const ACTION_ASSIGNED: &str = "assigned";

pub const ACTOR_SYSTEM: &str = "system";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub entity_id: Uuid,
    pub entity_type: String,
    pub action: String,
    pub old_val: Option<Value>,
    pub new_val: Option<Value>,
    pub actor: String,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    pub fn creation(
        entity_id: Uuid,
        entity_type: &str,
        new_val: Value,
        actor: impl Into<String>,
    ) -> Self {
        Self::new(entity_id, entity_type, ACTION_CREATED, None, Some(new_val), actor)
    }

    pub fn status_change(
        entity_id: Uuid,
        entity_type: &str,
        from: &str,
        to: &str,
        actor: impl Into<String>,
    ) -> Self {
        Self::new(
            entity_id,
            entity_type,
            ACTION_STATUS_CHANGED,
            Some(Value::String(from.to_string())),
            Some(Value::String(to.to_string())),
            actor,
        )
    }

    pub fn new(
        entity_id: Uuid,
        entity_type: &str,
        action: &str,
        old_val: Option<Value>,
        new_val: Option<Value>,
        actor: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity_id,
            entity_type: entity_type.to_string(),
            action: action.to_string(),
            old_val,
            new_val,
            actor: actor.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Actor label for a user or admin acting on a record.
pub fn actor(user_id: Uuid) -> String {
    format!("user:{}", user_id)
}
