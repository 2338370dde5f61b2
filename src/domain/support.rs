//! Support tickets and their append-only response thread.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EscrowError, EscrowResult};

pub const ENTITY_TICKET: &str = "support ticket";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    Open,
    InProgress,
    Resolved,
    Closed,
}

impl TicketStatus {
    pub const VALUES: [&'static str; 4] = ["OPEN", "IN_PROGRESS", "RESOLVED", "CLOSED"];

    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Open => "OPEN",
            TicketStatus::InProgress => "IN_PROGRESS",
            TicketStatus::Resolved => "RESOLVED",
            TicketStatus::Closed => "CLOSED",
        }
    }

    /// Statuses that carry a `resolved_at` timestamp.
    pub fn is_settled(&self) -> bool {
        matches!(self, TicketStatus::Resolved | TicketStatus::Closed)
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPEN" => Ok(TicketStatus::Open),
            "IN_PROGRESS" => Ok(TicketStatus::InProgress),
            "RESOLVED" => Ok(TicketStatus::Resolved),
            "CLOSED" => Ok(TicketStatus::Closed),
            other => Err(format!("unknown ticket status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl TicketPriority {
    pub const VALUES: [&'static str; 4] = ["LOW", "NORMAL", "HIGH", "URGENT"];

    pub fn as_str(&self) -> &'static str {
        match self {
            TicketPriority::Low => "LOW",
            TicketPriority::Normal => "NORMAL",
            TicketPriority::High => "HIGH",
            TicketPriority::Urgent => "URGENT",
        }
    }
}

impl FromStr for TicketPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LOW" => Ok(TicketPriority::Low),
            "NORMAL" => Ok(TicketPriority::Normal),
            "HIGH" => Ok(TicketPriority::High),
            "URGENT" => Ok(TicketPriority::Urgent),
            other => Err(format!("unknown ticket priority '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponderType {
    Admin,
    User,
}

impl ResponderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponderType::Admin => "ADMIN",
            ResponderType::User => "USER",
        }
    }
}

impl FromStr for ResponderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ADMIN" => Ok(ResponderType::Admin),
            "USER" => Ok(ResponderType::User),
            other => Err(format!("unknown responder type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupportTicket {
    pub id: Uuid,
    pub ticket_number: String,
    pub user_id: Uuid,
    pub subject: String,
    pub message: String,
    pub status: TicketStatus,
    pub priority: TicketPriority,
    pub assigned_to: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl SupportTicket {
    pub fn new(user_id: Uuid, subject: String, message: String, priority: TicketPriority) -> Self {
        let id = Uuid::new_v4();
        let now = Utc::now();
        Self {
            id,
            ticket_number: ticket_number_for(id),
            user_id,
            subject,
            message,
            status: TicketStatus::Open,
            priority,
            assigned_to: None,
            created_at: now,
            updated_at: now,
            resolved_at: None,
        }
    }

    fn ensure_not_closed(&self, action: &'static str) -> EscrowResult<()> {
        if self.status == TicketStatus::Closed {
            return Err(EscrowError::invalid_transition(
                ENTITY_TICKET,
                self.status,
                action,
            ));
        }
        Ok(())
    }

    /// Moves the ticket to `status`. `CLOSED` is final; `resolved_at` follows
    /// the status.
    pub fn set_status(&mut self, status: TicketStatus, at: DateTime<Utc>) -> EscrowResult<()> {
        self.ensure_not_closed("change status of")?;

        self.status = status;
        self.resolved_at = if status.is_settled() {
            self.resolved_at.or(Some(at))
        } else {
            None
        };
        self.updated_at = at;
        Ok(())
    }

    /// Records that a response was added. An admin reply puts the ticket in
    /// progress.
    pub fn record_response(
        &mut self,
        responder_type: ResponderType,
        at: DateTime<Utc>,
    ) -> EscrowResult<()> {
        self.ensure_not_closed("respond to")?;

        if responder_type == ResponderType::Admin {
            self.status = TicketStatus::InProgress;
            self.resolved_at = None;
        }
        self.updated_at = at;
        Ok(())
    }

    pub fn assign(&mut self, agent_id: Uuid, at: DateTime<Utc>) -> EscrowResult<()> {
        self.ensure_not_closed("assign")?;
        self.assigned_to = Some(agent_id);
        self.updated_at = at;
        Ok(())
    }

    pub fn invariants_hold(&self) -> bool {
        self.status.is_settled() == self.resolved_at.is_some()
    }
}

fn ticket_number_for(id: Uuid) -> String {
    let simple = id.simple().to_string();
    format!("TKT-{}", simple[..8].to_uppercase())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupportResponse {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub responder_id: Uuid,
    pub responder_type: ResponderType,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl SupportResponse {
    pub fn new(
        ticket_id: Uuid,
        responder_id: Uuid,
        responder_type: ResponderType,
        message: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            ticket_id,
            responder_id,
            responder_type,
            message,
            created_at: Utc::now(),
        }
    }
}
