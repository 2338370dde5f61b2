//! Support desk: customer tickets and the admin response thread.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::domain::audit::{self, AuditEntry, ACTION_ASSIGNED, ENTITY_SUPPORT_TICKET};
use crate::domain::support::ENTITY_TICKET;
use crate::domain::{
    ResponderType, SupportResponse, SupportTicket, TicketPriority, TicketStatus, User,
};
use crate::error::{EscrowError, EscrowResult};
use crate::ports::{EscrowStore, UnitOfWork};
use crate::services::ledger::require_user;
use crate::services::log_failure;
use crate::validation::{
    required_text, sanitize_string, validate_enum, validate_max_len, validate_required,
    ValidationError, MESSAGE_MAX_LEN, SUBJECT_MAX_LEN,
};

#[derive(Debug, Clone, Deserialize)]
pub struct OpenTicketRequest {
    pub user_id: Uuid,
    pub subject: String,
    pub message: String,
    pub priority: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ValidatedOpenTicket {
    pub user_id: Uuid,
    pub subject: String,
    pub message: String,
    pub priority: TicketPriority,
}

impl OpenTicketRequest {
    pub fn validate(self) -> Result<ValidatedOpenTicket, ValidationError> {
        let subject = sanitize_string(&self.subject);
        validate_required("subject", &subject)?;
        validate_max_len("subject", &subject, SUBJECT_MAX_LEN)?;

        let priority = match self.priority.as_deref().map(str::trim) {
            None | Some("") => TicketPriority::default(),
            Some(raw) => {
                validate_enum("priority", raw, &TicketPriority::VALUES)?;
                raw.parse()
                    .map_err(|e: String| ValidationError::new("priority", e))?
            }
        };

        Ok(ValidatedOpenTicket {
            user_id: self.user_id,
            subject,
            message: required_text("message", &self.message, MESSAGE_MAX_LEN)?,
            priority,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddResponseRequest {
    pub ticket_id: Uuid,
    pub responder_id: Uuid,
    pub responder_type: ResponderType,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct ValidatedResponse {
    pub ticket_id: Uuid,
    pub responder_id: Uuid,
    pub responder_type: ResponderType,
    pub message: String,
}

impl AddResponseRequest {
    pub fn validate(self) -> Result<ValidatedResponse, ValidationError> {
        Ok(ValidatedResponse {
            ticket_id: self.ticket_id,
            responder_id: self.responder_id,
            responder_type: self.responder_type,
            message: required_text("message", &self.message, MESSAGE_MAX_LEN)?,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateTicketStatusRequest {
    pub ticket_id: Uuid,
    pub status: String,
    pub admin_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct ValidatedStatusUpdate {
    pub ticket_id: Uuid,
    pub status: TicketStatus,
    pub admin_id: Uuid,
}

impl UpdateTicketStatusRequest {
    pub fn validate(self) -> Result<ValidatedStatusUpdate, ValidationError> {
        let raw = self.status.trim();
        validate_enum("status", raw, &TicketStatus::VALUES)?;
        let status = raw
            .parse()
            .map_err(|e: String| ValidationError::new("status", e))?;

        Ok(ValidatedStatusUpdate {
            ticket_id: self.ticket_id,
            status,
            admin_id: self.admin_id,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssignTicketRequest {
    pub ticket_id: Uuid,
    pub agent_id: Uuid,
    pub admin_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TicketDetails {
    pub ticket: SupportTicket,
    pub requester: Option<User>,
    pub assignee: Option<User>,
    /// Oldest first.
    pub responses: Vec<SupportResponse>,
}

#[derive(Clone)]
pub struct SupportDesk {
    store: Arc<dyn EscrowStore>,
}

impl SupportDesk {
    pub fn new(store: Arc<dyn EscrowStore>) -> Self {
        Self { store }
    }

    pub async fn open_ticket(&self, request: OpenTicketRequest) -> EscrowResult<SupportTicket> {
        let request = request
            .validate()
            .map_err(|e| log_failure("open_ticket", e.into()))?;
        self.open_validated(request)
            .await
            .map_err(|e| log_failure("open_ticket", e))
    }

    async fn open_validated(&self, request: ValidatedOpenTicket) -> EscrowResult<SupportTicket> {
        let mut uow = self.store.begin().await?;
        require_user(uow.as_mut(), request.user_id).await?;

        let ticket = SupportTicket::new(
            request.user_id,
            request.subject,
            request.message,
            request.priority,
        );
        uow.insert_ticket(&ticket).await?;
        uow.record_audit(&AuditEntry::creation(
            ticket.id,
            ENTITY_SUPPORT_TICKET,
            json!({
                "ticket_number": ticket.ticket_number,
                "priority": ticket.priority,
                "status": ticket.status,
            }),
            audit::actor(ticket.user_id),
        ))
        .await?;
        uow.commit().await?;

        tracing::info!(
            ticket_id = %ticket.id,
            ticket_number = %ticket.ticket_number,
            user_id = %ticket.user_id,
            "support ticket opened"
        );
        Ok(ticket)
    }

    pub async fn get_ticket_details(&self, ticket_id: Uuid) -> EscrowResult<TicketDetails> {
        self.details_inner(ticket_id)
            .await
            .map_err(|e| log_failure("get_ticket_details", e))
    }

    async fn details_inner(&self, ticket_id: Uuid) -> EscrowResult<TicketDetails> {
        let mut uow = self.store.snapshot().await?;
        let ticket = uow
            .find_ticket(ticket_id)
            .await?
            .ok_or_else(|| EscrowError::not_found(ENTITY_TICKET, ticket_id))?;
        let requester = uow.find_user(ticket.user_id).await?;
        let assignee = match ticket.assigned_to {
            Some(agent_id) => uow.find_user(agent_id).await?,
            None => None,
        };
        let responses = uow.list_responses(ticket.id).await?;
        uow.rollback().await?;

        Ok(TicketDetails {
            ticket,
            requester,
            assignee,
            responses,
        })
    }

    /// Appends to the thread. An admin reply moves the ticket to
    /// `IN_PROGRESS` in the same unit of work.
    pub async fn add_response(&self, request: AddResponseRequest) -> EscrowResult<SupportResponse> {
        let request = request
            .validate()
            .map_err(|e| log_failure("add_ticket_response", e.into()))?;
        self.add_response_validated(request)
            .await
            .map_err(|e| log_failure("add_ticket_response", e))
    }

    async fn add_response_validated(
        &self,
        request: ValidatedResponse,
    ) -> EscrowResult<SupportResponse> {
        let mut uow = self.store.begin().await?;
        let mut ticket = lock_ticket(uow.as_mut(), request.ticket_id).await?;

        let before = ticket.status;
        let response = SupportResponse::new(
            ticket.id,
            request.responder_id,
            request.responder_type,
            request.message,
        );
        ticket.record_response(response.responder_type, response.created_at)?;

        uow.insert_response(&response).await?;
        uow.update_ticket(&ticket).await?;
        if ticket.status != before {
            uow.record_audit(&AuditEntry::status_change(
                ticket.id,
                ENTITY_SUPPORT_TICKET,
                before.as_str(),
                ticket.status.as_str(),
                audit::actor(response.responder_id),
            ))
            .await?;
        }
        uow.commit().await?;

        tracing::info!(
            ticket_id = %ticket.id,
            responder_type = response.responder_type.as_str(),
            status = %ticket.status,
            "ticket response added"
        );
        Ok(response)
    }

    pub async fn update_ticket_status(
        &self,
        request: UpdateTicketStatusRequest,
    ) -> EscrowResult<SupportTicket> {
        let request = request
            .validate()
            .map_err(|e| log_failure("update_ticket_status", e.into()))?;
        self.update_status_validated(request)
            .await
            .map_err(|e| log_failure("update_ticket_status", e))
    }

    async fn update_status_validated(
        &self,
        request: ValidatedStatusUpdate,
    ) -> EscrowResult<SupportTicket> {
        let mut uow = self.store.begin().await?;
        let mut ticket = lock_ticket(uow.as_mut(), request.ticket_id).await?;

        let before = ticket.status;
        ticket.set_status(request.status, Utc::now())?;
        uow.update_ticket(&ticket).await?;
        uow.record_audit(&AuditEntry::status_change(
            ticket.id,
            ENTITY_SUPPORT_TICKET,
            before.as_str(),
            ticket.status.as_str(),
            audit::actor(request.admin_id),
        ))
        .await?;
        uow.commit().await?;

        tracing::info!(
            ticket_id = %ticket.id,
            admin_id = %request.admin_id,
            status = %ticket.status,
            "ticket status updated"
        );
        Ok(ticket)
    }

    pub async fn assign_ticket(&self, request: AssignTicketRequest) -> EscrowResult<SupportTicket> {
        self.assign_inner(request)
            .await
            .map_err(|e| log_failure("assign_ticket", e))
    }

    async fn assign_inner(&self, request: AssignTicketRequest) -> EscrowResult<SupportTicket> {
        let mut uow = self.store.begin().await?;
        let mut ticket = lock_ticket(uow.as_mut(), request.ticket_id).await?;
        require_user(uow.as_mut(), request.agent_id).await?;

        let previous = ticket.assigned_to;
        ticket.assign(request.agent_id, Utc::now())?;
        uow.update_ticket(&ticket).await?;
        uow.record_audit(&AuditEntry::new(
            ticket.id,
            ENTITY_SUPPORT_TICKET,
            ACTION_ASSIGNED,
            previous.map(|agent| json!(agent)),
            Some(json!(request.agent_id)),
            audit::actor(request.admin_id),
        ))
        .await?;
        uow.commit().await?;

        tracing::info!(
            ticket_id = %ticket.id,
            agent_id = %request.agent_id,
            "ticket assigned"
        );
        Ok(ticket)
    }
}

async fn lock_ticket(uow: &mut dyn UnitOfWork, ticket_id: Uuid) -> EscrowResult<SupportTicket> {
    uow.lock_ticket(ticket_id)
        .await?
        .ok_or_else(|| EscrowError::not_found(ENTITY_TICKET, ticket_id))
}
