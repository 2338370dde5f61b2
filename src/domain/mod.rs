//! Framework-agnostic entities and their state transitions.

pub mod audit;
pub mod dispute;
pub mod escrow;
pub mod support;
pub mod user;

pub use audit::AuditEntry;
pub use dispute::{Dispute, DisputeEvidence, DisputeStatus, EvidenceByParty, ResolutionOutcome};
pub use escrow::{EscrowRef, EscrowStatus, EscrowTransaction, ReleaseDestination};
pub use support::{
    ResponderType, SupportResponse, SupportTicket, TicketPriority, TicketStatus,
};
pub use user::User;
