//! Domain operations. Every mutating call validates its input first, then
//! runs inside exactly one unit of work.

pub mod details;
pub mod disputes;
pub mod ledger;
pub mod resolution;
pub mod support;

pub use details::{DisputeDetails, DisputeDetailsService};
pub use disputes::{AttachEvidenceRequest, DisputeCase, OpenDisputeRequest};
pub use ledger::{EscrowLedger, EscrowListQuery, EscrowPage, EscrowStatusCount, NewEscrowRequest};
pub use resolution::{ResolutionEngine, ResolutionReceipt, ResolveDisputeRequest};
pub use support::{
    AddResponseRequest, AssignTicketRequest, OpenTicketRequest, SupportDesk, TicketDetails,
    UpdateTicketStatusRequest,
};

use crate::error::EscrowError;

/// Logs a failed operation once, at the service boundary, and hands the error
/// back unchanged. Storage failures are errors; rejected requests are warnings.
pub(crate) fn log_failure(operation: &'static str, err: EscrowError) -> EscrowError {
    match &err {
        EscrowError::Persistence(cause) => {
            tracing::error!(operation, error = %cause, "storage failure");
        }
        EscrowError::Conflict(_)
        | EscrowError::InvalidTransition { .. }
        | EscrowError::DisputeClosed(_) => {
            tracing::warn!(operation, error = %err, "request rejected");
        }
        EscrowError::NotFound { .. } | EscrowError::ValidationFailed(_) => {
            tracing::debug!(operation, error = %err, "request rejected");
        }
    }
    err
}
