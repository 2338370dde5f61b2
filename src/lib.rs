pub mod adapters;
pub mod cli;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod health;
pub mod middleware;
pub mod ports;
pub mod services;
pub mod utils;
pub mod validation;

use std::sync::Arc;
use std::time::Instant;

use axum::{routing::get, Router};
use uuid::Uuid;

use crate::domain::{Dispute, DisputeEvidence};
use crate::error::EscrowResult;
use crate::ports::EscrowStore;
use crate::services::{
    AttachEvidenceRequest, DisputeCase, DisputeDetails, DisputeDetailsService, EscrowLedger,
    OpenDisputeRequest, ResolutionEngine, ResolutionReceipt, ResolveDisputeRequest, SupportDesk,
};

/// All escrow and dispute operations over one store.
#[derive(Clone)]
pub struct EscrowCore {
    pub ledger: EscrowLedger,
    pub disputes: DisputeCase,
    pub resolution: ResolutionEngine,
    pub details: DisputeDetailsService,
    pub support: SupportDesk,
}

impl EscrowCore {
    pub fn new(store: Arc<dyn EscrowStore>) -> Self {
        Self {
            ledger: EscrowLedger::new(store.clone()),
            disputes: DisputeCase::new(store.clone()),
            resolution: ResolutionEngine::new(store.clone()),
            details: DisputeDetailsService::new(store.clone()),
            support: SupportDesk::new(store),
        }
    }

    pub async fn open_dispute(&self, request: OpenDisputeRequest) -> EscrowResult<Dispute> {
        self.disputes.open(request).await
    }

    pub async fn attach_evidence(
        &self,
        request: AttachEvidenceRequest,
    ) -> EscrowResult<DisputeEvidence> {
        self.disputes.attach_evidence(request).await
    }

    pub async fn resolve_dispute(
        &self,
        request: ResolveDisputeRequest,
    ) -> EscrowResult<ResolutionReceipt> {
        self.resolution.resolve(request).await
    }

    pub async fn get_dispute_details(&self, escrow_id: Uuid) -> EscrowResult<DisputeDetails> {
        self.details.get_dispute_details(escrow_id).await
    }
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn EscrowStore>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(store: Arc<dyn EscrowStore>) -> Self {
        Self {
            store,
            start_time: Instant::now(),
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .layer(axum::middleware::from_fn(
            middleware::request_logger_middleware,
        ))
        .with_state(state)
}
