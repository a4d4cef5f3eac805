//! HTTP API for the review bot

mod handlers;
mod types;

pub use handlers::create_router;

use crate::access::AccessPolicy;
use crate::db::Database;
use crate::llm::ModelRegistry;
use crate::notifier::OutboxNotifier;
use crate::runtime::{
    DatabaseStorage, ModelRole, Notifier, ProductionOrchestrator, RegistryLlmClient,
};
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<ProductionOrchestrator>,
    pub db: Database,
    pub llm_registry: Arc<ModelRegistry>,
    pub access: Arc<dyn AccessPolicy>,
    /// Set when replies go to the in-memory outbox
    pub outbox: Option<Arc<OutboxNotifier>>,
}

/// Where replies are delivered
pub enum Delivery {
    Outbox(Arc<OutboxNotifier>),
    Other(Arc<dyn Notifier>),
}

impl AppState {
    pub fn new(
        db: Database,
        llm_registry: Arc<ModelRegistry>,
        access: Arc<dyn AccessPolicy>,
        delivery: Delivery,
    ) -> Self {
        let (notifier, outbox): (Arc<dyn Notifier>, _) = match delivery {
            Delivery::Outbox(outbox) => (outbox.clone(), Some(outbox)),
            Delivery::Other(notifier) => (notifier, None),
        };

        let orchestrator = ProductionOrchestrator::new(
            DatabaseStorage::new(db.clone()),
            RegistryLlmClient::new(llm_registry.clone(), ModelRole::Classifier),
            RegistryLlmClient::new(llm_registry.clone(), ModelRole::Responder),
            notifier,
        );

        Self {
            orchestrator: Arc::new(orchestrator),
            db,
            llm_registry,
            access,
            outbox,
        }
    }
}
