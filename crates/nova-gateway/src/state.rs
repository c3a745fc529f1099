//! The process-wide resource bundle.

use std::sync::Arc;

use nova_broker::Broker;
use nova_config::Settings;
use nova_core::{PersonaCatalog, ScenarioCatalog};
use nova_llm::LlmProvider;
use nova_retrieval::RetrievalAdapter;
use nova_session::SessionStore;
use nova_store::DocumentStore;
use nova_stream::StreamHub;

use crate::objects::ObjectStore;

/// Everything a route handler may need, constructed once at startup and
/// passed explicitly. No global clients, no lazily-mutated singletons.
pub struct AppState {
    /// Environment settings.
    pub settings: Settings,
    /// AMQP adapter.
    pub broker: Arc<Broker>,
    /// Fan-out hub fed by this node's result router.
    pub hub: Arc<StreamHub>,
    /// Session store.
    pub sessions: Arc<dyn SessionStore>,
    /// Document store.
    pub documents: Arc<DocumentStore>,
    /// Vector retrieval adapter.
    pub retrieval: Arc<RetrievalAdapter>,
    /// Model provider (RAG answers served by the gateway).
    pub llm: Arc<dyn LlmProvider>,
    /// Uploaded-file storage.
    pub objects: Arc<dyn ObjectStore>,
    /// Preset persona catalog.
    pub personas: PersonaCatalog,
    /// Scenario catalog.
    pub scenarios: ScenarioCatalog,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
