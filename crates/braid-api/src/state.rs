use std::collections::HashMap;
use std::sync::Arc;

use braid_engine::CompletionOrchestrator;
use braid_ids::IdIssuer;
use braid_persist::Store;

use crate::config::Config;

/// Shared application state passed to all handlers
///
/// All resources are wrapped in Arc for efficient sharing across async tasks.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub orchestrator: Arc<CompletionOrchestrator>,
    pub store: Arc<dyn Store>,
    pub issuer: IdIssuer,
    /// Bearer token → user id.
    pub sessions: Arc<HashMap<String, String>>,
}

impl AppState {
    pub fn new(
        config: Config,
        orchestrator: CompletionOrchestrator,
        store: Arc<dyn Store>,
        issuer: IdIssuer,
    ) -> Self {
        let sessions = Arc::new(config.sessions());
        Self {
            config: Arc::new(config),
            orchestrator: Arc::new(orchestrator),
            store,
            issuer,
            sessions,
        }
    }
}
