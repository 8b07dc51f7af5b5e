//! Shared state for the HTTP API.

use crate::config::GenerationConfig;
use crate::generation::GenerationClient;
use crate::orchestrator::RetrievalOrchestrator;
use std::sync::Arc;
use std::time::Instant;

/// State shared across all API handlers.
pub struct ApiState {
    pub orchestrator: Arc<RetrievalOrchestrator>,
    pub generation: Arc<GenerationClient>,
    pub generation_defaults: GenerationConfig,
    pub started_at: Instant,
}

impl ApiState {
    pub fn new(
        orchestrator: Arc<RetrievalOrchestrator>,
        generation: Arc<GenerationClient>,
        generation_defaults: GenerationConfig,
    ) -> Self {
        Self {
            orchestrator,
            generation,
            generation_defaults,
            started_at: Instant::now(),
        }
    }
}
