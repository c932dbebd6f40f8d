//! Application state shared across all route handlers.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use davenport_chat::ChatOrchestrator;
use davenport_core::config::GatewayConfig;
use davenport_core::error::DavenportError;
use davenport_storage::{Database, FeedbackRepository, VoiceMemoStore};

/// Shared application state. Cloned into every handler task.
#[derive(Clone)]
pub struct AppState {
    /// Configuration as resolved at startup; read-only afterwards.
    pub config: Arc<GatewayConfig>,
    pub orchestrator: Arc<ChatOrchestrator>,
    pub feedback: Arc<FeedbackRepository>,
    pub voice_memos: Arc<VoiceMemoStore>,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        config: GatewayConfig,
        orchestrator: ChatOrchestrator,
        database: Database,
        voice_memo_dir: impl Into<PathBuf>,
    ) -> Result<Self, DavenportError> {
        let database = Arc::new(database);
        Ok(Self {
            config: Arc::new(config),
            orchestrator: Arc::new(orchestrator),
            feedback: Arc::new(FeedbackRepository::new(Arc::clone(&database))),
            voice_memos: Arc::new(VoiceMemoStore::new(database, voice_memo_dir)?),
            start_time: Instant::now(),
        })
    }
}
