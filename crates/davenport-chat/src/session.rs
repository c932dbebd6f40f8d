//! Conversation continuity across turns.

use tracing::debug;

use crate::backend::RetrievalBackend;
use crate::error::ChatError;

/// Resolves the conversation a turn belongs to.
///
/// Holds no state of its own: conversation ids are owned by the backend and
/// carried between turns by the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionManager;

impl SessionManager {
    pub fn new() -> Self {
        Self
    }

    /// Return `existing` unchanged when it is a usable id, otherwise ask the
    /// backend for a new conversation. An empty string counts as absent.
    pub async fn ensure_session(
        &self,
        existing: Option<&str>,
        backend: &dyn RetrievalBackend,
    ) -> Result<String, ChatError> {
        if let Some(id) = existing.map(str::trim).filter(|id| !id.is_empty()) {
            return Ok(id.to_string());
        }

        let id = backend.create_conversation().await?;
        debug!(conversation_id = %id, "Started new conversation");
        Ok(id)
    }
}
