//! Retrieval/generation backend contract.
//!
//! The gateway treats the agent service as an opaque capability: it can
//! allocate a conversation and answer a message, either as one JSON
//! document or as a sequence of incremental events.

pub mod http;
pub mod mock;
pub mod sse;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;

use crate::error::ChatError;
use crate::router::ProfileId;

pub use http::HttpBackend;
pub use mock::{ScriptStep, ScriptedBackend};

/// One call to the backend's respond operation.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendRequest {
    pub conversation_id: String,
    pub message: String,
    pub profile: ProfileId,
    /// Require the agent to consult its retrieval tool.
    pub force_tool_use: bool,
    pub stream: bool,
}

/// Raw JSON document returned by the backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawResponse {
    body: Value,
}

impl RawResponse {
    pub fn new(body: Value) -> Self {
        Self { body }
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    /// Answer text: the top-level `output_text` when present, otherwise the
    /// concatenated `output_text` parts of every message item.
    pub fn output_text(&self) -> String {
        if let Some(text) = self.body.get("output_text").and_then(Value::as_str) {
            return text.to_string();
        }

        let Some(items) = self.body.get("output").and_then(Value::as_array) else {
            return String::new();
        };

        items
            .iter()
            .filter(|item| item.get("type").and_then(Value::as_str) == Some("message"))
            .filter_map(|item| item.get("content").and_then(Value::as_array))
            .flatten()
            .filter(|part| part.get("type").and_then(Value::as_str) == Some("output_text"))
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect()
    }
}

/// Incremental unit of a streamed backend answer.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    /// Next fragment of answer text.
    TextDelta(String),
    /// A retrieval tool call finished; carries the raw output item.
    ToolCallCompleted(Value),
    /// Terminal success. `full_text` is set when the backend delivered the
    /// whole answer in the terminal event.
    Completed {
        full_text: Option<String>,
        response: Option<RawResponse>,
    },
    /// Terminal failure reported in-band by the backend.
    Failed(String),
}

pub type BackendEventStream = BoxStream<'static, Result<BackendEvent, ChatError>>;

/// What the backend handed back for a respond call.
pub enum BackendReply {
    Complete(RawResponse),
    Stream(BackendEventStream),
}

impl std::fmt::Debug for BackendReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendReply::Complete(raw) => f.debug_tuple("Complete").field(raw).finish(),
            BackendReply::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Client handle for the agent service.
///
/// Implementations hold no per-request state and are shared across
/// concurrent requests behind an `Arc`.
#[async_trait]
pub trait RetrievalBackend: Send + Sync {
    /// Allocate a new conversation and return its id.
    async fn create_conversation(&self) -> Result<String, ChatError>;

    /// Answer `request.message` within `request.conversation_id`.
    ///
    /// Returns a stream when `request.stream` is set and the backend supports
    /// incremental delivery; callers must accept either shape.
    async fn respond(&self, request: BackendRequest) -> Result<BackendReply, ChatError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_output_text_prefers_top_level_field() {
        let raw = RawResponse::new(json!({
            "output_text": "direct",
            "output": [{"type": "message", "content": [{"type": "output_text", "text": "nested"}]}]
        }));
        assert_eq!(raw.output_text(), "direct");
    }

    #[test]
    fn test_output_text_concatenates_message_parts() {
        let raw = RawResponse::new(json!({
            "output": [
                {"type": "mcp_call", "output": "Retrieved 3 documents"},
                {"type": "message", "content": [
                    {"type": "output_text", "text": "Check the "},
                    {"type": "refusal", "refusal": "ignored"},
                    {"type": "output_text", "text": "feed fingers."}
                ]}
            ]
        }));
        assert_eq!(raw.output_text(), "Check the feed fingers.");
    }

    #[test]
    fn test_output_text_missing_is_empty() {
        assert_eq!(RawResponse::new(json!({})).output_text(), "");
        assert_eq!(RawResponse::new(json!("not an object")).output_text(), "");
        assert_eq!(RawResponse::new(json!({"output": 7})).output_text(), "");
    }
}
