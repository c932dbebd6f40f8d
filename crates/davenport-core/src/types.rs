use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Phase name to elapsed wall-clock milliseconds.
pub type PhaseTimings = BTreeMap<String, u64>;

// =============================================================================
// Enums
// =============================================================================

/// Reasoning level requested by the caller.
///
/// Each level maps to one configured backend profile. Labels are matched
/// case-insensitively after trimming.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningLevel {
    /// Minimal retrieval reasoning.
    Fast,
    /// Low retrieval reasoning.
    Balanced,
    /// Medium retrieval reasoning.
    Thorough,
    /// Single direct index search.
    Direct,
}

impl ReasoningLevel {
    pub const ALL: [ReasoningLevel; 4] = [
        ReasoningLevel::Fast,
        ReasoningLevel::Balanced,
        ReasoningLevel::Thorough,
        ReasoningLevel::Direct,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReasoningLevel::Fast => "fast",
            ReasoningLevel::Balanced => "balanced",
            ReasoningLevel::Thorough => "thorough",
            ReasoningLevel::Direct => "direct",
        }
    }
}

impl fmt::Display for ReasoningLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReasoningLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        ReasoningLevel::ALL
            .into_iter()
            .find(|level| level.as_str() == normalized)
            .ok_or_else(|| format!("unknown reasoning level '{}'", s))
    }
}

/// Thumbs up / thumbs down on an answer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackRating {
    Up,
    Down,
}

impl FeedbackRating {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackRating::Up => "up",
            FeedbackRating::Down => "down",
        }
    }
}

impl FromStr for FeedbackRating {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "up" => Ok(FeedbackRating::Up),
            "down" => Ok(FeedbackRating::Down),
            _ => Err(format!("rating must be 'up' or 'down', got '{}'", s)),
        }
    }
}

// =============================================================================
// Chat wire types
// =============================================================================

/// Inbound chat request body, shared by `/chat` and `/chat/stream`.
///
/// `message` is optional on the wire so that a missing field surfaces as a
/// validation error rather than a deserialization failure.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub reasoning_level: Option<String>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn with_reasoning_level(mut self, level: impl Into<String>) -> Self {
        self.reasoning_level = Some(level.into());
        self
    }
}

/// Blocking-mode chat reply.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    #[serde(rename = "response")]
    pub response_text: String,
    pub conversation_id: String,
    pub trace: Trace,
}

/// Aggregate token counters reported by the backend.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub total: u64,
}

/// Diagnostic record of how an answer was produced.
///
/// Every field has a zero/empty default so a trace is always complete,
/// even when extraction from the backend response failed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    /// `"<name> v<version>"` of the agent that answered.
    pub backend_identity: Option<String>,
    /// Retrieval sub-queries in the order the backend issued them.
    pub query_intents: Vec<String>,
    pub sources_found: u64,
    pub token_usage: TokenUsage,
    pub timings: PhaseTimings,
}

impl Trace {
    pub fn with_timings(mut self, timings: PhaseTimings) -> Self {
        self.timings = timings;
        self
    }
}

/// One framed event of a streamed chat reply.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Session { conversation_id: String },
    Status { text: String },
    Delta { text: String },
    Done { full_text: String, trace: Trace },
    Error { text: String },
}

impl StreamEvent {
    /// `done` and `error` end a stream; nothing may follow them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done { .. } | StreamEvent::Error { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Session { .. } => "session",
            StreamEvent::Status { .. } => "status",
            StreamEvent::Delta { .. } => "delta",
            StreamEvent::Done { .. } => "done",
            StreamEvent::Error { .. } => "error",
        }
    }
}

// =============================================================================
// Feedback
// =============================================================================

/// Feedback submitted by a user about one answer.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FeedbackSubmission {
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub answer: Option<String>,
    /// `"up"` or `"down"`; validated by the handler.
    #[serde(default)]
    pub rating: String,
    #[serde(default)]
    pub comment: Option<String>,
}

/// A stored feedback row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEntry {
    pub id: Uuid,
    pub conversation_id: Option<String>,
    pub question: Option<String>,
    pub answer: Option<String>,
    pub rating: FeedbackRating,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reasoning_level_parse() {
        assert_eq!("fast".parse::<ReasoningLevel>(), Ok(ReasoningLevel::Fast));
        assert_eq!(" Thorough ".parse::<ReasoningLevel>(), Ok(ReasoningLevel::Thorough));
        assert_eq!("DIRECT".parse::<ReasoningLevel>(), Ok(ReasoningLevel::Direct));
        assert!("medium".parse::<ReasoningLevel>().is_err());
        assert!("".parse::<ReasoningLevel>().is_err());
    }

    #[test]
    fn test_reasoning_level_display_matches_label() {
        for level in ReasoningLevel::ALL {
            assert_eq!(level.to_string().parse::<ReasoningLevel>(), Ok(level));
        }
    }

    #[test]
    fn test_feedback_rating_parse() {
        assert_eq!("up".parse::<FeedbackRating>(), Ok(FeedbackRating::Up));
        assert_eq!("Down".parse::<FeedbackRating>(), Ok(FeedbackRating::Down));
        assert!("sideways".parse::<FeedbackRating>().is_err());
    }

    #[test]
    fn test_chat_request_missing_fields_deserialize() {
        let req: ChatRequest = serde_json::from_str("{}").unwrap();
        assert!(req.message.is_none());
        assert!(req.conversation_id.is_none());
        assert!(req.reasoning_level.is_none());
    }

    #[test]
    fn test_chat_response_uses_response_key() {
        let resp = ChatResponse {
            response_text: "hello".to_string(),
            conversation_id: "conv_1".to_string(),
            trace: Trace::default(),
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["response"], "hello");
        assert_eq!(json["conversation_id"], "conv_1");
        assert_eq!(json["trace"]["sources_found"], 0);
        assert!(json["trace"]["backend_identity"].is_null());
    }

    #[test]
    fn test_stream_event_wire_format() {
        let event = StreamEvent::Session {
            conversation_id: "conv_1".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&event).unwrap(),
            r#"{"type":"session","conversation_id":"conv_1"}"#
        );

        let event = StreamEvent::Delta {
            text: "Foo".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&event).unwrap(),
            r#"{"type":"delta","text":"Foo"}"#
        );
    }

    #[test]
    fn test_stream_event_terminal() {
        assert!(StreamEvent::Error { text: "x".into() }.is_terminal());
        assert!(StreamEvent::Done {
            full_text: String::new(),
            trace: Trace::default()
        }
        .is_terminal());
        assert!(!StreamEvent::Status { text: "x".into() }.is_terminal());
        assert!(!StreamEvent::Delta { text: "x".into() }.is_terminal());
    }
}
