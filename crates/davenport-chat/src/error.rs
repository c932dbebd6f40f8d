//! Error types for the chat gateway.

use davenport_core::error::DavenportError;
use davenport_core::types::PhaseTimings;

/// Errors from the chat orchestrator and its backend client.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Message is required")]
    EmptyMessage,
    #[error("message exceeds maximum length of {0} characters")]
    MessageTooLong(usize),
    /// The retrieval service failed or answered with an error payload. The
    /// message is the service's own text.
    #[error("{message}")]
    Backend {
        message: String,
        timings: PhaseTimings,
    },
    #[error("backend stream ended without a response")]
    IncompleteStream,
}

impl ChatError {
    pub fn backend(message: impl Into<String>) -> Self {
        ChatError::Backend {
            message: message.into(),
            timings: PhaseTimings::new(),
        }
    }

    /// Attach the phase timings collected before the failure.
    pub fn with_timings(self, collected: PhaseTimings) -> Self {
        match self {
            ChatError::Backend { message, .. } => ChatError::Backend {
                message,
                timings: collected,
            },
            other => other,
        }
    }

    /// Caller input defects; these never reach the backend.
    pub fn is_validation(&self) -> bool {
        matches!(self, ChatError::EmptyMessage | ChatError::MessageTooLong(_))
    }

    pub fn timings(&self) -> Option<&PhaseTimings> {
        match self {
            ChatError::Backend { timings, .. } if !timings.is_empty() => Some(timings),
            _ => None,
        }
    }
}

impl From<ChatError> for DavenportError {
    fn from(err: ChatError) -> Self {
        if err.is_validation() {
            DavenportError::InvalidInput(err.to_string())
        } else {
            DavenportError::Backend(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_error_display() {
        assert_eq!(ChatError::EmptyMessage.to_string(), "Message is required");
        assert_eq!(
            ChatError::MessageTooLong(4000).to_string(),
            "message exceeds maximum length of 4000 characters"
        );
        assert_eq!(
            ChatError::IncompleteStream.to_string(),
            "backend stream ended without a response"
        );
    }

    #[test]
    fn test_backend_error_is_verbatim() {
        let err = ChatError::backend("Agent 'davenport-fast' not found");
        assert_eq!(err.to_string(), "Agent 'davenport-fast' not found");
        assert!(!err.is_validation());
    }

    #[test]
    fn test_with_timings_only_applies_to_backend_errors() {
        let mut timings = PhaseTimings::new();
        timings.insert("conversation_create".to_string(), 12);

        let err = ChatError::backend("boom").with_timings(timings.clone());
        assert_eq!(err.timings(), Some(&timings));

        let err = ChatError::EmptyMessage.with_timings(timings);
        assert!(err.timings().is_none());
    }

    #[test]
    fn test_empty_timings_are_not_reported() {
        assert!(ChatError::backend("boom").timings().is_none());
    }

    #[test]
    fn test_conversion_to_davenport_error() {
        let err: DavenportError = ChatError::EmptyMessage.into();
        assert!(matches!(err, DavenportError::InvalidInput(_)));

        let err: DavenportError = ChatError::backend("timeout").into();
        assert!(matches!(err, DavenportError::Backend(_)));
        assert!(err.to_string().contains("timeout"));
    }
}
