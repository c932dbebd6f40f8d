//! API error types and JSON error response formatting.
//!
//! Every failure leaves the gateway as `{"error": <text>, "code": <code>}`,
//! with optional `details`. The `error` text is shown to users as-is.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use davenport_chat::ChatError;
use davenport_core::error::DavenportError;

/// JSON error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable error message.
    pub error: String,
    /// Machine-readable error code (e.g., "bad_request", "backend_error").
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug)]
pub enum ApiError {
    /// 400 - missing or invalid input.
    BadRequest(String),
    /// 413 - body over the route's size limit.
    PayloadTooLarge(String),
    /// 429 - rate limit exceeded.
    TooManyRequests,
    /// 500 - the retrieval backend failed; its text is passed through.
    Backend {
        message: String,
        details: Option<Value>,
    },
    /// 500 - unexpected server error.
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Backend { .. } | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (code, error, details) = match self {
            ApiError::BadRequest(msg) => ("bad_request", msg, None),
            ApiError::PayloadTooLarge(msg) => ("payload_too_large", msg, None),
            ApiError::TooManyRequests => ("too_many_requests", "Rate limit exceeded".to_string(), None),
            ApiError::Backend { message, details } => ("backend_error", message, details),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                ("internal_error", msg, None)
            }
        };

        let body = ErrorBody {
            error,
            code: code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        if err.is_validation() {
            return ApiError::BadRequest(err.to_string());
        }
        let details = err.timings().map(|timings| json!({ "timings": timings }));
        ApiError::Backend {
            message: err.to_string(),
            details,
        }
    }
}

impl From<DavenportError> for ApiError {
    fn from(err: DavenportError) -> Self {
        match err {
            DavenportError::InvalidInput(msg) => ApiError::BadRequest(msg),
            DavenportError::Backend(msg) => ApiError::Backend {
                message: msg,
                details: None,
            },
            other => ApiError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use davenport_core::types::PhaseTimings;

    async fn body_of(err: ApiError) -> (StatusCode, ErrorBody) {
        let resp = err.into_response();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), 64 * 1024).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_validation_error_is_400() {
        let (status, body) = body_of(ChatError::EmptyMessage.into()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.error, "Message is required");
        assert_eq!(body.code, "bad_request");
        assert!(body.details.is_none());
    }

    #[tokio::test]
    async fn test_backend_error_is_500_with_timings() {
        let mut timings = PhaseTimings::new();
        timings.insert("conversation_create".to_string(), 40);
        let err = ChatError::backend("Agent 'davenport-fast' not found").with_timings(timings);

        let (status, body) = body_of(err.into()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.error, "Agent 'davenport-fast' not found");
        assert_eq!(body.code, "backend_error");
        assert_eq!(body.details.unwrap()["timings"]["conversation_create"], 40);
    }

    #[tokio::test]
    async fn test_storage_error_is_internal() {
        let (status, body) =
            body_of(DavenportError::Storage("disk full".to_string()).into()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.code, "internal_error");
        assert!(body.error.contains("disk full"));
    }

    #[tokio::test]
    async fn test_invalid_input_is_400() {
        let err: ApiError =
            DavenportError::InvalidInput("voice memo body is empty".to_string()).into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        let (_, body) = body_of(err).await;
        assert_eq!(body.error, "voice memo body is empty");
    }

    #[tokio::test]
    async fn test_payload_too_large() {
        let (status, body) =
            body_of(ApiError::PayloadTooLarge("Request body too large".to_string())).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body.code, "payload_too_large");
    }
}
