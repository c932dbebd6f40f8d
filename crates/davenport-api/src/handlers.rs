//! Route handler functions for all API endpoints.
//!
//! JSON bodies are read as raw bytes and decoded here, so a missing
//! content type or a malformed body gets the same JSON error shape as
//! every other failure.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use davenport_chat::ChatOutcome;
use davenport_core::types::{ChatRequest, FeedbackEntry, FeedbackRating, FeedbackSubmission};

use crate::error::ApiError;
use crate::sse::chat_event_response;
use crate::state::AppState;

const DEFAULT_FEEDBACK_LIMIT: u32 = 50;
const MAX_FEEDBACK_LIMIT: u32 = 500;

// =============================================================================
// Request / response types
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct FeedbackParams {
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FeedbackCreated {
    pub id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FeedbackList {
    pub entries: Vec<FeedbackEntry>,
}

#[derive(Debug, Deserialize)]
pub struct VoiceMemoParams {
    pub conversation_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VoiceMemoCreated {
    pub id: Uuid,
    pub bytes: u64,
}

// =============================================================================
// Body helpers
// =============================================================================

fn read_body(body: Result<Bytes, BytesRejection>) -> Result<Bytes, ApiError> {
    body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge("Request body too large".to_string())
        } else {
            ApiError::BadRequest(rejection.body_text())
        }
    })
}

fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| {
        tracing::debug!(error = %e, "Rejected request body");
        ApiError::BadRequest("Invalid JSON in request body".to_string())
    })
}

// =============================================================================
// Chat
// =============================================================================

/// POST /chat - answer one turn as a single JSON response.
pub async fn chat(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, ApiError> {
    run_turn(&state, body, false).await
}

/// POST /chat/stream - answer one turn as server-sent events.
pub async fn chat_stream(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, ApiError> {
    run_turn(&state, body, true).await
}

async fn run_turn(
    state: &AppState,
    body: Result<Bytes, BytesRejection>,
    stream: bool,
) -> Result<Response, ApiError> {
    let request: ChatRequest = parse_json(&read_body(body)?)?;
    match state.orchestrator.dispatch(request, stream).await? {
        ChatOutcome::Complete(response) => Ok(Json(response).into_response()),
        ChatOutcome::Stream(events) => {
            let keep_alive = Duration::from_secs(state.config.server.sse_keep_alive_secs.max(1));
            Ok(chat_event_response(events, keep_alive))
        }
    }
}

// =============================================================================
// Feedback
// =============================================================================

/// POST /feedback - record a rating for an answer.
pub async fn submit_feedback(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<(StatusCode, Json<FeedbackCreated>), ApiError> {
    let submission: FeedbackSubmission = parse_json(&read_body(body)?)?;
    let rating = submission
        .rating
        .parse::<FeedbackRating>()
        .map_err(ApiError::BadRequest)?;

    let entry = FeedbackEntry {
        id: Uuid::new_v4(),
        conversation_id: non_blank(submission.conversation_id),
        question: non_blank(submission.question),
        answer: non_blank(submission.answer),
        rating,
        comment: non_blank(submission.comment),
        created_at: Utc::now(),
    };
    state.feedback.save(&entry)?;

    tracing::info!(
        feedback_id = %entry.id,
        rating = rating.as_str(),
        conversation_id = ?entry.conversation_id,
        "Feedback recorded"
    );
    Ok((StatusCode::CREATED, Json(FeedbackCreated { id: entry.id })))
}

/// GET /feedback - most recent feedback first.
pub async fn list_feedback(
    State(state): State<AppState>,
    Query(params): Query<FeedbackParams>,
) -> Result<Json<FeedbackList>, ApiError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_FEEDBACK_LIMIT)
        .clamp(1, MAX_FEEDBACK_LIMIT);
    let entries = state.feedback.list_recent(limit)?;
    Ok(Json(FeedbackList { entries }))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

// =============================================================================
// Voice memo
// =============================================================================

/// POST /voice-memo - store a raw audio upload.
pub async fn upload_voice_memo(
    State(state): State<AppState>,
    Query(params): Query<VoiceMemoParams>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<(StatusCode, Json<VoiceMemoCreated>), ApiError> {
    let audio = read_body(body)?;
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    // The store writes the file and the row synchronously.
    let store = Arc::clone(&state.voice_memos);
    let memo = tokio::task::spawn_blocking(move || {
        store.save(params.conversation_id.as_deref(), &content_type, &audio)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("Voice memo task failed: {}", e)))??;

    Ok((
        StatusCode::CREATED,
        Json(VoiceMemoCreated {
            id: memo.id,
            bytes: memo.size_bytes,
        }),
    ))
}

// =============================================================================
// Health
// =============================================================================

/// GET /health - liveness check.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}
