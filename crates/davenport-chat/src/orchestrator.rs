//! Chat turn orchestration in blocking and streaming mode.

use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, BoxStream, StreamExt};
use serde_json::Value;
use tracing::{debug, info, warn};

use davenport_core::config::{ChatConfig, GatewayConfig};
use davenport_core::error::DavenportError;
use davenport_core::types::{ChatRequest, ChatResponse, PhaseTimings, StreamEvent};

use crate::backend::{
    BackendEvent, BackendEventStream, BackendReply, BackendRequest, RawResponse, RetrievalBackend,
};
use crate::citations::CitationRewriter;
use crate::error::ChatError;
use crate::router::BackendRouter;
use crate::session::SessionManager;
use crate::stream::{assemble_response, StreamMachine};
use crate::trace::TraceExtractor;

/// Ordered events of one streamed turn, ending in exactly one `done` or
/// `error`.
pub type ChatEventStream = BoxStream<'static, StreamEvent>;

/// Result of [`ChatOrchestrator::dispatch`].
pub enum ChatOutcome {
    Complete(ChatResponse),
    Stream(ChatEventStream),
}

impl std::fmt::Debug for ChatOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatOutcome::Complete(response) => f.debug_tuple("Complete").field(response).finish(),
            ChatOutcome::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Validated turn with its session resolved, ready for the backend.
struct PreparedTurn {
    request: BackendRequest,
    timings: PhaseTimings,
    started: Instant,
}

pub(crate) fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

/// Runs one chat turn end to end.
///
/// Shared across requests behind an `Arc`; it holds no per-request state.
pub struct ChatOrchestrator {
    pub(crate) backend: Arc<dyn RetrievalBackend>,
    router: BackendRouter,
    sessions: SessionManager,
    pub(crate) rewriter: CitationRewriter,
    pub(crate) extractor: TraceExtractor,
    pub(crate) config: ChatConfig,
}

impl ChatOrchestrator {
    pub fn new(
        backend: Arc<dyn RetrievalBackend>,
        router: BackendRouter,
        rewriter: CitationRewriter,
        config: ChatConfig,
    ) -> Self {
        Self {
            backend,
            router,
            sessions: SessionManager::new(),
            rewriter,
            extractor: TraceExtractor::new(),
            config,
        }
    }

    pub fn from_config(
        backend: Arc<dyn RetrievalBackend>,
        config: &GatewayConfig,
    ) -> Result<Self, DavenportError> {
        let rewriter = CitationRewriter::new(&config.citations)
            .map_err(|e| DavenportError::Config(format!("invalid citation prefix: {}", e)))?;
        Ok(Self::new(
            backend,
            BackendRouter::from_config(&config.router),
            rewriter,
            config.chat.clone(),
        ))
    }

    pub fn router(&self) -> &BackendRouter {
        &self.router
    }

    fn validate<'r>(&self, request: &'r ChatRequest) -> Result<&'r str, ChatError> {
        let message = request
            .message
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .ok_or(ChatError::EmptyMessage)?;
        if message.chars().count() > self.config.max_message_chars {
            return Err(ChatError::MessageTooLong(self.config.max_message_chars));
        }
        Ok(message)
    }

    async fn prepare(&self, request: &ChatRequest, stream: bool) -> Result<PreparedTurn, ChatError> {
        let started = Instant::now();
        let message = self.validate(request)?;
        let profile = self.router.resolve(request.reasoning_level.as_deref());
        debug!(
            profile = %profile,
            reasoning_level = ?request.reasoning_level,
            stream,
            "Routing chat turn"
        );

        let mut timings = PhaseTimings::new();
        let session_started = Instant::now();
        let session = self
            .sessions
            .ensure_session(request.conversation_id.as_deref(), self.backend.as_ref())
            .await;
        timings.insert("conversation_create".to_string(), elapsed_ms(session_started));
        let conversation_id = session.map_err(|e| e.with_timings(timings.clone()))?;

        Ok(PreparedTurn {
            request: BackendRequest {
                conversation_id,
                message: message.to_string(),
                profile,
                force_tool_use: true,
                stream,
            },
            timings,
            started,
        })
    }

    /// Answer a turn as one response.
    pub async fn handle(&self, request: ChatRequest) -> Result<ChatResponse, ChatError> {
        let PreparedTurn {
            request,
            mut timings,
            started,
        } = self.prepare(&request, false).await?;
        let conversation_id = request.conversation_id.clone();
        let profile = request.profile.clone();

        let call_started = Instant::now();
        let reply = match self.backend.respond(request).await {
            Ok(BackendReply::Complete(raw)) => Ok(raw),
            Ok(BackendReply::Stream(events)) => drain(events).await,
            Err(e) => Err(e),
        };
        timings.insert("agent_response".to_string(), elapsed_ms(call_started));
        timings.insert("total".to_string(), elapsed_ms(started));

        let raw = match reply {
            Ok(raw) => raw,
            Err(e) => {
                warn!(conversation_id = %conversation_id, error = %e, "Backend call failed");
                return Err(e.with_timings(timings));
            }
        };

        let trace = self.extractor.extract(&raw).with_timings(timings);
        let response_text = self.rewriter.rewrite(&raw.output_text());

        info!(
            conversation_id = %conversation_id,
            profile = %profile,
            sources = trace.sources_found,
            elapsed_ms = trace.timings.get("total").copied().unwrap_or_default(),
            "Chat turn complete"
        );

        Ok(ChatResponse {
            response_text,
            conversation_id,
            trace,
        })
    }

    /// Answer a turn as an event stream.
    ///
    /// Validation and session resolution happen before the stream exists, so
    /// their failures are returned here rather than as stream events.
    pub async fn handle_stream(
        self: &Arc<Self>,
        request: ChatRequest,
    ) -> Result<ChatEventStream, ChatError> {
        let PreparedTurn {
            request,
            timings,
            started,
        } = self.prepare(&request, true).await?;

        let machine = StreamMachine::new(Arc::clone(self), request, timings, started);
        Ok(stream::unfold(machine, |mut machine| async move {
            machine.next().await.map(|event| (event, machine))
        })
        .boxed())
    }

    pub async fn dispatch(
        self: &Arc<Self>,
        request: ChatRequest,
        stream: bool,
    ) -> Result<ChatOutcome, ChatError> {
        if stream {
            self.handle_stream(request).await.map(ChatOutcome::Stream)
        } else {
            self.handle(request).await.map(ChatOutcome::Complete)
        }
    }
}

/// Collect a streamed reply into one response document.
async fn drain(mut events: BackendEventStream) -> Result<RawResponse, ChatError> {
    let mut text = String::new();
    let mut tool_calls: Vec<Value> = Vec::new();

    while let Some(event) = events.next().await {
        match event? {
            BackendEvent::TextDelta(fragment) => text.push_str(&fragment),
            BackendEvent::ToolCallCompleted(item) => tool_calls.push(item),
            BackendEvent::Completed {
                full_text,
                response,
            } => {
                if text.is_empty() {
                    text = full_text.unwrap_or_default();
                }
                return Ok(assemble_response(&text, response, tool_calls));
            }
            BackendEvent::Failed(message) => return Err(ChatError::backend(message)),
        }
    }

    if text.is_empty() {
        Err(ChatError::IncompleteStream)
    } else {
        Ok(assemble_response(&text, None, tool_calls))
    }
}
