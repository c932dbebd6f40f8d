//! Per-request streaming state machine.
//!
//! A streamed turn moves `SessionSent -> Searching -> Generating -> Finished`.
//! Each call to [`StreamMachine::next`] yields the next event to forward, so
//! the machine only does work while the caller is still polling. Dropping
//! it drops the backend stream with it.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use serde_json::{Map, Value};
use tracing::{info, warn};

use davenport_core::types::{PhaseTimings, StreamEvent, Trace};

use crate::backend::{BackendEvent, BackendEventStream, BackendReply, BackendRequest, RawResponse};
use crate::error::ChatError;
use crate::orchestrator::{elapsed_ms, ChatOrchestrator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    SessionSent,
    Searching,
    Generating,
    Finished,
}

pub(crate) struct StreamMachine {
    orchestrator: Arc<ChatOrchestrator>,
    request: Option<BackendRequest>,
    phase: Phase,
    pending: VecDeque<StreamEvent>,
    events: Option<BackendEventStream>,
    text: String,
    tool_calls: Vec<Value>,
    timings: PhaseTimings,
    started: Instant,
    call_started: Option<Instant>,
}

impl StreamMachine {
    pub(crate) fn new(
        orchestrator: Arc<ChatOrchestrator>,
        request: BackendRequest,
        timings: PhaseTimings,
        started: Instant,
    ) -> Self {
        let session = StreamEvent::Session {
            conversation_id: request.conversation_id.clone(),
        };
        Self {
            orchestrator,
            request: Some(request),
            phase: Phase::SessionSent,
            pending: VecDeque::from([session]),
            events: None,
            text: String::new(),
            tool_calls: Vec::new(),
            timings,
            started,
            call_started: None,
        }
    }

    /// Next event for the caller, or `None` once a terminal event was sent.
    pub(crate) async fn next(&mut self) -> Option<StreamEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }

            match self.phase {
                Phase::Finished => return None,
                Phase::SessionSent => {
                    let text = self.orchestrator.config.search_status.clone();
                    self.pending.push_back(StreamEvent::Status { text });
                    self.phase = Phase::Searching;
                }
                Phase::Searching => self.start_backend().await,
                Phase::Generating => self.pull().await,
            }
        }
    }

    async fn start_backend(&mut self) {
        let Some(request) = self.request.take() else {
            self.fail(ChatError::IncompleteStream);
            return;
        };

        self.call_started = Some(Instant::now());
        match self.orchestrator.backend.respond(request).await {
            Ok(BackendReply::Stream(events)) => {
                self.events = Some(events);
                self.phase = Phase::Generating;
            }
            // Backend without incremental delivery: the whole answer at once.
            Ok(BackendReply::Complete(raw)) => {
                let text = raw.output_text();
                self.finish(Some(text), Some(raw));
            }
            Err(e) => self.fail(e),
        }
    }

    async fn pull(&mut self) {
        let Some(events) = self.events.as_mut() else {
            self.fail(ChatError::IncompleteStream);
            return;
        };

        match events.next().await {
            Some(Ok(BackendEvent::TextDelta(fragment))) => self.on_fragment(fragment),
            Some(Ok(BackendEvent::ToolCallCompleted(item))) => self.tool_calls.push(item),
            Some(Ok(BackendEvent::Completed {
                full_text,
                response,
            })) => self.finish(full_text, response),
            Some(Ok(BackendEvent::Failed(message))) => self.fail(ChatError::backend(message)),
            Some(Err(e)) => self.fail(e),
            None if self.text.is_empty() => self.fail(ChatError::IncompleteStream),
            None => {
                warn!("Backend stream ended without a terminal event");
                self.record_completion();
                let text = std::mem::take(&mut self.text);
                let full_text = self.orchestrator.rewriter.rewrite(&text);
                let trace = Trace::default().with_timings(std::mem::take(&mut self.timings));
                self.close(StreamEvent::Done { full_text, trace });
            }
        }
    }

    fn on_fragment(&mut self, fragment: String) {
        if fragment.is_empty() {
            return;
        }
        if self.text.is_empty() {
            if let Some(call_started) = self.call_started {
                self.timings
                    .insert("first_token".to_string(), elapsed_ms(call_started));
            }
            if self.orchestrator.config.announce_generation {
                let text = self.orchestrator.config.generating_status.clone();
                self.pending.push_back(StreamEvent::Status { text });
            }
        }
        self.text.push_str(&fragment);
        self.pending.push_back(StreamEvent::Delta { text: fragment });
    }

    fn record_completion(&mut self) {
        if let Some(call_started) = self.call_started {
            self.timings
                .insert("agent_response".to_string(), elapsed_ms(call_started));
        }
        self.timings
            .insert("total".to_string(), elapsed_ms(self.started));
    }

    fn finish(&mut self, full_text: Option<String>, response: Option<RawResponse>) {
        self.record_completion();

        let text = if self.text.is_empty() {
            full_text.unwrap_or_default()
        } else {
            std::mem::take(&mut self.text)
        };
        let raw = assemble_response(&text, response, std::mem::take(&mut self.tool_calls));
        let trace = self
            .orchestrator
            .extractor
            .extract(&raw)
            .with_timings(std::mem::take(&mut self.timings));

        info!(
            sources = trace.sources_found,
            elapsed_ms = trace.timings.get("total").copied().unwrap_or_default(),
            "Streamed answer complete"
        );

        let full_text = self.orchestrator.rewriter.rewrite(&text);
        self.close(StreamEvent::Done { full_text, trace });
    }

    fn fail(&mut self, error: ChatError) {
        warn!(error = %error, "Chat stream failed");
        self.close(StreamEvent::Error {
            text: error.to_string(),
        });
    }

    fn close(&mut self, terminal: StreamEvent) {
        self.events = None;
        self.pending.push_back(terminal);
        self.phase = Phase::Finished;
    }
}

/// Build the response document a trace is read from.
///
/// Completed tool calls seen on the stream fill in `output` when the
/// terminal event carried none, and the answer text is recorded as
/// `output_text` when the document lacks one.
pub(crate) fn assemble_response(
    text: &str,
    response: Option<RawResponse>,
    tool_calls: Vec<Value>,
) -> RawResponse {
    let mut body = match response.map(|r| r.body().clone()) {
        Some(Value::Object(fields)) => fields,
        _ => Map::new(),
    };

    let has_output = body
        .get("output")
        .and_then(Value::as_array)
        .is_some_and(|items| !items.is_empty());
    if !has_output && !tool_calls.is_empty() {
        body.insert("output".to_string(), Value::Array(tool_calls));
    }
    if !body.contains_key("output_text") && !text.is_empty() {
        body.insert("output_text".to_string(), Value::String(text.to_string()));
    }

    RawResponse::new(Value::Object(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_assemble_uses_tool_calls_when_output_missing() {
        let call = json!({"type": "mcp_call", "output": "Retrieved 1 documents"});
        let raw = assemble_response(
            "answer",
            Some(RawResponse::new(json!({"usage": {"total_tokens": 5}}))),
            vec![call.clone()],
        );
        assert_eq!(raw.body()["output"], json!([call]));
        assert_eq!(raw.body()["usage"]["total_tokens"], 5);
        assert_eq!(raw.output_text(), "answer");
    }

    #[test]
    fn test_assemble_keeps_existing_output() {
        let body = json!({
            "output": [{"type": "mcp_call", "output": "Retrieved 4 documents"}],
            "output_text": "from backend"
        });
        let raw = assemble_response(
            "accumulated",
            Some(RawResponse::new(body.clone())),
            vec![json!({"type": "mcp_call"})],
        );
        assert_eq!(raw.body(), &body);
    }

    #[test]
    fn test_assemble_without_response() {
        let raw = assemble_response("", None, Vec::new());
        assert_eq!(raw.body(), &json!({}));
    }
}
