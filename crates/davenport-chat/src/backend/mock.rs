//! Scripted in-memory backend for tests and local development.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::Value;

use super::{
    BackendEvent, BackendEventStream, BackendReply, BackendRequest, RawResponse, RetrievalBackend,
};
use crate::error::ChatError;

/// One scripted item of a streamed reply.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Event(BackendEvent),
    /// Transport-level failure at this point of the stream.
    Fail(String),
}

#[derive(Debug, Clone)]
enum ScriptedReply {
    Complete(Value),
    Stream { steps: Vec<ScriptStep>, hold_open: bool },
    Error(String),
}

/// Backend double that replays queued replies in order.
///
/// When the queue is exhausted, blocking calls answer with an empty
/// response and streaming calls with an immediate `Completed`.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    replies: Mutex<VecDeque<ScriptedReply>>,
    session_error: Mutex<Option<String>>,
    conversations: AtomicUsize,
    requests: Mutex<Vec<BackendRequest>>,
    released: Arc<AtomicBool>,
}

/// Marks the stream as released once the consumer drops it.
struct ReleaseGuard(Arc<AtomicBool>);

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reply(self, body: Value) -> Self {
        self.push(ScriptedReply::Complete(body))
    }

    pub fn with_reply_error(self, message: impl Into<String>) -> Self {
        self.push(ScriptedReply::Error(message.into()))
    }

    pub fn with_stream(self, steps: Vec<ScriptStep>) -> Self {
        self.push(ScriptedReply::Stream {
            steps,
            hold_open: false,
        })
    }

    /// Stream that yields `steps` and then never finishes.
    pub fn hold_stream_open(self, steps: Vec<ScriptStep>) -> Self {
        self.push(ScriptedReply::Stream {
            steps,
            hold_open: true,
        })
    }

    /// The next respond call fails before any event is produced.
    pub fn with_stream_error(self, message: impl Into<String>) -> Self {
        self.with_reply_error(message)
    }

    /// Every conversation allocation fails with `message`.
    pub fn with_session_error(self, message: impl Into<String>) -> Self {
        if let Ok(mut slot) = self.session_error.lock() {
            *slot = Some(message.into());
        }
        self
    }

    fn push(self, reply: ScriptedReply) -> Self {
        if let Ok(mut queue) = self.replies.lock() {
            queue.push_back(reply);
        }
        self
    }

    pub fn conversations_created(&self) -> usize {
        self.conversations.load(Ordering::SeqCst)
    }

    pub fn responses_requested(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn requests(&self) -> Vec<BackendRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// True once the most recent streamed reply has been dropped.
    pub fn stream_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RetrievalBackend for ScriptedBackend {
    async fn create_conversation(&self) -> Result<String, ChatError> {
        if let Some(message) = self.session_error.lock().ok().and_then(|s| s.clone()) {
            return Err(ChatError::backend(message));
        }
        let n = self.conversations.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("conv_{}", n))
    }

    async fn respond(&self, request: BackendRequest) -> Result<BackendReply, ChatError> {
        let streaming = request.stream;
        if let Ok(mut log) = self.requests.lock() {
            log.push(request);
        }

        let reply = self.replies.lock().ok().and_then(|mut q| q.pop_front());
        let reply = match reply {
            Some(reply) => reply,
            None if streaming => ScriptedReply::Stream {
                steps: vec![ScriptStep::Event(BackendEvent::Completed {
                    full_text: None,
                    response: None,
                })],
                hold_open: false,
            },
            None => ScriptedReply::Complete(Value::Object(Default::default())),
        };

        match reply {
            ScriptedReply::Complete(body) => Ok(BackendReply::Complete(RawResponse::new(body))),
            ScriptedReply::Error(message) => Err(ChatError::backend(message)),
            ScriptedReply::Stream { steps, hold_open } => {
                self.released.store(false, Ordering::SeqCst);
                let guard = ReleaseGuard(Arc::clone(&self.released));

                let items = stream::iter(steps.into_iter().map(|step| match step {
                    ScriptStep::Event(event) => Ok(event),
                    ScriptStep::Fail(message) => Err(ChatError::backend(message)),
                }));
                let tail: BackendEventStream = if hold_open {
                    stream::pending().boxed()
                } else {
                    stream::empty().boxed()
                };
                let events = items.chain(tail).map(move |item| {
                    let _held = &guard;
                    item
                });
                Ok(BackendReply::Stream(events.boxed()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::ProfileId;
    use serde_json::json;

    fn request(stream: bool) -> BackendRequest {
        BackendRequest {
            conversation_id: "conv_1".to_string(),
            message: "hello".to_string(),
            profile: ProfileId::new("agent"),
            force_tool_use: true,
            stream,
        }
    }

    #[tokio::test]
    async fn test_conversation_ids_are_sequential() {
        let backend = ScriptedBackend::new();
        assert_eq!(backend.create_conversation().await.unwrap(), "conv_1");
        assert_eq!(backend.create_conversation().await.unwrap(), "conv_2");
        assert_eq!(backend.conversations_created(), 2);
    }

    #[tokio::test]
    async fn test_replies_are_replayed_in_order() {
        let backend = ScriptedBackend::new()
            .with_reply(json!({"output_text": "first"}))
            .with_reply_error("second fails");

        match backend.respond(request(false)).await.unwrap() {
            BackendReply::Complete(raw) => assert_eq!(raw.output_text(), "first"),
            other => panic!("unexpected reply: {:?}", other),
        }
        let err = backend.respond(request(false)).await.unwrap_err();
        assert_eq!(err.to_string(), "second fails");
        assert_eq!(backend.responses_requested(), 2);
    }

    #[tokio::test]
    async fn test_stream_release_is_tracked() {
        let backend = ScriptedBackend::new().with_stream(vec![ScriptStep::Event(
            BackendEvent::TextDelta("hi".to_string()),
        )]);

        let BackendReply::Stream(mut events) = backend.respond(request(true)).await.unwrap() else {
            panic!("expected a stream");
        };
        assert!(!backend.stream_released());
        assert_eq!(
            events.next().await.unwrap().unwrap(),
            BackendEvent::TextDelta("hi".to_string())
        );
        drop(events);
        assert!(backend.stream_released());
    }

    #[tokio::test]
    async fn test_session_error() {
        let backend = ScriptedBackend::new().with_session_error("quota exceeded");
        let err = backend.create_conversation().await.unwrap_err();
        assert_eq!(err.to_string(), "quota exceeded");
        assert_eq!(backend.conversations_created(), 0);
    }
}
