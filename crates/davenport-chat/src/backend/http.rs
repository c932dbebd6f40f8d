//! HTTP client for the hosted agent service.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use davenport_core::config::BackendConfig;

use super::sse::{parse_event, SseDecoder};
use super::{BackendEvent, BackendReply, BackendRequest, RawResponse, RetrievalBackend};
use crate::error::ChatError;

/// Agent service reached over its OpenAI-compatible REST surface.
pub struct HttpBackend {
    client: Client,
    endpoint: String,
    api_version: String,
    token: Option<String>,
    request_timeout: Duration,
    stream_idle_timeout: Duration,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig, token: Option<String>) -> Result<Self, ChatError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| ChatError::backend(format!("failed to build HTTP client: {}", e)))?;

        info!(endpoint = %config.endpoint, "Backend client configured");

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_version: config.api_version.clone(),
            token: token.filter(|t| !t.trim().is_empty()),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            stream_idle_timeout: Duration::from_secs(config.stream_idle_timeout_secs),
        })
    }

    /// Read the bearer token from the environment variable named in config.
    pub fn from_env(config: &BackendConfig) -> Result<Self, ChatError> {
        let token = std::env::var(&config.token_env).ok();
        if token.is_none() {
            tracing::warn!(
                var = %config.token_env,
                "No backend token in environment; requests will be unauthenticated"
            );
        }
        Self::new(config, token)
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/openai/{}?api-version={}",
            self.endpoint, path, self.api_version
        )
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let builder = self.client.post(self.url(path));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn response_body(request: &BackendRequest) -> Value {
        let mut body = json!({
            "conversation": request.conversation_id,
            "input": request.message,
            "agent": {
                "name": request.profile.as_str(),
                "type": "agent_reference",
            },
        });
        if request.force_tool_use {
            body["tool_choice"] = json!("required");
        }
        if request.stream {
            body["stream"] = json!(true);
        }
        body
    }
}

async fn ensure_success(response: Response) -> Result<Response, ChatError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    Err(ChatError::backend(failure_message(status, &text)))
}

fn failure_message(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| format!("backend returned {}: {}", status, body.trim()))
}

fn transport_error(e: reqwest::Error) -> ChatError {
    if e.is_timeout() {
        ChatError::backend("backend request timed out")
    } else {
        ChatError::backend(format!("backend request failed: {}", e))
    }
}

#[async_trait]
impl RetrievalBackend for HttpBackend {
    async fn create_conversation(&self) -> Result<String, ChatError> {
        let response = self
            .post("conversations")
            .timeout(self.request_timeout)
            .json(&json!({}))
            .send()
            .await
            .map_err(transport_error)?;
        let body: Value = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(transport_error)?;

        let id = body
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| ChatError::backend("conversation response did not include an id"))?;
        debug!(conversation_id = id, "Created backend conversation");
        Ok(id.to_string())
    }

    async fn respond(&self, request: BackendRequest) -> Result<BackendReply, ChatError> {
        let body = Self::response_body(&request);
        let builder = self.post("responses").json(&body);
        let response = if request.stream {
            // Streams have no overall deadline; the idle limit covers the
            // wait for headers and every gap between chunks.
            tokio::time::timeout(self.stream_idle_timeout, builder.send())
                .await
                .map_err(|_| ChatError::backend("backend request timed out"))?
        } else {
            builder.timeout(self.request_timeout).send().await
        }
        .map_err(transport_error)?;
        let response = ensure_success(response).await?;

        if !request.stream {
            let value: Value = response.json().await.map_err(transport_error)?;
            if let Some(message) = value.pointer("/error/message").and_then(Value::as_str) {
                return Err(ChatError::backend(message));
            }
            return Ok(BackendReply::Complete(RawResponse::new(value)));
        }

        let bytes = response.bytes_stream().map(|chunk| {
            chunk
                .map(|b| b.to_vec())
                .map_err(transport_error)
        });
        Ok(BackendReply::Stream(decode_events(
            bytes.boxed(),
            self.stream_idle_timeout,
        )))
    }
}

struct EventReader {
    bytes: BoxStream<'static, Result<Vec<u8>, ChatError>>,
    decoder: SseDecoder,
    queue: VecDeque<BackendEvent>,
    idle_timeout: Duration,
    exhausted: bool,
}

/// Turn an SSE byte stream into backend events.
///
/// A gap longer than `idle_timeout` between chunks ends the stream with a
/// timeout error.
pub(crate) fn decode_events(
    bytes: BoxStream<'static, Result<Vec<u8>, ChatError>>,
    idle_timeout: Duration,
) -> super::BackendEventStream {
    let reader = EventReader {
        bytes,
        decoder: SseDecoder::new(),
        queue: VecDeque::new(),
        idle_timeout,
        exhausted: false,
    };

    stream::unfold(reader, |mut reader| async move {
        loop {
            if let Some(event) = reader.queue.pop_front() {
                return Some((Ok(event), reader));
            }
            if reader.exhausted {
                return None;
            }
            let next = tokio::time::timeout(reader.idle_timeout, reader.bytes.next()).await;
            match next {
                Ok(Some(Ok(chunk))) => {
                    let events = reader.decoder.push(&chunk);
                    reader.queue.extend(events.iter().filter_map(parse_event));
                }
                Ok(Some(Err(e))) => {
                    reader.exhausted = true;
                    return Some((Err(e), reader));
                }
                Err(_) => {
                    warn!(
                        idle_secs = reader.idle_timeout.as_secs_f64(),
                        "Backend stream stalled"
                    );
                    reader.exhausted = true;
                    return Some((Err(ChatError::backend("backend request timed out")), reader));
                }
                Ok(None) => {
                    reader.exhausted = true;
                    if let Some(frame) = reader.decoder.finish() {
                        reader.queue.extend(parse_event(&frame));
                    }
                }
            }
        }
    })
    .boxed()
}
