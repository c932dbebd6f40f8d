//! Server-sent event decoding for the backend's streaming responses.

use serde_json::Value;
use tracing::{debug, warn};

use super::{BackendEvent, RawResponse};

/// One dispatched SSE frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental line-oriented SSE decoder.
///
/// Bytes may arrive split at arbitrary points, including inside a UTF-8
/// sequence; only complete lines are interpreted.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every frame it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        let mut buffer = std::mem::take(&mut self.buffer);
        // The carried-over tail never holds a newline.
        let mut cursor = buffer.len();
        buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut start = 0;
        while let Some(offset) = buffer[cursor..].iter().position(|&b| b == b'\n') {
            let end = cursor + offset;
            let mut line = &buffer[start..end];
            if line.last() == Some(&b'\r') {
                line = &line[..line.len() - 1];
            }
            let line = String::from_utf8_lossy(line);
            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
            start = end + 1;
            cursor = start;
        }

        buffer.drain(..start);
        self.buffer = buffer;
        frames
    }

    /// Flush a trailing frame that was not terminated by a blank line.
    pub fn finish(&mut self) -> Option<SseFrame> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest).into_owned();
            let line = line.trim_end_matches('\r');
            if let Some(frame) = self.process_line(line) {
                return Some(frame);
            }
        }
        self.dispatch()
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => self.data.push(value.to_string()),
            "event" => self.event = Some(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        if self.data.is_empty() {
            self.event = None;
            return None;
        }
        Some(SseFrame {
            event: self.event.take(),
            data: std::mem::take(&mut self.data).join("\n"),
        })
    }
}

/// Map one frame to a backend event. Frames the gateway has no use for
/// yield `None`.
pub fn parse_event(frame: &SseFrame) -> Option<BackendEvent> {
    if frame.data.trim() == "[DONE]" {
        return None;
    }

    let value: Value = match serde_json::from_str(&frame.data) {
        Ok(value) => value,
        Err(e) => {
            warn!("Ignoring malformed stream frame: {}", e);
            return None;
        }
    };

    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| frame.event.clone())?;

    match kind.as_str() {
        "response.output_text.delta" => value
            .get("delta")
            .and_then(Value::as_str)
            .filter(|d| !d.is_empty())
            .map(|d| BackendEvent::TextDelta(d.to_string())),
        "response.output_item.done" => {
            let item = value.get("item")?;
            (item.get("type").and_then(Value::as_str) == Some("mcp_call"))
                .then(|| BackendEvent::ToolCallCompleted(item.clone()))
        }
        "response.completed" => {
            let response = value.get("response").cloned().map(RawResponse::new);
            let full_text = response
                .as_ref()
                .map(RawResponse::output_text)
                .filter(|t| !t.is_empty());
            Some(BackendEvent::Completed {
                full_text,
                response,
            })
        }
        "response.failed" | "error" => Some(BackendEvent::Failed(error_message(&value))),
        other => {
            debug!(event = other, "Skipping stream event");
            None
        }
    }
}

fn error_message(value: &Value) -> String {
    let candidates = [
        value.pointer("/response/error/message"),
        value.pointer("/error/message"),
        value.get("message"),
    ];
    candidates
        .into_iter()
        .flatten()
        .find_map(Value::as_str)
        .unwrap_or("backend reported a failure")
        .to_string()
}
