//! Diagnostic trace extraction from raw backend responses.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::warn;

use davenport_core::types::{TokenUsage, Trace};

use crate::backend::RawResponse;

/// A part of the response that could not be read. Extraction carries on
/// with the field's default.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractionWarning {
    #[error("response body is not a JSON object")]
    NotAnObject,
    #[error("agent field is not an object or string")]
    MalformedAgent,
    #[error("usage counter '{0}' is not a non-negative integer")]
    MalformedUsage(&'static str),
    #[error("output field is not a list")]
    MalformedOutput,
    #[error("tool call {index} has unreadable arguments: {reason}")]
    MalformedToolArguments { index: usize, reason: String },
    #[error("tool call {index} has a non-string query intent")]
    MalformedIntent { index: usize },
}

static RETRIEVED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Retrieved (\d+) documents").unwrap());

/// Reads agent identity, token counters, query intents and source counts
/// out of a backend response.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceExtractor;

impl TraceExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Extract a trace, logging anything that had to be skipped.
    pub fn extract(&self, raw: &RawResponse) -> Trace {
        let (trace, warnings) = self.extract_with_warnings(raw);
        for warning in &warnings {
            warn!("Trace extraction: {}", warning);
        }
        trace
    }

    pub fn extract_with_warnings(&self, raw: &RawResponse) -> (Trace, Vec<ExtractionWarning>) {
        let mut trace = Trace::default();
        let mut warnings = Vec::new();

        let Some(body) = raw.body().as_object() else {
            warnings.push(ExtractionWarning::NotAnObject);
            return (trace, warnings);
        };

        if let Some(agent) = body.get("agent") {
            trace.backend_identity = agent_identity(agent);
            if trace.backend_identity.is_none() && !agent.is_null() {
                warnings.push(ExtractionWarning::MalformedAgent);
            }
        }

        if let Some(usage) = body.get("usage").filter(|u| !u.is_null()) {
            trace.token_usage = token_usage(usage, &mut warnings);
        }

        match body.get("output") {
            None | Some(Value::Null) => {}
            Some(Value::Array(items)) => {
                for (index, item) in items.iter().enumerate() {
                    self.read_tool_call(index, item, &mut trace, &mut warnings);
                }
            }
            Some(_) => warnings.push(ExtractionWarning::MalformedOutput),
        }

        (trace, warnings)
    }

    fn read_tool_call(
        &self,
        index: usize,
        item: &Value,
        trace: &mut Trace,
        warnings: &mut Vec<ExtractionWarning>,
    ) {
        if item.get("type").and_then(Value::as_str) != Some("mcp_call") {
            return;
        }

        // Each call replaces the previous one's intents and source count;
        // the trace describes the last retrieval.
        match tool_arguments(item.get("arguments")) {
            Ok(args) => {
                let intents = args
                    .as_ref()
                    .and_then(|a| a.pointer("/request/knowledgeAgentIntents"))
                    .and_then(Value::as_array);
                let mut parsed = Vec::new();
                for intent in intents.into_iter().flatten() {
                    match intent.as_str() {
                        Some(text) => parsed.push(text.to_string()),
                        None => warnings.push(ExtractionWarning::MalformedIntent { index }),
                    }
                }
                trace.query_intents = parsed;
            }
            Err(reason) => warnings.push(ExtractionWarning::MalformedToolArguments { index, reason }),
        }

        if let Some(output) = item.get("output").and_then(Value::as_str) {
            if let Some(count) = RETRIEVED_RE
                .captures(output)
                .and_then(|caps| caps[1].parse::<u64>().ok())
            {
                trace.sources_found = count;
            }
        }
    }
}

fn agent_identity(agent: &Value) -> Option<String> {
    match agent {
        Value::String(name) => Some(name.clone()),
        Value::Object(fields) => {
            let name = fields.get("name").and_then(Value::as_str).unwrap_or("unknown");
            let version = match fields.get("version") {
                Some(Value::String(v)) => v.clone(),
                Some(Value::Number(n)) => n.to_string(),
                _ => "?".to_string(),
            };
            Some(format!("{} v{}", name, version))
        }
        _ => None,
    }
}

fn token_usage(usage: &Value, warnings: &mut Vec<ExtractionWarning>) -> TokenUsage {
    let mut counter = |field: &'static str| match usage.get(field) {
        None | Some(Value::Null) => 0,
        Some(value) => value.as_u64().unwrap_or_else(|| {
            warnings.push(ExtractionWarning::MalformedUsage(field));
            0
        }),
    };
    TokenUsage {
        input: counter("input_tokens"),
        output: counter("output_tokens"),
        total: counter("total_tokens"),
    }
}

/// Tool arguments arrive JSON-encoded in a string, or occasionally as an
/// already-decoded object.
fn tool_arguments(arguments: Option<&Value>) -> Result<Option<Value>, String> {
    match arguments {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(encoded)) if encoded.trim().is_empty() => Ok(None),
        Some(Value::String(encoded)) => serde_json::from_str(encoded)
            .map(Some)
            .map_err(|e| e.to_string()),
        Some(value @ Value::Object(_)) => Ok(Some(value.clone())),
        Some(_) => Err("expected a JSON object".to_string()),
    }
}
