use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::UpstreamCfg;
use crate::normalizer::normalize_prompt;
use crate::stream::StreamEnd;

/// Inbound request body after lenient parsing and prompt normalization.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GenerationRequest {
    pub prompt: String,
    pub stream: bool,
}

impl GenerationRequest {
    /// Parse an inbound body. Anything that is not a JSON object is treated
    /// as an empty object, never as a failure.
    pub fn from_body(body: &[u8]) -> Self {
        let obj = match serde_json::from_slice::<Value>(body) {
            Ok(Value::Object(map)) => map,
            _ => return Self::default(),
        };
        let prompt = match obj.get("prompt") {
            Some(Value::String(s)) => s.clone(),
            Some(v @ (Value::Number(_) | Value::Bool(_))) if truthy(v) => v.to_string(),
            _ => String::new(),
        };
        Self {
            prompt: normalize_prompt(&prompt),
            stream: obj.get("stream").is_some_and(truthy),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.prompt.is_empty()
    }
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// One outbound generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationCall {
    pub prompt: String,
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub request_id: Option<String>,
}

impl GenerationCall {
    pub fn new(prompt: impl Into<String>, cfg: &UpstreamCfg) -> Self {
        Self {
            prompt: prompt.into(),
            model: cfg.model.clone(),
            temperature: cfg.temperature,
            max_output_tokens: cfg.max_output_tokens,
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, rid: impl Into<String>) -> Self {
        self.request_id = Some(rid.into());
        self
    }
}

/// Shape of the JSON payload carried in each upstream `data:` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    /// `candidates[0].content.parts[].text`
    Gemini,
    /// `choices[0].delta.content` / `choices[0].message.content`
    ChatCompletions,
}

impl PayloadFormat {
    /// Text fragment of one payload. `None` when the payload does not
    /// parse; `Some("")` when it parses but carries no text.
    pub fn extract_text(&self, data: &str) -> Option<String> {
        match self {
            Self::Gemini => crate::providers::gemini::extract_text(data),
            Self::ChatCompletions => crate::providers::groq::extract_text(data),
        }
    }
}

/// Outcome of an aggregation-mode collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationResult {
    pub text: String,
    /// Terminal sentinel seen, or the upstream ended before the deadline.
    pub complete: bool,
    pub end: StreamEnd,
    pub fragments: usize,
}

impl AggregationResult {
    /// Deadline hit with some text: the only case reported as partial.
    pub fn is_partial(&self) -> bool {
        !self.complete && !self.text.is_empty()
    }

    pub fn into_body(self) -> AggregateBody {
        let partial = self.is_partial();
        AggregateBody {
            text: self.text.trim().to_string(),
            partial,
        }
    }
}

/// `{ text }`
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct TextBody {
    pub text: String,
}

/// `{ text, partial }`
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct AggregateBody {
    pub text: String,
    pub partial: bool,
}

/// `{ status, error }`
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ErrorBody {
    pub status: u16,
    pub error: Value,
}
