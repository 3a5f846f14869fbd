use serde::{Deserialize, Serialize};

/// One record per generation request, whatever the mode or outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RelayTrace {
    /// Inbound `x-request-id`, or a generated `req-<n>`.
    pub request_id: Option<String>,

    /// Provider identifier, e.g. "gemini", "groq".
    pub provider: Option<String>,

    pub model: Option<String>,

    /// "json", "relay" or "aggregate".
    pub mode: Option<String>,

    pub latency_ms: Option<u128>,

    /// Fragments forwarded or collected, and their total byte length.
    pub fragments: Option<usize>,
    pub text_len: Option<usize>,

    /// "ok", "empty_prompt", "terminal", "exhausted", "deadline",
    /// "cancelled", "partial" or "error".
    pub outcome: Option<String>,

    pub error_kind: Option<String>,
}

impl RelayTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider_model(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: Some(provider.into()),
            model: Some(model.into()),
            ..Default::default()
        }
    }

    pub fn set_request_id(mut self, rid: impl Into<String>) -> Self {
        self.request_id = Some(rid.into());
        self
    }

    pub fn set_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self
    }

    pub fn set_latency_ms(mut self, ms: u128) -> Self {
        self.latency_ms = Some(ms);
        self
    }

    pub fn set_fragments(mut self, count: usize, text_len: usize) -> Self {
        self.fragments = Some(count);
        self.text_len = Some(text_len);
        self
    }

    pub fn set_outcome(mut self, outcome: impl Into<String>) -> Self {
        self.outcome = Some(outcome.into());
        self
    }

    pub fn set_error_kind(mut self, kind: impl Into<String>) -> Self {
        self.error_kind = Some(kind.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn relay_trace_serializes() {
        let trace = RelayTrace::with_provider_model("gemini", "models/gemini-flash-lite-latest")
            .set_request_id("req-abc")
            .set_mode("aggregate")
            .set_latency_ms(42)
            .set_fragments(2, 6)
            .set_outcome("terminal");

        let as_json = serde_json::to_value(&trace).unwrap();
        assert_eq!(as_json["provider"], json!("gemini"));
        assert_eq!(as_json["mode"], json!("aggregate"));
        assert_eq!(as_json["latency_ms"], json!(42));
        assert_eq!(as_json["fragments"], json!(2));
        assert_eq!(as_json["text_len"], json!(6));
        assert_eq!(as_json["outcome"], json!("terminal"));
        assert_eq!(as_json["error_kind"], json!(null));
    }
}
