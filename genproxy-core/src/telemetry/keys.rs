/// Span attribute keys for generation requests.
/// Keep these stable; changing them is a breaking change for dashboards.
pub const KEY_REQUEST_ID: &str = "req.id";
pub const KEY_PROVIDER: &str = "llm.provider";
pub const KEY_MODEL: &str = "llm.model";
pub const KEY_MODE: &str = "relay.mode";

pub const KEY_OUTCOME: &str = "relay.outcome";
pub const KEY_LATENCY_MS: &str = "latency.ms";
pub const KEY_ERROR_KIND: &str = "error.kind";
