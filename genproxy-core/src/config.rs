use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

use crate::error::{CoreResult, GenProxyError};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ServerCfg {
    /// Socket address the gateway listens on.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Paths the generation handler is mounted on.
    #[serde(default = "default_paths")]
    pub paths: Vec<String>,
}

impl Default for ServerCfg {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            paths: default_paths(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8787".into()
}
fn default_paths() -> Vec<String> {
    vec!["/".into(), "/api/generate".into()]
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct AuthCfg {
    /// Name of the environment variable that contains the shared secret.
    #[serde(default = "default_secret_env")]
    pub secret_env: String,
}

impl Default for AuthCfg {
    fn default() -> Self {
        Self {
            secret_env: default_secret_env(),
        }
    }
}

fn default_secret_env() -> String {
    "PROXY_SECRET".into()
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gemini,
    Groq,
}

impl ProviderKind {
    pub fn default_base(&self) -> &'static str {
        match self {
            Self::Gemini => "https://generativelanguage.googleapis.com",
            Self::Groq => "https://api.groq.com/openai",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Self::Gemini => "models/gemini-flash-lite-latest",
            Self::Groq => "llama-3.1-8b-instant",
        }
    }

    pub fn default_api_key_env(&self) -> &'static str {
        match self {
            Self::Gemini => "GEMINI_KEY",
            Self::Groq => "GROQ_API_KEY",
        }
    }
}

/// `model` and `api_key_env` default per provider, so switching
/// `provider` alone never sends a Gemini model or key to Groq.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(from = "RawUpstreamCfg")]
pub struct UpstreamCfg {
    pub provider: ProviderKind,
    /// Override of the provider base URL (None = provider default).
    pub base: Option<String>,
    /// Name of the environment variable that contains the API key.
    pub api_key_env: String,
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

#[derive(Deserialize)]
struct RawUpstreamCfg {
    #[serde(default = "default_provider")]
    provider: ProviderKind,
    #[serde(default)]
    base: Option<String>,
    #[serde(default)]
    api_key_env: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default = "default_temperature")]
    temperature: f32,
    #[serde(default = "default_max_output_tokens")]
    max_output_tokens: u32,
}

impl From<RawUpstreamCfg> for UpstreamCfg {
    fn from(raw: RawUpstreamCfg) -> Self {
        let provider = raw.provider;
        Self {
            provider,
            base: raw.base,
            api_key_env: raw
                .api_key_env
                .unwrap_or_else(|| provider.default_api_key_env().into()),
            model: raw.model.unwrap_or_else(|| provider.default_model().into()),
            temperature: raw.temperature,
            max_output_tokens: raw.max_output_tokens,
        }
    }
}

impl UpstreamCfg {
    pub fn for_provider(provider: ProviderKind) -> Self {
        Self {
            provider,
            base: None,
            api_key_env: provider.default_api_key_env().into(),
            model: provider.default_model().into(),
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
        }
    }

    pub fn base_url(&self) -> String {
        self.base
            .clone()
            .unwrap_or_else(|| self.provider.default_base().to_string())
            .trim_end_matches('/')
            .to_string()
    }
}

impl Default for UpstreamCfg {
    fn default() -> Self {
        Self::for_provider(default_provider())
    }
}

fn default_provider() -> ProviderKind {
    ProviderKind::Gemini
}
fn default_temperature() -> f32 {
    0.6
}
fn default_max_output_tokens() -> u32 {
    900
}

/// How a `stream: true` request is answered.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
    /// Forward fragments to the caller as a live text/plain body.
    #[default]
    Relay,
    /// Collect fragments within the budget and answer `{text, partial}`.
    Aggregate,
}

impl StreamMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Relay => "relay",
            Self::Aggregate => "aggregate",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RelayCfg {
    /// Upstream call deadline, measured from request start.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub stream_mode: StreamMode,
    /// Aggregation collection budget, measured from request start.
    /// The effective collection deadline never exceeds `timeout_ms`.
    #[serde(default = "default_collect_budget_ms")]
    pub collect_budget_ms: u64,
    /// Literal `data:` payload that ends the upstream stream.
    #[serde(default = "default_sentinel")]
    pub sentinel: String,
    /// Relay mode only: commit response headers before the upstream answers.
    /// Upstream failures then surface as an in-band marker instead of JSON.
    #[serde(default)]
    pub eager_headers: bool,
}

impl Default for RelayCfg {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            stream_mode: StreamMode::default(),
            collect_budget_ms: default_collect_budget_ms(),
            sentinel: default_sentinel(),
            eager_headers: false,
        }
    }
}

fn default_timeout_ms() -> u64 {
    65_000
}
fn default_collect_budget_ms() -> u64 {
    55_000
}
fn default_sentinel() -> String {
    "[DONE]".into()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HttpCfg {
    /// TCP connect timeout in milliseconds (default 5000ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Optional per-host idle connection pool cap (None = reqwest default)
    #[serde(default)]
    pub pool_max_idle_per_host: Option<usize>,
}

impl Default for HttpCfg {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            pool_max_idle_per_host: None,
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerCfg,
    #[serde(default)]
    pub auth: AuthCfg,
    #[serde(default)]
    pub upstream: UpstreamCfg,
    #[serde(default)]
    pub relay: RelayCfg,
    /// HTTP client configuration (timeouts, pooling). Missing → defaults.
    #[serde(default)]
    pub http: HttpCfg,
}

impl Config {
    /// Load a Config from a file path (JSON or TOML by extension). If the
    /// extension is missing or unrecognized, try JSON first, then TOML.
    pub fn from_path<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(GenProxyError::from)?;
        let s = std::str::from_utf8(&bytes).map_err(|e| GenProxyError::Other(e.into()))?;
        let cfg: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => {
                serde_json::from_str::<Self>(s).map_err(|e| GenProxyError::Other(e.into()))?
            }
            Some("toml") => {
                toml::from_str::<Self>(s).map_err(|e| GenProxyError::Other(e.into()))?
            }
            _ => serde_json::from_str::<Self>(s)
                .map_err(|e| GenProxyError::Other(e.into()))
                .or_else(|_| {
                    toml::from_str::<Self>(s).map_err(|e| GenProxyError::Other(e.into()))
                })?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> CoreResult<()> {
        let up = &self.upstream;
        if !(0.0..=2.0).contains(&up.temperature) {
            return Err(GenProxyError::Validation(format!(
                "upstream.temperature must be within [0, 2], got {}",
                up.temperature
            )));
        }
        if up.max_output_tokens == 0 {
            return Err(GenProxyError::Validation(
                "upstream.max_output_tokens must be positive".into(),
            ));
        }
        if up.model.trim().is_empty() {
            return Err(GenProxyError::Validation("upstream.model is empty".into()));
        }
        if up.provider == ProviderKind::Groq && up.model.starts_with("models/") {
            return Err(GenProxyError::Validation(format!(
                "upstream.model {:?} is a Gemini model id; set a Groq model",
                up.model
            )));
        }
        if self.relay.timeout_ms == 0 || self.relay.collect_budget_ms == 0 {
            return Err(GenProxyError::Validation(
                "relay.timeout_ms and relay.collect_budget_ms must be positive".into(),
            ));
        }
        if self.relay.sentinel.trim().is_empty() {
            return Err(GenProxyError::Validation("relay.sentinel is empty".into()));
        }
        if self.server.paths.is_empty() {
            return Err(GenProxyError::Validation("server.paths is empty".into()));
        }
        for (i, p) in self.server.paths.iter().enumerate() {
            if !p.starts_with('/') {
                return Err(GenProxyError::Validation(format!(
                    "server.paths entry {p:?} must start with '/'"
                )));
            }
            if self.server.paths[..i].contains(p) {
                return Err(GenProxyError::Validation(format!(
                    "server.paths entry {p:?} is listed twice"
                )));
            }
        }
        Ok(())
    }
}

/// Credentials resolved from the environment variables named in `Config`.
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    pub proxy_secret: Option<SecretString>,
    pub api_key: Option<SecretString>,
}

impl Secrets {
    pub fn from_env(cfg: &Config) -> Self {
        Self {
            proxy_secret: non_empty_env(&cfg.auth.secret_env),
            api_key: non_empty_env(&cfg.upstream.api_key_env),
        }
    }
}

fn non_empty_env(name: &str) -> Option<SecretString> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .map(|v| SecretString::new(v.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn defaults_describe_a_gemini_relay() {
        let cfg = Config::default();
        assert_eq!(cfg.upstream.provider, ProviderKind::Gemini);
        assert_eq!(cfg.upstream.model, "models/gemini-flash-lite-latest");
        assert_eq!(cfg.upstream.max_output_tokens, 900);
        assert_eq!(cfg.relay.timeout_ms, 65_000);
        assert_eq!(cfg.relay.stream_mode, StreamMode::Relay);
        assert_eq!(cfg.relay.sentinel, "[DONE]");
        assert_eq!(
            cfg.upstream.base_url(),
            "https://generativelanguage.googleapis.com"
        );
        cfg.validate().unwrap();
    }

    #[test]
    fn load_from_json() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("proxy.json");
        let json = r#"{
          "auth": {"secret_env": "MY_SECRET"},
          "upstream": {
            "provider": "groq",
            "api_key_env": "GROQ_API_KEY",
            "model": "llama-3.1-8b-instant",
            "temperature": 0.2,
            "max_output_tokens": 512
          },
          "relay": {"timeout_ms": 30000, "stream_mode": "aggregate", "collect_budget_ms": 25000}
        }"#;
        fs::write(&file, json).unwrap();
        let cfg = Config::from_path(&file).unwrap();
        assert_eq!(cfg.auth.secret_env, "MY_SECRET");
        assert_eq!(cfg.upstream.provider, ProviderKind::Groq);
        assert_eq!(cfg.upstream.base_url(), "https://api.groq.com/openai");
        assert_eq!(cfg.relay.stream_mode, StreamMode::Aggregate);
        assert_eq!(cfg.relay.collect_budget_ms, 25_000);
        assert_eq!(cfg.relay.sentinel, "[DONE]");
        assert_eq!(cfg.http.connect_timeout_ms, 5_000);
        assert_eq!(cfg.server.bind, "127.0.0.1:8787");
    }

    #[test]
    fn load_from_toml() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("proxy.toml");
        let toml = r#"
[server]
bind = "0.0.0.0:9000"

[upstream]
provider = "gemini"
base = "http://localhost:1234/"
max_output_tokens = 1200

[relay]
timeout_ms = 60000
eager_headers = true
"#;
        fs::write(&file, toml).unwrap();
        let cfg = Config::from_path(&file).unwrap();
        assert_eq!(cfg.server.bind, "0.0.0.0:9000");
        assert_eq!(cfg.upstream.base_url(), "http://localhost:1234");
        assert_eq!(cfg.upstream.max_output_tokens, 1200);
        assert!(cfg.relay.eager_headers);
        assert_eq!(cfg.upstream.api_key_env, "GEMINI_KEY");
    }

    #[test]
    fn missing_file_returns_io_error() {
        let missing = std::path::PathBuf::from("/definitely/not/here/genproxy-missing.json");
        let err = Config::from_path(&missing).unwrap_err();
        match err {
            GenProxyError::Io(_) => {}
            other => panic!("expected Io error, got: {:?}", other),
        }
    }

    #[test]
    fn bad_json_returns_other_error() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("bad.json");
        fs::write(&file, r#"{ "upstream": { "model": 123 }"#).unwrap();
        let err = Config::from_path(&file).unwrap_err();
        match err {
            GenProxyError::Other(_) => {}
            other => panic!("expected Other(json parse) error, got: {:?}", other),
        }
    }

    #[test]
    fn unknown_extension_falls_back_to_toml() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("proxy.conf");
        fs::write(&file, "[relay]\nsentinel = \"[END]\"\n").unwrap();
        let cfg = Config::from_path(&file).unwrap();
        assert_eq!(cfg.relay.sentinel, "[END]");
    }

    #[test]
    fn out_of_range_temperature_is_rejected() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("hot.toml");
        fs::write(&file, "[upstream]\ntemperature = 3.5\n").unwrap();
        let err = Config::from_path(&file).unwrap_err();
        match err {
            GenProxyError::Validation(msg) => assert!(msg.contains("temperature")),
            other => panic!("expected Validation error, got: {:?}", other),
        }
    }

    #[test]
    fn zero_budget_is_rejected() {
        let mut cfg = Config::default();
        cfg.relay.collect_budget_ms = 0;
        assert!(matches!(cfg.validate(), Err(GenProxyError::Validation(_))));
    }

    #[test]
    fn groq_gets_its_own_model_and_key_env() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("groq.toml");
        fs::write(&file, "[upstream]\nprovider = \"groq\"\n").unwrap();
        let cfg = Config::from_path(&file).unwrap();
        assert_eq!(cfg.upstream.model, "llama-3.1-8b-instant");
        assert_eq!(cfg.upstream.api_key_env, "GROQ_API_KEY");
        assert_eq!(cfg.upstream.temperature, 0.6);
    }

    #[test]
    fn gemini_model_id_is_rejected_for_groq() {
        let mut cfg = Config::default();
        cfg.upstream.provider = ProviderKind::Groq;
        match cfg.validate() {
            Err(GenProxyError::Validation(msg)) => assert!(msg.contains("Gemini model")),
            other => panic!("expected Validation error, got: {:?}", other),
        }
        cfg.upstream = UpstreamCfg::for_provider(ProviderKind::Groq);
        cfg.validate().unwrap();
    }

    #[test]
    fn paths_must_be_absolute_and_unique() {
        let mut cfg = Config::default();
        cfg.server.paths = vec!["/".into(), "/".into()];
        assert!(matches!(cfg.validate(), Err(GenProxyError::Validation(_))));
        cfg.server.paths = vec!["api/generate".into()];
        assert!(matches!(cfg.validate(), Err(GenProxyError::Validation(_))));
    }

    #[test]
    fn secrets_treat_empty_env_as_absent() {
        let mut cfg = Config::default();
        cfg.auth.secret_env = "GENPROXY_TEST_SECRET_EMPTY".into();
        cfg.upstream.api_key_env = "GENPROXY_TEST_KEY_SET".into();
        // SAFETY: env names are unique to this test.
        unsafe {
            std::env::set_var("GENPROXY_TEST_SECRET_EMPTY", "");
            std::env::set_var("GENPROXY_TEST_KEY_SET", "k-123");
        }
        let secrets = Secrets::from_env(&cfg);
        assert!(secrets.proxy_secret.is_none());
        assert_eq!(secrets.api_key.unwrap().expose_secret(), "k-123");
    }
}
