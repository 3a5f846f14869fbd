use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::CoreResult;
use crate::http_client::{HttpClient, RequestCtx};
use crate::model::{GenerationCall, PayloadFormat};
use crate::provider::GenerateProvider;
use crate::stream::ByteStream;

#[derive(Debug, Clone)]
pub struct Gemini {
    http: HttpClient,
    base: String,
    name: String, // "gemini"
    api_key: SecretString,
}

impl Gemini {
    pub fn new(http: HttpClient, api_key: SecretString, base: String) -> Self {
        Self {
            http,
            api_key,
            base,
            name: "gemini".into(),
        }
    }

    #[cfg(test)]
    pub fn new_for_tests(server_base: &str) -> Self {
        Gemini::new(
            HttpClient::new_default().unwrap(),
            SecretString::new("test-key".into()),
            server_base.to_string(),
        )
    }

    fn headers(&self) -> Vec<(String, String)> {
        vec![
            (
                "x-goog-api-key".to_string(),
                self.api_key.expose_secret().to_string(),
            ),
            ("Content-Type".to_string(), "application/json".to_string()),
        ]
    }

    fn url(&self, model: &str, method: &str) -> String {
        let model = if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{model}")
        };
        format!("{}/v1beta/{model}:{method}", self.base)
    }
}

// ---- Wire structs (minimal) ----
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenReq<'a> {
    contents: [GenContent<'a>; 1],
    generation_config: GenConfig,
}

#[derive(Serialize)]
struct GenContent<'a> {
    role: &'a str,
    parts: [GenPart<'a>; 1],
}

#[derive(Serialize)]
struct GenPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenConfig {
    temperature: f32,
    max_output_tokens: u32,
}

impl<'a> GenReq<'a> {
    fn for_call(call: &'a GenerationCall) -> Self {
        Self {
            contents: [GenContent {
                role: "user",
                parts: [GenPart { text: &call.prompt }],
            }],
            generation_config: GenConfig {
                temperature: call.temperature,
                max_output_tokens: call.max_output_tokens,
            },
        }
    }
}

#[derive(Deserialize, Default)]
struct GenResp {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<RespPart>,
}

#[derive(Deserialize)]
struct RespPart {
    #[serde(default)]
    text: Option<String>,
}

impl GenResp {
    /// Concatenated `text` of the first candidate's parts, in order.
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| c.parts.iter().filter_map(|p| p.text.as_deref()).collect())
            .unwrap_or_default()
    }
}

/// Text of one `generateContent` / `streamGenerateContent` payload.
pub fn extract_text(data: &str) -> Option<String> {
    serde_json::from_str::<GenResp>(data).ok().map(|r| r.text())
}

#[async_trait]
impl GenerateProvider for Gemini {
    fn name(&self) -> &str {
        &self.name
    }

    fn payload_format(&self) -> PayloadFormat {
        PayloadFormat::Gemini
    }

    async fn generate(
        &self,
        call: &GenerationCall,
        cancel: &CancellationToken,
    ) -> CoreResult<String> {
        let payload = GenReq::for_call(call);
        let ctx = RequestCtx {
            request_id: call.request_id.as_deref(),
        };
        let owned_headers = self.headers();
        let hdrs: Vec<(&str, &str)> = owned_headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let url = self.url(&call.model, "generateContent");
        let (resp, latency_ms) = self
            .http
            .post_json::<_, GenResp>(&url, &payload, &hdrs, &ctx, cancel)
            .await?;
        tracing::debug!(latency_ms, "gemini generateContent answered");
        Ok(resp.text())
    }

    async fn open_stream(
        &self,
        call: &GenerationCall,
        cancel: &CancellationToken,
    ) -> CoreResult<ByteStream> {
        let payload = GenReq::for_call(call);
        let ctx = RequestCtx {
            request_id: call.request_id.as_deref(),
        };
        let owned_headers = self.headers();
        let hdrs: Vec<(&str, &str)> = owned_headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let url = format!("{}?alt=sse", self.url(&call.model, "streamGenerateContent"));
        self.http
            .post_stream(&url, &payload, &hdrs, &ctx, cancel)
            .await
    }
}
