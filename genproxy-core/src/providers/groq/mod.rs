use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::CoreResult;
use crate::http_client::{HttpClient, RequestCtx};
use crate::model::{GenerationCall, PayloadFormat};
use crate::provider::GenerateProvider;
use crate::stream::ByteStream;

/// Groq, or any OpenAI-compatible chat-completions endpoint.
#[derive(Debug, Clone)]
pub struct Groq {
    http: HttpClient,
    base: String,
    name: String, // "groq"
    api_key: SecretString,
}

impl Groq {
    pub fn new(http: HttpClient, api_key: SecretString, base: String) -> Self {
        Self {
            http,
            api_key,
            base,
            name: "groq".into(),
        }
    }

    #[cfg(test)]
    pub fn new_for_tests(server_base: &str) -> Self {
        Groq::new(
            HttpClient::new_default().unwrap(),
            SecretString::new("test-key".into()),
            server_base.to_string(),
        )
    }

    fn headers(&self) -> Vec<(String, String)> {
        vec![
            (
                "Authorization".to_string(),
                format!("Bearer {}", self.api_key.expose_secret()),
            ),
            ("Content-Type".to_string(), "application/json".to_string()),
        ]
    }

    fn url(&self) -> String {
        format!("{}/v1/chat/completions", self.base)
    }
}

// ----- Wire structs (OpenAI-compatible) -----
#[derive(Serialize)]
struct ChatReq<'a> {
    model: &'a str,
    messages: [ChatMsg<'a>; 1],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMsg<'a> {
    role: &'a str,
    content: &'a str,
}

impl<'a> ChatReq<'a> {
    fn for_call(call: &'a GenerationCall, stream: bool) -> Self {
        Self {
            model: &call.model,
            messages: [ChatMsg {
                role: "user",
                content: &call.prompt,
            }],
            temperature: call.temperature,
            max_tokens: call.max_output_tokens,
            stream,
        }
    }
}

#[derive(Deserialize)]
struct ChatResp {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ChoiceText>,
    #[serde(default)]
    delta: Option<ChoiceText>,
}

#[derive(Deserialize)]
struct ChoiceText {
    #[serde(default)]
    content: Option<String>,
}

impl ChatResp {
    fn text(&self) -> String {
        self.choices
            .first()
            .and_then(|c| c.delta.as_ref().or(c.message.as_ref()))
            .and_then(|m| m.content.clone())
            .unwrap_or_default()
    }
}

/// Text of one chat-completion body or streamed chunk.
pub fn extract_text(data: &str) -> Option<String> {
    serde_json::from_str::<ChatResp>(data).ok().map(|r| r.text())
}

#[async_trait]
impl GenerateProvider for Groq {
    fn name(&self) -> &str {
        &self.name
    }

    fn payload_format(&self) -> PayloadFormat {
        PayloadFormat::ChatCompletions
    }

    async fn generate(
        &self,
        call: &GenerationCall,
        cancel: &CancellationToken,
    ) -> CoreResult<String> {
        let payload = ChatReq::for_call(call, false);
        let ctx = RequestCtx {
            request_id: call.request_id.as_deref(),
        };
        let owned_headers = self.headers();
        let hdrs: Vec<(&str, &str)> = owned_headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let (resp, latency_ms) = self
            .http
            .post_json::<_, ChatResp>(&self.url(), &payload, &hdrs, &ctx, cancel)
            .await?;
        tracing::debug!(latency_ms, "chat completion answered");
        Ok(resp.text())
    }

    async fn open_stream(
        &self,
        call: &GenerationCall,
        cancel: &CancellationToken,
    ) -> CoreResult<ByteStream> {
        let payload = ChatReq::for_call(call, true);
        let ctx = RequestCtx {
            request_id: call.request_id.as_deref(),
        };
        let owned_headers = self.headers();
        let hdrs: Vec<(&str, &str)> = owned_headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        self.http
            .post_stream(&self.url(), &payload, &hdrs, &ctx, cancel)
            .await
    }
}
