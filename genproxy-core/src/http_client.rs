use std::time::{Duration, Instant};

use futures_util::StreamExt;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Serialize, de::DeserializeOwned};
use tokio_util::sync::CancellationToken;

use crate::config::HttpCfg;
use crate::error::{CoreResult, GenProxyError};
use crate::stream::ByteStream;

/// Request context carries the correlation id forwarded upstream.
#[derive(Clone, Copy, Default)]
pub struct RequestCtx<'a> {
    pub request_id: Option<&'a str>,
}

/// Thin wrapper around reqwest::Client with defaults and helpers.
///
/// No total request timeout is configured on the client: deadlines are
/// owned by the caller's cancellation token so streamed bodies can outlive
/// the response headers.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
    user_agent: String,
}

impl HttpClient {
    pub fn new_default() -> CoreResult<Self> {
        Self::from_cfg(&HttpCfg::default())
    }

    pub fn from_cfg(cfg: &HttpCfg) -> CoreResult<Self> {
        let mut builder =
            Client::builder().connect_timeout(Duration::from_millis(cfg.connect_timeout_ms));
        if let Some(n) = cfg.pool_max_idle_per_host {
            builder = builder.pool_max_idle_per_host(n);
        }
        let inner = builder
            .build()
            .map_err(|e| GenProxyError::Other(anyhow::anyhow!("http client build failed: {e}")))?;
        Ok(Self {
            inner,
            user_agent: format!("genproxy/{}", env!("CARGO_PKG_VERSION")),
        })
    }

    fn request<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
        ctx: &RequestCtx<'_>,
    ) -> RequestBuilder {
        let mut req = self
            .inner
            .post(url)
            .json(body)
            .header("User-Agent", &self.user_agent);
        for (k, v) in headers {
            req = req.header(*k, *v);
        }
        if let Some(rid) = ctx.request_id {
            req = req.header("X-Request-Id", rid);
        }
        req
    }

    /// POST JSON and decode a JSON response. Returns the body and latency.
    pub async fn post_json<T: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
        ctx: &RequestCtx<'_>,
        cancel: &CancellationToken,
    ) -> CoreResult<(R, u32)> {
        let start = Instant::now();
        let req = self.request(url, body, headers, ctx);
        let resp = send(req, cancel).await?;
        let resp = ensure_success(resp, cancel).await?;
        let status = resp.status();

        let bytes = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled()),
            b = resp.bytes() => b.map_err(|e| network(&e))?,
        };
        let latency = start.elapsed().as_millis() as u32;
        let parsed = serde_json::from_slice::<R>(&bytes).map_err(|e| GenProxyError::Upstream {
            status: status.as_u16(),
            body: serde_json::Value::String(format!("json decode error: {e}")),
        })?;
        Ok((parsed, latency))
    }

    /// POST JSON asking for `text/event-stream` and return the raw body stream.
    /// The caller owns framing; see `crate::sse`.
    pub async fn post_stream<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
        ctx: &RequestCtx<'_>,
        cancel: &CancellationToken,
    ) -> CoreResult<ByteStream> {
        let req = self
            .request(url, body, headers, ctx)
            .header("Accept", "text/event-stream");
        let resp = send(req, cancel).await?;
        let resp = ensure_success(resp, cancel).await?;
        let stream = resp
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| network(&e)));
        Ok(Box::pin(stream))
    }
}

async fn send(req: RequestBuilder, cancel: &CancellationToken) -> CoreResult<Response> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(cancelled()),
        r = req.send() => r.map_err(|e| network(&e)),
    }
}

/// Non-2xx → `Upstream { status, body }` with the provider body captured.
async fn ensure_success(resp: Response, cancel: &CancellationToken) -> CoreResult<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = tokio::select! {
        biased;
        _ = cancel.cancelled() => String::new(),
        t = resp.text() => t.unwrap_or_default(),
    };
    tracing::warn!(status = status.as_u16(), "upstream returned non-success status");
    Err(GenProxyError::Upstream {
        status: status.as_u16(),
        body: error_body(&text),
    })
}

fn error_body(text: &str) -> serde_json::Value {
    serde_json::from_str(text).unwrap_or_else(|_| serde_json::Value::String(truncate(text, 300)))
}

fn cancelled() -> GenProxyError {
    GenProxyError::TimeoutOrNetwork("upstream call cancelled".into())
}

fn network(e: &reqwest::Error) -> GenProxyError {
    let kind = if e.is_timeout() {
        "timeout"
    } else if e.is_connect() {
        "connect"
    } else if e.is_body() || e.is_decode() {
        "body"
    } else {
        "request"
    };
    tracing::debug!(kind, "upstream transport error");
    GenProxyError::TimeoutOrNetwork(format!("{kind} error"))
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() > max {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        let mut t = s[..end].to_string();
        t.push_str("...");
        t
    } else {
        s.to_string()
    }
}
