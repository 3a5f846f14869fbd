use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, Method};
use axum::response::Response;
use bytes::Bytes;
use tokio::time::Instant;
use tracing::Span;
use tracing::field::Empty;
use tracing_futures::Instrument;

use super::{GatewayState, shaper};
use crate::aggregate::aggregate;
use crate::auth::SECRET_HEADER;
use crate::cancel::{CancelScope, Deadline};
use crate::config::StreamMode;
use crate::error::GenProxyError;
use crate::model::{GenerationCall, GenerationRequest};
use crate::relay::{OpenUpstream, relay};
use crate::sse::SseReassembler;
use crate::telemetry::{
    self, KEY_ERROR_KIND, KEY_LATENCY_MS, KEY_MODE, KEY_MODEL, KEY_OUTCOME, KEY_PROVIDER,
    RelayTrace,
};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

enum Exit {
    Done(Response, RelayTrace),
    /// The relay body owns the rest of the request, telemetry included.
    Streaming(Response),
}

fn failed(trace: RelayTrace, err: &GenProxyError) -> Exit {
    match err {
        GenProxyError::Forbidden => tracing::warn!("rejected request: bad or missing secret"),
        other => tracing::warn!(error = %other, kind = other.kind(), "generation failed"),
    }
    Exit::Done(
        shaper::error_response(err),
        trace.set_outcome("error").set_error_kind(err.kind()),
    )
}

/// Entry point for every method on every configured path.
pub async fn generate(
    State(state): State<GatewayState>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if method != Method::POST {
        return shaper::liveness();
    }
    let started = Instant::now();
    let rid = headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| state.next_request_id());

    let span = tracing::info_span!(
        "generate",
        req.id = %rid,
        llm.provider = Empty,
        llm.model = Empty,
        relay.mode = Empty,
        relay.outcome = Empty,
        latency.ms = Empty,
        error.kind = Empty,
    );
    let presented = headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok());

    let exit = handle(&state, presented, &body, &rid, started, &span)
        .instrument(span.clone())
        .await;
    match exit {
        Exit::Streaming(resp) => resp,
        Exit::Done(resp, trace) => {
            let latency = started.elapsed().as_millis();
            span.record(KEY_OUTCOME, trace.outcome.as_deref().unwrap_or("ok"));
            span.record(KEY_LATENCY_MS, latency as u64);
            if let Some(kind) = trace.error_kind.as_deref() {
                span.record(KEY_ERROR_KIND, kind);
            }
            telemetry::emit(trace.set_latency_ms(latency));
            resp
        }
    }
}

async fn handle(
    state: &GatewayState,
    presented: Option<&str>,
    body: &[u8],
    rid: &str,
    started: Instant,
    span: &Span,
) -> Exit {
    let cfg = &state.cfg;
    let trace = RelayTrace::new().set_request_id(rid);

    if let Err(e) = state.auth.authorize(presented) {
        return failed(trace, &e);
    }

    let req = GenerationRequest::from_body(body);
    let mode = if req.stream {
        cfg.relay.stream_mode.as_str()
    } else {
        "json"
    };
    span.record(KEY_MODE, mode);
    let trace = trace.set_mode(mode);

    if req.is_empty() {
        tracing::debug!("empty prompt, upstream not called");
        return Exit::Done(shaper::json_text(""), trace.set_outcome("empty_prompt"));
    }
    let Some(provider) = state.provider.clone() else {
        return failed(trace, &GenProxyError::NoApiKey);
    };
    span.record(KEY_PROVIDER, provider.name());
    span.record(KEY_MODEL, cfg.upstream.model.as_str());
    let mut trace = trace;
    trace.provider = Some(provider.name().to_string());
    trace.model = Some(cfg.upstream.model.clone());

    let call = GenerationCall::new(req.prompt, &cfg.upstream).with_request_id(rid);
    let mut scope = CancelScope::start(Deadline::from_start(
        started,
        Duration::from_millis(cfg.relay.timeout_ms),
    ));

    if !req.stream {
        let res = provider.generate(&call, scope.token()).await;
        scope.finish();
        return match res {
            Ok(text) => {
                let text = text.trim();
                let trace = trace.set_fragments(1, text.len()).set_outcome("ok");
                Exit::Done(shaper::json_text(text), trace)
            }
            Err(e) => failed(trace, &e),
        };
    }

    let reassembler = SseReassembler::new(provider.payload_format(), cfg.relay.sentinel.clone());
    match cfg.relay.stream_mode {
        StreamMode::Aggregate => {
            let upstream = match provider.open_stream(&call, scope.token()).await {
                Ok(s) => s,
                Err(e) => {
                    scope.finish();
                    return failed(trace, &e);
                }
            };
            let collect_by = Deadline::from_start(
                started,
                Duration::from_millis(cfg.relay.collect_budget_ms),
            )
            .earliest(scope.deadline());
            tracing::debug!(
                budget_ms = collect_by.remaining().as_millis() as u64,
                "collecting upstream fragments"
            );
            let result = aggregate(upstream, reassembler, collect_by, scope.token()).await;
            scope.finish();

            let outcome = if result.is_partial() {
                "partial"
            } else {
                result.end.as_str()
            };
            tracing::debug!(
                end = result.end.as_str(),
                fragments = result.fragments,
                "aggregation finished"
            );
            let trace = trace
                .set_fragments(result.fragments, result.text.len())
                .set_outcome(outcome);
            Exit::Done(shaper::json_aggregate(result.into_body()), trace)
        }
        StreamMode::Relay => {
            let open: OpenUpstream = if cfg.relay.eager_headers {
                let provider = provider.clone();
                let token = scope.token().clone();
                Box::pin(async move { provider.open_stream(&call, &token).await })
            } else {
                match provider.open_stream(&call, scope.token()).await {
                    Ok(s) => Box::pin(futures::future::ready(Ok(s))),
                    Err(e) => {
                        scope.finish();
                        return failed(trace, &e);
                    }
                }
            };
            let body = relay(open, reassembler, scope, trace).instrument(span.clone());
            Exit::Streaming(shaper::text_stream(body))
        }
    }
}
