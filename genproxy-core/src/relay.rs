//! Live relay of upstream fragments to the caller.
//!
//! Once the first byte is out the response status is fixed, so the relay
//! never fails at the protocol level: it closes normally on the sentinel,
//! at the end of the upstream body, on a read error, or when the request
//! scope is cancelled. An upstream that fails to open before anything was
//! sent produces a one-line marker instead of text.

use std::convert::Infallible;
use tokio::time::Instant;

use bytes::Bytes;
use futures::Stream;
use futures::future::BoxFuture;
use futures_util::StreamExt;

use crate::cancel::CancelScope;
use crate::error::{CoreResult, GenProxyError};
use crate::sse::SseReassembler;
use crate::stream::{ByteStream, StreamEnd};
use crate::telemetry::{self, KEY_ERROR_KIND, KEY_LATENCY_MS, KEY_OUTCOME, RelayTrace};

/// Pending upstream open; resolved inside the relay so headers can be
/// committed before the provider answers.
pub type OpenUpstream = BoxFuture<'static, CoreResult<ByteStream>>;

/// In-band text sent when the upstream cannot be opened after headers
/// have been committed.
pub fn error_marker(err: &GenProxyError) -> String {
    match err {
        GenProxyError::Upstream { status, .. } => format!("[error: upstream_error {status}]"),
        other => format!("[error: {}]", other.kind()),
    }
}

/// Body stream for a relay-mode response. The scope moves into the stream:
/// dropping the body (caller disconnect) cancels the upstream.
pub fn relay(
    open: OpenUpstream,
    mut reassembler: SseReassembler,
    mut scope: CancelScope,
    trace: RelayTrace,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    async_stream::stream! {
        let started = Instant::now();
        let token = scope.token().clone();
        let mut fragments = 0usize;
        let mut sent = 0usize;

        let opened = tokio::select! {
            biased;
            _ = token.cancelled() => Err(GenProxyError::TimeoutOrNetwork("cancelled before upstream answered".into())),
            r = open => r,
        };
        let mut upstream = match opened {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "upstream failed after headers were committed");
                let kind = e.kind();
                yield Ok::<_, Infallible>(Bytes::from(error_marker(&e)));
                scope.finish();
                let latency = started.elapsed().as_millis();
                record_exit("error", latency, Some(kind));
                telemetry::emit(
                    trace
                        .set_latency_ms(latency)
                        .set_outcome("error")
                        .set_error_kind(kind),
                );
                return;
            }
        };

        let end = loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => break StreamEnd::Cancelled,
                n = upstream.next() => n,
            };
            match next {
                Some(Ok(chunk)) => {
                    for frag in reassembler.push(&chunk) {
                        fragments += 1;
                        sent += frag.len();
                        yield Ok::<_, Infallible>(Bytes::from(frag));
                    }
                    if reassembler.is_terminal() {
                        break StreamEnd::Terminal;
                    }
                }
                Some(Err(e)) => {
                    tracing::debug!(error = %e, "upstream read failed, closing relay");
                    for frag in reassembler.finish() {
                        fragments += 1;
                        sent += frag.len();
                        yield Ok::<_, Infallible>(Bytes::from(frag));
                    }
                    break StreamEnd::Exhausted;
                }
                None => {
                    for frag in reassembler.finish() {
                        fragments += 1;
                        sent += frag.len();
                        yield Ok::<_, Infallible>(Bytes::from(frag));
                    }
                    break StreamEnd::Exhausted;
                }
            }
        };
        drop(upstream);

        if let Some(reason) = scope.reason() {
            tracing::info!(reason = reason.as_str(), fragments, "relay cut short");
        }
        scope.finish();
        let latency = started.elapsed().as_millis();
        record_exit(end.as_str(), latency, None);
        telemetry::emit(
            trace
                .set_latency_ms(latency)
                .set_fragments(fragments, sent)
                .set_outcome(end.as_str()),
        );
    }
}

// The body outlives the handler, so the request span is closed from here.
fn record_exit(outcome: &str, latency_ms: u128, error_kind: Option<&str>) {
    let span = tracing::Span::current();
    span.record(KEY_OUTCOME, outcome);
    span.record(KEY_LATENCY_MS, latency_ms as u64);
    if let Some(kind) = error_kind {
        span.record(KEY_ERROR_KIND, kind);
    }
}
