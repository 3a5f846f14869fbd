use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::cancel::Deadline;
use crate::model::AggregationResult;
use crate::sse::SseReassembler;
use crate::stream::{ByteStream, StreamEnd};

/// Collect an upstream SSE body into one string, bounded by `deadline`.
///
/// Reading stops at the sentinel, at the end of the body (a read error
/// counts as the end), at the deadline, or when `cancel` fires. The
/// upstream stream is dropped before returning in every case.
pub async fn aggregate(
    mut upstream: ByteStream,
    mut reassembler: SseReassembler,
    deadline: Deadline,
    cancel: &CancellationToken,
) -> AggregationResult {
    let mut text = String::new();
    let mut fragments = 0usize;

    let end = loop {
        if deadline.is_expired() {
            break StreamEnd::DeadlineExceeded;
        }
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break StreamEnd::Cancelled,
            n = tokio::time::timeout_at(deadline.instant(), upstream.next()) => n,
        };
        match next {
            Err(_elapsed) => break StreamEnd::DeadlineExceeded,
            Ok(Some(Ok(chunk))) => {
                for frag in reassembler.push(&chunk) {
                    fragments += 1;
                    text.push_str(&frag);
                }
                if reassembler.is_terminal() {
                    break StreamEnd::Terminal;
                }
            }
            Ok(Some(Err(e))) => {
                tracing::debug!(error = %e, "upstream read failed, treating as end of stream");
                break StreamEnd::Exhausted;
            }
            Ok(None) => break StreamEnd::Exhausted,
        }
    };
    drop(upstream);

    if end == StreamEnd::Exhausted {
        for frag in reassembler.finish() {
            fragments += 1;
            text.push_str(&frag);
        }
    }
    if reassembler.malformed() > 0 {
        tracing::debug!(dropped = reassembler.malformed(), "unparsable sse payloads skipped");
    }

    AggregationResult {
        text,
        complete: end.is_complete(),
        end,
        fragments,
    }
}
