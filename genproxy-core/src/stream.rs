//! Streaming primitives shared by the relay and aggregation consumers.
//!
//! Contract:
//! - Providers hand back a `ByteStream` of raw SSE body chunks.
//! - A consumer stops reading for exactly one `StreamEnd` reason and drops
//!   the stream right after, which releases the upstream connection.

use bytes::Bytes;

use crate::error::CoreResult;

/// Boxed upstream body. Transport errors surface as `Err` items.
pub type ByteStream = std::pin::Pin<Box<dyn futures::Stream<Item = CoreResult<Bytes>> + Send>>;

/// Why a consumer stopped reading the upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The sentinel payload was seen.
    Terminal,
    /// The upstream body ended, or a read failed.
    Exhausted,
    /// The collection deadline passed first.
    DeadlineExceeded,
    /// The request scope was cancelled (timer or caller gone).
    Cancelled,
}

impl StreamEnd {
    /// True when the upstream finished on its own terms.
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Terminal | Self::Exhausted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Terminal => "terminal",
            Self::Exhausted => "exhausted",
            Self::DeadlineExceeded => "deadline",
            Self::Cancelled => "cancelled",
        }
    }
}

#[cfg(test)]
pub(crate) fn chunks_to_stream(chunks: Vec<&'static [u8]>) -> ByteStream {
    Box::pin(futures::stream::iter(
        chunks.into_iter().map(|c| Ok(Bytes::from_static(c))),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_classification() {
        assert!(StreamEnd::Terminal.is_complete());
        assert!(StreamEnd::Exhausted.is_complete());
        assert!(!StreamEnd::DeadlineExceeded.is_complete());
        assert!(!StreamEnd::Cancelled.is_complete());
    }
}
