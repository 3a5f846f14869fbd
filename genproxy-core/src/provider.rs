use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::CoreResult;
use crate::model::{GenerationCall, PayloadFormat};
use crate::stream::ByteStream;

/// A hosted text-generation endpoint.
///
/// Both calls race the given token: once it is cancelled the in-flight
/// request is dropped and `TimeoutOrNetwork` is returned.
#[async_trait]
pub trait GenerateProvider: Send + Sync {
    fn name(&self) -> &str;

    /// How `data:` payloads of `open_stream` bodies are shaped.
    fn payload_format(&self) -> PayloadFormat;

    /// One buffered call; returns the generated text, untrimmed.
    async fn generate(&self, call: &GenerationCall, cancel: &CancellationToken)
    -> CoreResult<String>;

    /// Start a streaming call and hand back the raw SSE body.
    async fn open_stream(
        &self,
        call: &GenerationCall,
        cancel: &CancellationToken,
    ) -> CoreResult<ByteStream>;
}
