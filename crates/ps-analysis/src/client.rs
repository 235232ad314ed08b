//! The remote-analysis collaborator boundary.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::AnalysisError;

/// Sink receiving streamed completion text verbatim, in arrival order.
pub type ChunkSink<'a> = &'a (dyn Fn(&str) + Send + Sync);

/// One analysis call.
#[derive(Clone, Copy)]
pub struct AnalysisRequest<'a> {
    /// Instructions sent as the system message.
    pub system_prompt: &'a str,
    /// The sanitized, compressed exchange prompt.
    pub prompt: &'a str,
    /// Receives partial text while the completion streams.
    pub on_chunk: Option<ChunkSink<'a>>,
}

impl std::fmt::Debug for AnalysisRequest<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisRequest")
            .field("system_prompt_len", &self.system_prompt.len())
            .field("prompt_len", &self.prompt.len())
            .field("streaming", &self.on_chunk.is_some())
            .finish()
    }
}

impl<'a> AnalysisRequest<'a> {
    /// Creates a request without a chunk sink.
    #[must_use]
    pub const fn new(system_prompt: &'a str, prompt: &'a str) -> Self {
        Self {
            system_prompt,
            prompt,
            on_chunk: None,
        }
    }

    /// Sets the chunk sink.
    #[must_use]
    pub const fn with_chunk_sink(mut self, sink: ChunkSink<'a>) -> Self {
        self.on_chunk = Some(sink);
        self
    }

    /// Forwards `text` to the sink, if any.
    #[inline]
    pub fn emit(&self, text: &str) {
        if let Some(sink) = self.on_chunk {
            sink(text);
        }
    }
}

/// A remote model that turns a prompt into free-text vulnerability analysis.
///
/// Implementations must return [`AnalysisError::Cancelled`] promptly once
/// `cancel` fires, including while a response is streaming.
#[async_trait]
pub trait AnalysisClient: Send + Sync {
    /// Runs one completion and returns the full text.
    async fn analyze(
        &self,
        request: AnalysisRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<String, AnalysisError>;

    /// Returns the model identifier used for logging and reports.
    fn model_name(&self) -> &str;
}
