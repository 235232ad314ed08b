//! Scripted in-memory analysis client.
//!
//! Used by tests and by dry runs of the CLI. Outcomes are served in the
//! order they were scripted; once the script runs out, every call gets the
//! default reply.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::client::{AnalysisClient, AnalysisRequest};
use crate::error::AnalysisError;

/// Size of the pieces a reply is streamed in, in chars.
const CHUNK_CHARS: usize = 16;

/// An [`AnalysisClient`] that replays scripted outcomes.
///
/// # Examples
///
/// ```
/// use ps_analysis::{AnalysisClient, AnalysisError, AnalysisRequest, ScriptedClient};
/// use tokio_util::sync::CancellationToken;
///
/// # tokio_test_block_on(async {
/// let client = ScriptedClient::new("未发现安全漏洞")
///     .with_error(AnalysisError::EmptyContent)
///     .with_reply("风险等级: 高危");
/// let cancel = CancellationToken::new();
/// let req = AnalysisRequest::new("sys", "prompt");
///
/// assert!(client.analyze(req, &cancel).await.is_err());
/// assert_eq!(client.analyze(req, &cancel).await.unwrap(), "风险等级: 高危");
/// assert_eq!(client.analyze(req, &cancel).await.unwrap(), "未发现安全漏洞");
/// assert_eq!(client.call_count(), 3);
/// # });
/// # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
/// # }
/// ```
#[derive(Debug)]
pub struct ScriptedClient {
    model: String,
    script: Mutex<VecDeque<Result<String, AnalysisError>>>,
    default_reply: String,
    delay: Option<Duration>,
    call_count: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedClient {
    /// Creates a client answering every call with `default_reply`.
    #[must_use]
    pub fn new(default_reply: impl Into<String>) -> Self {
        Self {
            model: "scripted".to_owned(),
            script: Mutex::new(VecDeque::new()),
            default_reply: default_reply.into(),
            delay: None,
            call_count: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Queues a successful reply.
    #[must_use]
    pub fn with_reply(self, reply: impl Into<String>) -> Self {
        self.script.lock().push_back(Ok(reply.into()));
        self
    }

    /// Queues a failure.
    #[must_use]
    pub fn with_error(self, error: AnalysisError) -> Self {
        self.script.lock().push_back(Err(error));
        self
    }

    /// Makes every call wait before answering. The wait observes cancellation.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Sets the reported model name.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Returns how many times [`analyze`](AnalysisClient::analyze) was called.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Returns the prompts received so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl AnalysisClient for ScriptedClient {
    async fn analyze(
        &self,
        request: AnalysisRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<String, AnalysisError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().push(request.prompt.to_owned());

        if cancel.is_cancelled() {
            return Err(AnalysisError::Cancelled);
        }
        if let Some(delay) = self.delay {
            tokio::select! {
                () = cancel.cancelled() => return Err(AnalysisError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
        }

        let outcome = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(self.default_reply.clone()));
        let reply = outcome?;

        let chars: Vec<char> = reply.chars().collect();
        for piece in chars.chunks(CHUNK_CHARS) {
            request.emit(&piece.iter().collect::<String>());
        }
        Ok(reply)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
