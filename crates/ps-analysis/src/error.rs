//! Error types for the ps-analysis crate.
//!
//! This module provides [`AnalysisError`], the classified failure of one
//! remote-analysis call.

/// Errors returned by an [`AnalysisClient`](crate::AnalysisClient).
///
/// # Error Recovery Strategy
///
/// - **Retryable** ([`MalformedResponse`](Self::MalformedResponse),
///   [`InputRequired`](Self::InputRequired), [`EmptyContent`](Self::EmptyContent)):
///   resubmit the same prompt, up to the attempt cap
/// - **Non-fatal** ([`ContentRejected`](Self::ContentRejected),
///   [`InputTooLong`](Self::InputTooLong)): do not retry, fold into a
///   completed result with a note
/// - **Cancelled** ([`Cancelled`](Self::Cancelled)): stop immediately
/// - Everything else is fatal for the task
///
/// # Examples
///
/// ```
/// use ps_analysis::AnalysisError;
///
/// let err = AnalysisError::from_api(400, r#"{"error":{"code":"data_inspection_failed"}}"#);
/// assert!(err.is_non_fatal());
/// assert!(!err.is_retryable());
/// ```
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    /// The response could not be decoded into the expected structure.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The remote side asked for more input before it could answer.
    #[error("remote requested more input: {0}")]
    InputRequired(String),

    /// The completion finished without any text.
    #[error("remote returned empty content")]
    EmptyContent,

    /// The remote refused the content on policy grounds.
    #[error("content rejected by remote inspection: {0}")]
    ContentRejected(String),

    /// The prompt exceeded the remote context window.
    #[error("input too long for model: {0}")]
    InputTooLong(String),

    /// No client is configured, usually because no API key is set.
    #[error("analysis client not configured: {0}")]
    NotConfigured(String),

    /// Transport failure talking to the remote endpoint.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The remote answered with a non-success status.
    #[error("api error (status {status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body or message.
        message: String,
    },

    /// The call exceeded its deadline.
    #[error("timeout after {0} seconds")]
    Timeout(u64),

    /// The call was cancelled cooperatively.
    #[error("analysis cancelled")]
    Cancelled,
}

impl AnalysisError {
    /// Creates a new [`AnalysisError::MalformedResponse`] error.
    #[inline]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedResponse(message.into())
    }

    /// Creates a new [`AnalysisError::NotConfigured`] error.
    #[inline]
    pub fn not_configured(message: impl Into<String>) -> Self {
        Self::NotConfigured(message.into())
    }

    /// Classifies a non-success API response by status and body text.
    ///
    /// Policy rejections and context-length errors are recognised from the
    /// body because providers report them with generic 400 statuses.
    #[must_use]
    pub fn from_api(status: u16, body: &str) -> Self {
        let lower = body.to_ascii_lowercase();
        let message = body.trim().to_owned();
        if lower.contains("data_inspection_failed")
            || lower.contains("content_filter")
            || lower.contains("inappropriate content")
        {
            return Self::ContentRejected(message);
        }
        if lower.contains("context_length_exceeded")
            || lower.contains("maximum context length")
            || lower.contains("range of input length")
            || lower.contains("too many tokens")
        {
            return Self::InputTooLong(message);
        }
        if lower.contains("input required") || lower.contains("input_required") {
            return Self::InputRequired(message);
        }
        Self::Api { status, message }
    }

    /// Returns `true` if resubmitting the same prompt may succeed.
    #[inline]
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::MalformedResponse(_) | Self::InputRequired(_) | Self::EmptyContent
        )
    }

    /// Returns `true` for refusals that become a completed result with a note.
    #[inline]
    #[must_use]
    pub const fn is_non_fatal(&self) -> bool {
        matches!(self, Self::ContentRejected(_) | Self::InputTooLong(_))
    }

    /// Returns `true` if the call was cancelled.
    #[inline]
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns the user-visible note for a non-fatal refusal.
    #[must_use]
    pub fn non_fatal_note(&self) -> Option<&'static str> {
        match self {
            Self::ContentRejected(_) => Some(
                "[分析跳过] 该请求内容未通过模型服务的内容审查，未能完成自动分析，请人工复核。",
            ),
            Self::InputTooLong(_) => Some(
                "[分析跳过] 该请求内容超出模型输入长度限制，未能完成自动分析，请人工复核。",
            ),
            _ => None,
        }
    }
}
