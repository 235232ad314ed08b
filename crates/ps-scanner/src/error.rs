//! Error types for the ps-scanner crate.
//!
//! This module provides the [`ScanError`] type for failures surfaced to
//! callers of the [`ScanManager`](crate::ScanManager). Per-task failures
//! never reach callers this way; they end up on the task's result.

use ps_analysis::AnalysisError;
use ps_core::ConfigError;

/// Errors returned by manager operations.
///
/// # Error Recovery Strategy
///
/// - **Not configured** ([`ScanError::ClientNotConfigured`]): fatal until a
///   client is installed with `set_api_client`
/// - **Analysis errors** ([`ScanError::Analysis`]): recoverable when the
///   underlying failure is retryable or non-fatal
/// - **Configuration errors** ([`ScanError::Config`]): fatal, fix the file
///
/// # Examples
///
/// ```
/// use ps_analysis::AnalysisError;
/// use ps_scanner::ScanError;
///
/// let err = ScanError::from(AnalysisError::EmptyContent);
/// assert!(err.is_recoverable());
/// assert!(ScanError::ClientNotConfigured.is_fatal());
/// ```
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// No analysis client is installed.
    #[error("analysis client not configured; set an API key")]
    ClientNotConfigured,

    /// The remote analysis call failed.
    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    /// The manager was built from an invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The scan queue is at capacity.
    #[error("scan queue full (capacity {capacity})")]
    QueueFull {
        /// Configured queue capacity.
        capacity: usize,
    },
}

impl ScanError {
    /// Creates a new [`ScanError::QueueFull`] error.
    #[inline]
    pub const fn queue_full(capacity: usize) -> Self {
        Self::QueueFull { capacity }
    }

    /// Returns `true` if repeating the operation later may succeed.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Analysis(e) => e.is_retryable() || e.is_non_fatal(),
            Self::QueueFull { .. } => true,
            Self::ClientNotConfigured | Self::Config(_) => false,
        }
    }

    /// Returns `true` if this error is fatal.
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !self.is_recoverable()
    }
}
