//! Scan lifecycle status.

use serde::{Deserialize, Serialize};

/// The lifecycle status of a single scan.
///
/// Results start [`Pending`](Self::Pending), move to
/// [`Scanning`](Self::Scanning) when a worker picks them up, and end in
/// exactly one terminal state.
///
/// # Examples
///
/// ```
/// use ps_core::ScanStatus;
///
/// assert!(!ScanStatus::Scanning.is_terminal());
/// assert!(ScanStatus::Cancelled.is_terminal());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanStatus {
    /// Accepted and waiting in the queue.
    #[default]
    Pending,
    /// A worker is running the remote analysis.
    Scanning,
    /// Analysis finished and produced text.
    Completed,
    /// Analysis failed with a fatal error.
    Error,
    /// Cancelled by stop or clear before finishing.
    Cancelled,
}

impl ScanStatus {
    /// Returns `true` for `Completed`, `Error` and `Cancelled`.
    #[inline]
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Cancelled)
    }

    /// Returns a human-readable label for this status.
    ///
    /// # Examples
    ///
    /// ```
    /// use ps_core::ScanStatus;
    ///
    /// assert_eq!(ScanStatus::Pending.label(), "Pending");
    /// ```
    #[inline]
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Scanning => "Scanning",
            Self::Completed => "Completed",
            Self::Error => "Error",
            Self::Cancelled => "Cancelled",
        }
    }
}
