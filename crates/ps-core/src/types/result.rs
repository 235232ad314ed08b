//! Per-exchange scan records.
//!
//! A [`ScanResult`] is created when an exchange is accepted into the
//! pipeline and is then mutated only by the task that owns it, through the
//! four `mark_*` transitions.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use unicode_width::UnicodeWidthChar;

use super::exchange::Exchange;
use super::risk::{RiskLevel, RiskRules};
use super::status::ScanStatus;
use crate::error::TransitionError;

/// Identifier of a scan result, assigned in acceptance order and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScanId(pub u64);

impl ScanId {
    /// Returns the inner value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ScanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The lifecycle and outcome of scanning one exchange.
///
/// Invariants:
///
/// - `completed_time` is set iff the status is terminal
/// - `analysis_result` is set iff the status is `Completed`
/// - `risk_level` stays `None` until the status is `Completed`
///
/// # Examples
///
/// ```
/// use ps_core::{Exchange, HttpRequest, ScanId, ScanResult, ScanStatus};
///
/// let exchange = Exchange::new(HttpRequest::new("GET", "https://h/a?x=1"), None);
/// let mut result = ScanResult::new(ScanId(1), &exchange, 60);
/// result.mark_scanning().unwrap();
/// result.mark_completed("未发现任何安全漏洞".to_owned()).unwrap();
/// assert_eq!(result.status(), ScanStatus::Completed);
/// assert!(result.completed_time().is_some());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    id: ScanId,
    method: String,
    url: String,
    host: String,
    short_url: String,
    status: ScanStatus,
    risk_level: RiskLevel,
    analysis_result: Option<String>,
    error_message: Option<String>,
    timestamp: DateTime<Utc>,
    completed_time: Option<DateTime<Utc>>,
    request_text: String,
    response_text: String,
}

impl ScanResult {
    /// Creates a pending result, copying display metadata from the exchange.
    ///
    /// `short_url_width` bounds the display width of [`short_url`](Self::short_url).
    #[must_use]
    pub fn new(id: ScanId, exchange: &Exchange, short_url_width: usize) -> Self {
        let (method, url, host, short_url) = exchange.request.as_ref().map_or_else(
            || (String::new(), String::new(), String::new(), String::new()),
            |req| {
                (
                    req.method.clone(),
                    req.url.clone(),
                    req.host().to_owned(),
                    truncate_width(req.path_and_query(), short_url_width),
                )
            },
        );
        Self {
            id,
            method,
            url,
            host,
            short_url,
            status: ScanStatus::Pending,
            risk_level: RiskLevel::None,
            analysis_result: None,
            error_message: None,
            timestamp: Utc::now(),
            completed_time: None,
            request_text: String::new(),
            response_text: String::new(),
        }
    }

    /// Attaches the rendered request text kept for detail views.
    #[must_use]
    pub fn with_request_text(mut self, text: String) -> Self {
        self.request_text = text;
        self
    }

    /// Attaches the rendered response text kept for detail views.
    #[must_use]
    pub fn with_response_text(mut self, text: String) -> Self {
        self.response_text = text;
        self
    }

    /// Moves `Pending -> Scanning`.
    pub fn mark_scanning(&mut self) -> Result<(), TransitionError> {
        self.transition(ScanStatus::Scanning)
    }

    /// Moves to `Completed`, classifying the text with the default rules.
    pub fn mark_completed(&mut self, analysis: String) -> Result<(), TransitionError> {
        let level = RiskRules::shared_default().classify(&analysis);
        self.mark_completed_as(analysis, level)
    }

    /// Moves to `Completed` with an already computed risk level.
    pub fn mark_completed_as(
        &mut self,
        analysis: String,
        level: RiskLevel,
    ) -> Result<(), TransitionError> {
        self.transition(ScanStatus::Completed)?;
        self.analysis_result = Some(analysis);
        self.risk_level = level;
        Ok(())
    }

    /// Moves to `Error`, recording the message.
    pub fn mark_error(&mut self, message: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(ScanStatus::Error)?;
        self.error_message = Some(message.into());
        Ok(())
    }

    /// Moves to `Cancelled`.
    pub fn mark_cancelled(&mut self) -> Result<(), TransitionError> {
        self.transition(ScanStatus::Cancelled)
    }

    fn transition(&mut self, to: ScanStatus) -> Result<(), TransitionError> {
        let allowed = match (self.status, to) {
            (ScanStatus::Pending, ScanStatus::Scanning) => true,
            // Pending results may be cancelled or failed without ever running.
            (ScanStatus::Pending, ScanStatus::Cancelled | ScanStatus::Error) => true,
            (ScanStatus::Scanning, next) => next.is_terminal(),
            _ => false,
        };
        if !allowed {
            return Err(TransitionError {
                from: self.status,
                to,
            });
        }
        self.status = to;
        if to.is_terminal() {
            self.completed_time = Some(Utc::now());
        }
        Ok(())
    }

    /// Returns the result id.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> ScanId {
        self.id
    }

    /// Returns the request method.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Returns the full request url.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns the request host.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the display-truncated path and query.
    #[must_use]
    pub fn short_url(&self) -> &str {
        &self.short_url
    }

    /// Returns the lifecycle status.
    #[inline]
    #[must_use]
    pub const fn status(&self) -> ScanStatus {
        self.status
    }

    /// Returns the inferred risk level.
    #[inline]
    #[must_use]
    pub const fn risk_level(&self) -> RiskLevel {
        self.risk_level
    }

    /// Returns the analysis text, present only when completed.
    #[must_use]
    pub fn analysis_result(&self) -> Option<&str> {
        self.analysis_result.as_deref()
    }

    /// Returns the error message, present only on error.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Returns the creation time.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Returns the time the result reached a terminal status.
    #[must_use]
    pub const fn completed_time(&self) -> Option<DateTime<Utc>> {
        self.completed_time
    }

    /// Returns the rendered request text, empty if none was attached.
    #[must_use]
    pub fn request_text(&self) -> &str {
        &self.request_text
    }

    /// Returns the rendered response text, empty if none was attached.
    #[must_use]
    pub fn response_text(&self) -> &str {
        &self.response_text
    }

    /// Returns a one-line `METHOD short-url` label for lists and logs.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{} {}", self.method, self.short_url)
    }

    /// Returns `true` once the result is in a terminal status.
    #[inline]
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Returns the time from creation to the terminal transition.
    #[must_use]
    pub fn duration(&self) -> Option<Duration> {
        self.completed_time
            .and_then(|done| (done - self.timestamp).to_std().ok())
    }
}

/// Truncates `text` to at most `width` display columns, appending `...`.
fn truncate_width(text: &str, width: usize) -> String {
    const ELLIPSIS: &str = "...";

    let total: usize = text.chars().map(|c| c.width().unwrap_or(0)).sum();
    if total <= width {
        return text.to_owned();
    }
    let budget = width.saturating_sub(ELLIPSIS.len());
    let mut used = 0;
    let mut out = String::new();
    for ch in text.chars() {
        let w = ch.width().unwrap_or(0);
        if used + w > budget {
            break;
        }
        used += w;
        out.push(ch);
    }
    out.push_str(ELLIPSIS);
    out
}
