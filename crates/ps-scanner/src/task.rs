//! One scan job from dequeue to terminal status.
//!
//! # State Machine
//!
//! ```text
//!  Pending ──▶ Scanning ──▶ Completed
//!     │            ├──────▶ Error
//!     │            └──────▶ Cancelled
//!     └──────────────────▶ Cancelled   (stopped before it ran)
//! ```
//!
//! The begin transition checks the session token under the store lock, so
//! a job racing `stop` is counted exactly once, by whichever side wins.
//! Counting happens inside the store as part of each transition; a job
//! whose result was cleared away finishes without touching any counter.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use ps_analysis::{AnalysisClient, AnalysisError, AnalysisRequest};
use ps_core::{RiskLevel, ScanId, ScanResult, ScanStatus};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ScanError;
use crate::manager::Shared;
use crate::pool::ScanJob;

/// How a job ended.
#[derive(Debug)]
enum Outcome {
    Completed { text: String, level: RiskLevel },
    Failed(String),
    Cancelled,
}

/// Holds the single streaming slot while a task owns it.
struct StreamSlot<'a> {
    slot: &'a Mutex<Option<ScanId>>,
    id: ScanId,
    held: bool,
}

impl<'a> StreamSlot<'a> {
    fn claim(slot: &'a Mutex<Option<ScanId>>, id: ScanId) -> Self {
        let mut current = slot.lock();
        let held = current.is_none();
        if held {
            *current = Some(id);
        }
        Self { slot, id, held }
    }
}

impl Drop for StreamSlot<'_> {
    fn drop(&mut self) {
        if self.held {
            let mut current = self.slot.lock();
            if *current == Some(self.id) {
                *current = None;
            }
        }
    }
}

/// A dequeued job bound to the session that accepted it.
pub(crate) struct ScanTask {
    shared: Arc<Shared>,
    job: ScanJob,
    cancel: CancellationToken,
}

impl ScanTask {
    pub(crate) const fn new(shared: Arc<Shared>, job: ScanJob, cancel: CancellationToken) -> Self {
        Self {
            shared,
            job,
            cancel,
        }
    }

    /// Runs the job and publishes its terminal transition.
    pub(crate) async fn run(self) {
        let id = self.job.id;
        let begin = self.shared.store.update(id, |r| {
            if self.cancel.is_cancelled() {
                r.mark_cancelled()
            } else {
                r.mark_scanning()
            }
        });
        let started = match begin {
            Some(Ok(result)) => result,
            Some(Err(e)) => {
                debug!(%id, error = %e, "job already settled");
                return;
            }
            None => {
                debug!(%id, "job result was cleared");
                return;
            }
        };
        if started.status() == ScanStatus::Cancelled {
            self.shared.announce_terminal(&started);
            return;
        }
        debug!(%id, url = started.url(), "scanning");
        self.shared
            .callbacks
            .progress_changed(self.shared.stats().snapshot());

        let outcome = self.analyze().await;
        self.finish(outcome);
    }

    async fn analyze(&self) -> Outcome {
        let id = self.job.id;
        let client = self.shared.client.read().as_ref().map(Arc::clone);
        let Some(client) = client else {
            return Outcome::Failed(ScanError::ClientNotConfigured.to_string());
        };

        let prompt = self.shared.prompts.build(&self.job.exchange);
        let slot = StreamSlot::claim(&self.shared.streaming, id);
        let shared = &self.shared;
        let sink = move |chunk: &str| shared.callbacks.streaming_chunk(id, chunk);
        let mut request = AnalysisRequest::new(self.shared.prompts.system_prompt(), &prompt);
        if slot.held {
            request = request.with_chunk_sink(&sink);
        }

        let max_attempts = self.shared.config.max_attempts.max(1);
        let backoff = Duration::from_millis(self.shared.config.retry_backoff_ms);
        let mut attempt = 0;
        loop {
            attempt += 1;
            if self.cancel.is_cancelled() {
                return Outcome::Cancelled;
            }
            match self.attempt(client.as_ref(), request).await {
                Ok(text) => {
                    let level = self.shared.rules.classify(&text);
                    return Outcome::Completed { text, level };
                }
                Err(e) if e.is_cancelled() => return Outcome::Cancelled,
                Err(e) if e.is_non_fatal() => {
                    warn!(%id, error = %e, "analysis refused, recording note");
                    let text = e.non_fatal_note().unwrap_or_default().to_owned();
                    return Outcome::Completed {
                        text,
                        level: RiskLevel::None,
                    };
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    warn!(%id, attempt, max_attempts, error = %e, "analysis failed, retrying");
                    tokio::select! {
                        () = self.cancel.cancelled() => return Outcome::Cancelled,
                        () = tokio::time::sleep(backoff) => {}
                    }
                }
                Err(e) => {
                    warn!(%id, attempt, error = %e, "analysis failed");
                    return Outcome::Failed(e.to_string());
                }
            }
        }
    }

    async fn attempt(
        &self,
        client: &dyn AnalysisClient,
        request: AnalysisRequest<'_>,
    ) -> Result<String, AnalysisError> {
        tokio::select! {
            () = self.cancel.cancelled() => Err(AnalysisError::Cancelled),
            result = client.analyze(request, &self.cancel) => result,
        }
    }

    fn finish(&self, outcome: Outcome) {
        let id = self.job.id;
        let updated = self.shared.store.update(id, |r: &mut ScanResult| match outcome {
            Outcome::Completed { text, level } => r.mark_completed_as(text, level),
            Outcome::Failed(message) => r.mark_error(message),
            Outcome::Cancelled => r.mark_cancelled(),
        });
        match updated {
            Some(Ok(result)) => {
                debug!(
                    %id,
                    status = result.status().label(),
                    risk = result.risk_level().label(),
                    "scan finished"
                );
                self.shared.announce_terminal(&result);
            }
            Some(Err(e)) => debug!(%id, error = %e, "terminal transition rejected"),
            None => debug!(%id, "job result was cleared"),
        }
    }
}
