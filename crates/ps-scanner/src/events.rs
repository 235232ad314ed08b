//! Callback registry for scan events.
//!
//! Each event kind has a single subscriber slot; registering a handler
//! replaces the previous one. Handlers run synchronously on whichever task
//! produced the event.
//!
//! # Event Flow
//!
//! ```text
//! add_request / capture handler
//!        │
//!        ├── on_new_request_queued
//!        ▼
//!   worker picks task
//!        │
//!        ├── on_progress_changed
//!        ├── on_streaming_chunk (0..n)
//!        ▼
//!   terminal transition
//!        │
//!        ├── on_result_updated (exactly once)
//!        └── on_progress_changed
//! ```
//!
//! Handlers are called with no internal lock held, so they may call back
//! into the manager. A panicking handler is logged and does not affect the
//! other handlers or the pipeline.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::RwLock;
use ps_core::{ScanId, ScanResult};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::stats::StatsSnapshot;

/// Lifecycle change of the scanner as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScannerStatus {
    /// The worker pool started.
    Started {
        /// Pool size.
        threads: usize,
    },
    /// The scanner stopped and outstanding tasks were cancelled.
    Stopped,
    /// Results, counters and dedup keys were cleared.
    Cleared,
    /// The configured pool size changed.
    ThreadCountChanged {
        /// New pool size.
        threads: usize,
    },
}

type ResultHandler = Arc<dyn Fn(&ScanResult) + Send + Sync>;
type StatusHandler = Arc<dyn Fn(ScannerStatus) + Send + Sync>;
type ProgressHandler = Arc<dyn Fn(StatsSnapshot) + Send + Sync>;
type ChunkHandler = Arc<dyn Fn(ScanId, &str) + Send + Sync>;

/// Single-subscriber callback slots.
#[derive(Default)]
pub struct Callbacks {
    result_updated: RwLock<Option<ResultHandler>>,
    status_changed: RwLock<Option<StatusHandler>>,
    progress_changed: RwLock<Option<ProgressHandler>>,
    new_request_queued: RwLock<Option<ResultHandler>>,
    streaming_chunk: RwLock<Option<ChunkHandler>>,
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("result_updated", &self.result_updated.read().is_some())
            .field("status_changed", &self.status_changed.read().is_some())
            .field("progress_changed", &self.progress_changed.read().is_some())
            .field("new_request_queued", &self.new_request_queued.read().is_some())
            .field("streaming_chunk", &self.streaming_chunk.read().is_some())
            .finish()
    }
}

impl Callbacks {
    /// Creates a registry with every slot empty.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the handler for terminal result transitions.
    pub fn set_on_result_updated(&self, handler: impl Fn(&ScanResult) + Send + Sync + 'static) {
        *self.result_updated.write() = Some(Arc::new(handler));
    }

    /// Sets the handler for scanner lifecycle changes.
    pub fn set_on_status_changed(&self, handler: impl Fn(ScannerStatus) + Send + Sync + 'static) {
        *self.status_changed.write() = Some(Arc::new(handler));
    }

    /// Sets the handler for progress changes.
    pub fn set_on_progress_changed(
        &self,
        handler: impl Fn(StatsSnapshot) + Send + Sync + 'static,
    ) {
        *self.progress_changed.write() = Some(Arc::new(handler));
    }

    /// Sets the handler for newly queued results.
    pub fn set_on_new_request_queued(
        &self,
        handler: impl Fn(&ScanResult) + Send + Sync + 'static,
    ) {
        *self.new_request_queued.write() = Some(Arc::new(handler));
    }

    /// Sets the handler for streamed analysis text.
    pub fn set_on_streaming_chunk(&self, handler: impl Fn(ScanId, &str) + Send + Sync + 'static) {
        *self.streaming_chunk.write() = Some(Arc::new(handler));
    }

    pub(crate) fn result_updated(&self, result: &ScanResult) {
        let handler = self.result_updated.read().as_ref().map(Arc::clone);
        if let Some(handler) = handler {
            isolate("result_updated", || handler(result));
        }
    }

    pub(crate) fn status_changed(&self, status: ScannerStatus) {
        let handler = self.status_changed.read().as_ref().map(Arc::clone);
        if let Some(handler) = handler {
            isolate("status_changed", || handler(status));
        }
    }

    pub(crate) fn progress_changed(&self, snapshot: StatsSnapshot) {
        let handler = self.progress_changed.read().as_ref().map(Arc::clone);
        if let Some(handler) = handler {
            isolate("progress_changed", || handler(snapshot));
        }
    }

    pub(crate) fn new_request_queued(&self, result: &ScanResult) {
        let handler = self.new_request_queued.read().as_ref().map(Arc::clone);
        if let Some(handler) = handler {
            isolate("new_request_queued", || handler(result));
        }
    }

    pub(crate) fn streaming_chunk(&self, id: ScanId, chunk: &str) {
        let handler = self.streaming_chunk.read().as_ref().map(Arc::clone);
        if let Some(handler) = handler {
            isolate("streaming_chunk", || handler(id, chunk));
        }
    }
}

/// Runs a handler, logging instead of propagating a panic.
fn isolate(slot: &'static str, call: impl FnOnce()) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(call)) {
        warn!(slot, panic = panic_message(payload.as_ref()), "callback handler panicked");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic>")
}
