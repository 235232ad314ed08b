//! Passive vulnerability scan pipeline.
//!
//! This crate turns captured HTTP exchanges into analysed, risk-classified
//! scan results. It filters static traffic, suppresses repeats, queues the
//! rest onto a bounded worker pool, and reports progress through callbacks.
//!
//! # Overview
//!
//! The main entry point is [`ScanManager`], which combines:
//!
//! - [`RequestFilter`]: static-resource and binary-response exclusion
//! - [`Deduplicator`]: `method|host|url-without-query` suppression
//! - [`ResultStore`]: results in acceptance order behind a `RwLock`
//! - [`ScanStats`]: atomic counters for progress tracking
//! - [`Callbacks`]: single-subscriber event slots, panic-isolated
//!
//! Capture hosts plug in through [`TrafficSource`]; the remote model plugs
//! in through [`ps_analysis::AnalysisClient`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use ps_analysis::OpenAiClient;
//! use ps_core::Config;
//! use ps_scanner::{MemoryTrafficSource, ScanManager};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! let source = Arc::new(MemoryTrafficSource::new());
//! let manager = ScanManager::new(&config, source, tokio::runtime::Handle::current())?;
//! manager.set_api_client(Some(Arc::new(OpenAiClient::from_config(&config.api)?)));
//!
//! manager.on_result_updated(|result| {
//!     tracing::info!(url = result.url(), risk = result.risk_level().label(), "scanned");
//! });
//! manager.start();
//! manager.wait_idle(Duration::from_secs(60)).await;
//! manager.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ScanManager (cheap handle, Arc<Shared>)
//!     │
//!     ├── TrafficSource registration (start/stop only)
//!     │
//!     ├── RequestFilter ─▶ Deduplicator ─▶ ResultStore
//!     │
//!     ├── WorkerPool (tokio tasks, resizable 1..=10)
//!     │       │
//!     │       └── ScanTask (retry, cancel, stream slot)
//!     │
//!     ├── ScanStats (atomic counters)
//!     │
//!     └── Callbacks (invoked with no lock held)
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

mod dedup;
mod error;
mod events;
mod filter;
mod manager;
mod pool;
mod report;
mod stats;
mod store;
mod task;
mod traffic;

pub use dedup::Deduplicator;
pub use error::ScanError;
pub use events::{Callbacks, ScannerStatus};
pub use filter::{RequestFilter, StaticResourceFilter, should_skip_request};
pub use manager::ScanManager;
pub use report::ScanReport;
pub use stats::{ScanStats, StatsSnapshot};
pub use store::ResultStore;
pub use traffic::{MemoryTrafficSource, Registration, TrafficHandler, TrafficSource};
