//! Scan orchestration: intake, worker pool lifecycle and queries.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐  on_http_traffic   ┌──────────────────────────────┐
//! │ TrafficSource    │ ─────────────────▶ │ CaptureHandler (Weak)        │
//! │ (capture host)   │                    └──────────────┬───────────────┘
//! └──────────────────┘                                   │ add_request
//!                                                        ▼
//!           filter ─▶ dedup ─▶ ResultStore::insert ─▶ try_send (never blocks)
//!                                                        │
//!                                                        ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │ WorkerPool (tokio tasks, 1..=10)                                    │
//! │   ScanTask::run ─▶ AnalysisClient::analyze (retry, cancel-aware)    │
//! └──────────────────────────────┬──────────────────────────────────────┘
//!                                ▼
//!                 ResultStore::update ─▶ ScanStats ─▶ Callbacks
//! ```
//!
//! # Lifecycle
//!
//! 1. **Start**: registers the capture handler once and spawns the pool.
//! 2. **Intake**: accepted exchanges are stored `Pending` and queued.
//! 3. **Stop**: unregisters, cancels the session token, cancels every
//!    `Pending` result, then reaps the workers in the background.
//! 4. **Clear**: stops, then forgets results, counters and dedup keys.
//!
//! A manager is a cheap handle; clones share the same state.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::FutureExt;
use parking_lot::{Mutex, RwLock};
use ps_analysis::{AnalysisClient, AnalysisRequest, PromptBuilder, compress};
use ps_core::{Config, Exchange, RiskLevel, RiskRules, ScanConfig, ScanId, ScanResult};
use tokio::runtime::Handle;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dedup::Deduplicator;
use crate::error::ScanError;
use crate::events::{Callbacks, ScannerStatus};
use crate::filter::{RequestFilter, StaticResourceFilter};
use crate::pool::{JobRunner, ScanJob, WorkerPool};
use crate::report::ScanReport;
use crate::stats::{ScanStats, StatsSnapshot};
use crate::store::ResultStore;
use crate::task::ScanTask;
use crate::traffic::{Registration, TrafficHandler, TrafficSource};

/// State owned by one running session.
struct Session {
    registration: Registration,
    cancel: CancellationToken,
    sender: mpsc::Sender<ScanJob>,
    pool: WorkerPool,
}

/// State shared by every manager handle, the capture handler and the workers.
pub(crate) struct Shared {
    pub(crate) config: ScanConfig,
    pub(crate) rules: RiskRules,
    pub(crate) prompts: PromptBuilder,
    pub(crate) store: ResultStore,
    pub(crate) callbacks: Callbacks,
    pub(crate) client: RwLock<Option<Arc<dyn AnalysisClient>>>,
    /// Id of the task currently forwarding streamed chunks.
    pub(crate) streaming: Mutex<Option<ScanId>>,
    filter: RwLock<Arc<dyn RequestFilter>>,
    dedup: Deduplicator,
    source: Arc<dyn TrafficSource>,
    runtime: Handle,
    thread_count: AtomicUsize,
    /// Serializes start and stop.
    lifecycle: Mutex<()>,
    session: RwLock<Option<Session>>,
    idle: Notify,
}

impl Shared {
    pub(crate) fn stats(&self) -> &ScanStats {
        self.store.stats()
    }

    /// Notifies listeners of a terminal transition the store already counted.
    pub(crate) fn announce_terminal(&self, result: &ScanResult) {
        self.callbacks.result_updated(result);
        self.callbacks.progress_changed(self.stats().snapshot());
        self.idle.notify_waiters();
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            self.source.unregister(session.registration);
            session.cancel.cancel();
        }
    }
}

/// Forwards captured traffic into the manager without keeping it alive.
struct CaptureHandler {
    shared: Weak<Shared>,
}

impl TrafficHandler for CaptureHandler {
    fn on_http_traffic(&self, exchange: Exchange) {
        if let Some(shared) = self.shared.upgrade() {
            ScanManager { shared }.add_request(exchange);
        }
    }
}

/// Passive scan manager.
///
/// Owns the result store, counters, dedup state, callback registry and,
/// while running, the worker pool and the capture registration.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// use ps_analysis::ScriptedClient;
/// use ps_core::{Config, Exchange, HttpRequest};
/// use ps_scanner::{MemoryTrafficSource, ScanManager};
///
/// # tokio::runtime::Builder::new_multi_thread().enable_all().build().unwrap().block_on(async {
/// let source = Arc::new(MemoryTrafficSource::new());
/// let handle = tokio::runtime::Handle::current();
/// let manager = ScanManager::new(&Config::default(), Arc::clone(&source) as _, handle)?;
/// manager.set_api_client(Some(Arc::new(ScriptedClient::new("未发现任何安全漏洞"))));
/// manager.start();
///
/// source.publish(Exchange::new(HttpRequest::new("GET", "https://shop.test/cart?id=7"), None));
/// assert!(manager.wait_idle(Duration::from_secs(5)).await);
/// assert!((manager.get_progress() - 1.0).abs() < f64::EPSILON);
///
/// manager.shutdown().await;
/// # Ok::<(), ps_scanner::ScanError>(())
/// # }).unwrap();
/// ```
#[derive(Clone)]
pub struct ScanManager {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ScanManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanManager")
            .field("running", &self.is_running())
            .field("thread_count", &self.thread_count())
            .field("results", &self.shared.store.len())
            .field("stats", &self.shared.stats().snapshot())
            .finish_non_exhaustive()
    }
}

impl ScanManager {
    /// Creates a stopped manager.
    ///
    /// Workers are spawned onto `runtime` when the manager starts. No
    /// analysis client is installed; see [`set_api_client`](Self::set_api_client).
    pub fn new(
        config: &Config,
        source: Arc<dyn TrafficSource>,
        runtime: Handle,
    ) -> Result<Self, ScanError> {
        config.validate()?;
        let threads = config.scan.effective_thread_count();
        let shared = Shared {
            config: config.scan,
            rules: config.risk.clone(),
            prompts: PromptBuilder::new(config.scan.body_budget_bytes),
            store: ResultStore::new(),
            callbacks: Callbacks::new(),
            client: RwLock::new(None),
            streaming: Mutex::new(None),
            filter: RwLock::new(Arc::new(StaticResourceFilter::new(&config.filter))),
            dedup: Deduplicator::new(),
            source,
            runtime,
            thread_count: AtomicUsize::new(threads),
            lifecycle: Mutex::new(()),
            session: RwLock::new(None),
            idle: Notify::new(),
        };
        debug!(threads, queue_capacity = config.scan.queue_capacity, "scan manager created");
        Ok(Self {
            shared: Arc::new(shared),
        })
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Registers with the capture host and starts the worker pool.
    ///
    /// Does nothing if already running.
    pub fn start(&self) {
        let lifecycle = self.shared.lifecycle.lock();
        if self.shared.session.read().is_some() {
            debug!("scanner already running");
            return;
        }

        let threads = self.thread_count();
        let cancel = CancellationToken::new();
        let (sender, receiver) = mpsc::channel(self.shared.config.queue_capacity);
        let pool = WorkerPool::spawn(
            self.shared.runtime.clone(),
            receiver,
            threads,
            cancel.clone(),
            self.job_runner(cancel.clone()),
        );
        let handler: Arc<dyn TrafficHandler> = Arc::new(CaptureHandler {
            shared: Arc::downgrade(&self.shared),
        });
        let registration = self.shared.source.register(handler);
        *self.shared.session.write() = Some(Session {
            registration,
            cancel,
            sender,
            pool,
        });
        drop(lifecycle);

        info!(threads, "passive scan started");
        self.shared
            .callbacks
            .status_changed(ScannerStatus::Started { threads });
    }

    /// Unregisters from the capture host and cancels outstanding work.
    ///
    /// Workers are reaped in the background. Safe to call when not running.
    pub fn stop(&self) {
        if let Some(pool) = self.halt() {
            let timeout = self.shutdown_timeout();
            self.shared.runtime.spawn(pool.shutdown(timeout));
        }
    }

    /// Like [`stop`](Self::stop), but waits for the workers to exit.
    ///
    /// Workers still busy after `shutdown_timeout_ms` are aborted.
    pub async fn shutdown(&self) {
        if let Some(pool) = self.halt() {
            pool.shutdown(self.shutdown_timeout()).await;
        }
    }

    fn halt(&self) -> Option<WorkerPool> {
        let lifecycle = self.shared.lifecycle.lock();
        let session = self.shared.session.write().take()?;
        self.shared.source.unregister(session.registration);
        session.cancel.cancel();
        let cancelled = self.shared.store.cancel_pending();
        drop(lifecycle);

        for result in &cancelled {
            self.shared.announce_terminal(result);
        }
        info!(cancelled = cancelled.len(), "passive scan stopped");
        self.shared.callbacks.status_changed(ScannerStatus::Stopped);
        self.shared.idle.notify_waiters();
        Some(session.pool)
    }

    fn job_runner(&self, cancel: CancellationToken) -> JobRunner {
        let shared = Arc::downgrade(&self.shared);
        Arc::new(move |job| {
            let shared = shared.upgrade();
            let cancel = cancel.clone();
            async move {
                if let Some(shared) = shared {
                    ScanTask::new(shared, job, cancel).run().await;
                }
            }
            .boxed()
        })
    }

    fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shared.config.shutdown_timeout_ms)
    }

    /// Sets the pool size, clamped to `[1, 10]`, and returns the applied size.
    ///
    /// A running pool is resized in place. Surplus workers finish their
    /// current job before exiting.
    pub fn set_thread_count(&self, requested: i64) -> usize {
        let threads = ScanConfig::clamp_thread_count(requested);
        let previous = self.shared.thread_count.swap(threads, Ordering::SeqCst);
        if let Some(session) = self.shared.session.read().as_ref() {
            session.pool.resize(threads);
        }
        if previous != threads {
            info!(requested, threads, "thread count changed");
            self.shared
                .callbacks
                .status_changed(ScannerStatus::ThreadCountChanged { threads });
        }
        threads
    }

    /// Returns the configured pool size.
    pub fn thread_count(&self) -> usize {
        self.shared.thread_count.load(Ordering::SeqCst)
    }

    /// Returns `true` between [`start`](Self::start) and [`stop`](Self::stop).
    pub fn is_running(&self) -> bool {
        self.shared.session.read().is_some()
    }

    // =========================================================================
    // Intake
    // =========================================================================

    /// Submits one exchange for scanning.
    ///
    /// Returns the new `Pending` result, or `None` if the manager is not
    /// running, the exchange is filtered, it duplicates an earlier one, or
    /// the queue is full. Never blocks.
    pub fn add_request(&self, exchange: Exchange) -> Option<ScanResult> {
        // Held until the job is queued so `stop` cannot slip in between
        // inserting the result and sending the job.
        let session = self.shared.session.read();
        let Some(sender) = session.as_ref().map(|s| &s.sender) else {
            debug!("scanner not running, exchange ignored");
            return None;
        };

        let url = exchange.request.as_ref().map_or("", |r| r.url.as_str());
        if self.shared.filter.read().should_skip(Some(&exchange)) {
            debug!(url, "exchange filtered");
            return None;
        }
        let key = exchange.dedup_key()?;
        if !self.shared.dedup.check_and_insert(&key) {
            debug!(key, "duplicate exchange skipped");
            return None;
        }

        let config = &self.shared.config;
        let budget = config.body_budget_bytes;
        let id = self.shared.store.next_id();
        let result = ScanResult::new(id, &exchange, config.short_url_width)
            .with_request_text(compress(&exchange.request_text(), budget).into_owned())
            .with_response_text(compress(&exchange.response_text(), budget).into_owned());
        self.shared.store.insert(result.clone());

        if let Err(e) = sender.try_send(ScanJob { id, exchange }) {
            self.shared.store.remove(id);
            self.shared.dedup.remove(&key);
            match e {
                TrySendError::Full(_) => {
                    let err = ScanError::queue_full(config.queue_capacity);
                    warn!(%id, error = %err, "exchange dropped");
                }
                TrySendError::Closed(_) => debug!(%id, "scanner stopped while queuing"),
            }
            return None;
        }
        drop(session);

        debug!(%id, url = result.url(), "exchange queued");
        self.shared.callbacks.new_request_queued(&result);
        self.shared
            .callbacks
            .progress_changed(self.shared.stats().snapshot());
        Some(result)
    }

    /// Stops the scanner and forgets every result, counter and dedup key.
    ///
    /// Result ids keep counting, so ids are never reused.
    pub fn clear_results(&self) {
        self.stop();
        let lifecycle = self.shared.lifecycle.lock();
        self.shared.store.clear();
        self.shared.dedup.clear();
        *self.shared.streaming.lock() = None;
        drop(lifecycle);

        info!("scan results cleared");
        self.shared.callbacks.status_changed(ScannerStatus::Cleared);
        self.shared
            .callbacks
            .progress_changed(self.shared.stats().snapshot());
        self.shared.idle.notify_waiters();
    }

    // =========================================================================
    // Collaborators
    // =========================================================================

    /// Installs or removes the analysis client.
    ///
    /// Takes effect for the next task picked up; running tasks keep the
    /// client they started with.
    pub fn set_api_client(&self, client: Option<Arc<dyn AnalysisClient>>) {
        match &client {
            Some(c) => info!(model = c.model_name(), "analysis client installed"),
            None => info!("analysis client removed"),
        }
        *self.shared.client.write() = client;
    }

    /// Returns the installed analysis client.
    pub fn api_client(&self) -> Option<Arc<dyn AnalysisClient>> {
        self.shared.client.read().as_ref().map(Arc::clone)
    }

    /// Replaces the request filter.
    pub fn set_filter(&self, filter: Arc<dyn RequestFilter>) {
        *self.shared.filter.write() = filter;
    }

    /// Analyses one exchange directly, bypassing filter, dedup and queue.
    ///
    /// # Errors
    ///
    /// [`ScanError::ClientNotConfigured`] if no client is installed, or
    /// [`ScanError::Analysis`] if the call fails. No retries are made.
    pub async fn analyze_request(&self, exchange: &Exchange) -> Result<String, ScanError> {
        let client = self.api_client().ok_or(ScanError::ClientNotConfigured)?;
        let prompt = self.shared.prompts.build(exchange);
        let request = AnalysisRequest::new(self.shared.prompts.system_prompt(), &prompt);
        let text = client.analyze(request, &CancellationToken::new()).await?;
        Ok(text)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Returns a fresh copy of every result in acceptance order.
    pub fn get_scan_results(&self) -> Vec<ScanResult> {
        self.shared.store.all()
    }

    /// Returns one result by id.
    pub fn get_result_by_id(&self, id: ScanId) -> Option<ScanResult> {
        self.shared.store.get(id)
    }

    /// Counts results per risk level, with every level present.
    pub fn get_stats_by_risk_level(&self) -> BTreeMap<RiskLevel, usize> {
        self.shared.store.count_by_risk()
    }

    /// Returns `completed / total`, or `0.0` when nothing was accepted.
    pub fn get_progress(&self) -> f64 {
        self.shared.stats().snapshot().progress()
    }

    /// Returns the pipeline counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats().snapshot()
    }

    /// Captures results, counters and risk counts together.
    pub fn snapshot(&self) -> ScanReport {
        ScanReport {
            generated_at: chrono::Utc::now(),
            model: self.api_client().map(|c| c.model_name().to_owned()),
            running: self.is_running(),
            thread_count: self.thread_count(),
            stats: self.shared.stats().snapshot(),
            risk_counts: self.shared.store.count_by_risk(),
            results: self.shared.store.all(),
        }
    }

    /// Waits until every accepted result is terminal.
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let idle = async {
            loop {
                let notified = self.shared.idle.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.shared.stats().snapshot().is_idle() {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, idle).await.is_ok()
    }

    // =========================================================================
    // Callbacks
    // =========================================================================

    /// Sets the handler called once per terminal transition.
    pub fn on_result_updated(&self, handler: impl Fn(&ScanResult) + Send + Sync + 'static) {
        self.shared.callbacks.set_on_result_updated(handler);
    }

    /// Sets the handler for start, stop, clear and resize.
    pub fn on_status_changed(&self, handler: impl Fn(ScannerStatus) + Send + Sync + 'static) {
        self.shared.callbacks.set_on_status_changed(handler);
    }

    /// Sets the handler for counter changes.
    pub fn on_progress_changed(&self, handler: impl Fn(StatsSnapshot) + Send + Sync + 'static) {
        self.shared.callbacks.set_on_progress_changed(handler);
    }

    /// Sets the handler for newly queued results.
    pub fn on_new_request_queued(&self, handler: impl Fn(&ScanResult) + Send + Sync + 'static) {
        self.shared.callbacks.set_on_new_request_queued(handler);
    }

    /// Sets the handler for streamed analysis text.
    ///
    /// Only one task streams at a time; others run without a sink.
    pub fn on_streaming_chunk(&self, handler: impl Fn(ScanId, &str) + Send + Sync + 'static) {
        self.shared.callbacks.set_on_streaming_chunk(handler);
    }
}
