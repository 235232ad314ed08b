//! Resizable pool of async scan workers.
//!
//! # Architecture
//!
//! ```text
//!  add_request ── try_send ──▶ mpsc (bounded) ──▶ Arc<Mutex<Receiver>>
//!                                                       │ one worker at a time
//!                                                       ▼
//!                          ┌─────────┬─────────┬─────────┐
//!                          │ worker 0│ worker 1│ worker n│  tokio tasks
//!                          └────┬────┴────┬────┴────┬────┘
//!                               └── runner(job).await ──┘
//! ```
//!
//! The desired size lives in a `watch` channel. A worker whose index is at
//! or above the desired size exits between jobs, never during one. The
//! retire decision and the respawn decision are both made under the slot
//! lock, so a shrink followed by a grow cannot leave a slot empty.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, join_all};
use parking_lot::Mutex;
use ps_core::{Exchange, MAX_THREADS, ScanId};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// One unit of queued work.
#[derive(Debug)]
pub(crate) struct ScanJob {
    pub id: ScanId,
    pub exchange: Exchange,
}

/// Runs one job to completion.
pub(crate) type JobRunner = Arc<dyn Fn(ScanJob) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Default)]
struct Slots {
    alive: [bool; MAX_THREADS],
    handles: Vec<JoinHandle<()>>,
}

struct PoolInner {
    receiver: tokio::sync::Mutex<mpsc::Receiver<ScanJob>>,
    desired: watch::Sender<usize>,
    slots: Mutex<Slots>,
    cancel: CancellationToken,
    runner: JobRunner,
    runtime: Handle,
}

/// Workers draining one session's job queue.
pub(crate) struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("desired", &*self.inner.desired.borrow())
            .field("alive", &self.alive())
            .finish()
    }
}

impl WorkerPool {
    /// Spawns `size` workers onto `runtime`.
    pub(crate) fn spawn(
        runtime: Handle,
        receiver: mpsc::Receiver<ScanJob>,
        size: usize,
        cancel: CancellationToken,
        runner: JobRunner,
    ) -> Self {
        let (desired, _) = watch::channel(size);
        let pool = Self {
            inner: Arc::new(PoolInner {
                receiver: tokio::sync::Mutex::new(receiver),
                desired,
                slots: Mutex::new(Slots::default()),
                cancel,
                runner,
                runtime,
            }),
        };
        pool.resize(size);
        pool
    }

    /// Changes the pool size. Running jobs are never interrupted.
    pub(crate) fn resize(&self, size: usize) {
        let size = size.min(MAX_THREADS);
        let mut slots = self.inner.slots.lock();
        self.inner.desired.send_replace(size);
        for id in 0..size {
            if slots.alive[id] {
                continue;
            }
            slots.alive[id] = true;
            let inner = Arc::clone(&self.inner);
            let handle = self.inner.runtime.spawn(worker_loop(inner, id));
            slots.handles.retain(|h| !h.is_finished());
            slots.handles.push(handle);
        }
        debug!(size, "worker pool resized");
    }

    /// Returns the number of workers that have not retired.
    pub(crate) fn alive(&self) -> usize {
        self.inner.slots.lock().alive.iter().filter(|a| **a).count()
    }

    /// Waits up to `timeout` for the workers to exit, then aborts the rest.
    ///
    /// The pool's cancellation token must already be cancelled.
    pub(crate) async fn shutdown(self, timeout: Duration) {
        let handles = std::mem::take(&mut self.inner.slots.lock().handles);
        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        if tokio::time::timeout(timeout, join_all(handles)).await.is_err() {
            warn!(
                timeout_ms = timeout.as_millis(),
                workers = aborts.len(),
                "workers did not stop in time, aborting"
            );
            for abort in aborts {
                abort.abort();
            }
        }
    }
}

impl PoolInner {
    /// Marks the worker retired if the pool shrank below it.
    fn retire_if_surplus(&self, id: usize, desired: &mut watch::Receiver<usize>) -> bool {
        let mut slots = self.slots.lock();
        if id >= *desired.borrow_and_update() {
            slots.alive[id] = false;
            return true;
        }
        false
    }
}

async fn worker_loop(inner: Arc<PoolInner>, id: usize) {
    let mut desired = inner.desired.subscribe();
    debug!(worker = id, "worker started");
    loop {
        if inner.retire_if_surplus(id, &mut desired) {
            debug!(worker = id, "worker retired");
            return;
        }

        let job = {
            let mut receiver = tokio::select! {
                () = inner.cancel.cancelled() => break,
                guard = inner.receiver.lock() => guard,
            };
            if inner.retire_if_surplus(id, &mut desired) {
                debug!(worker = id, "worker retired");
                return;
            }
            tokio::select! {
                () = inner.cancel.cancelled() => None,
                changed = desired.changed() => match changed {
                    Ok(()) => continue,
                    Err(_) => None,
                },
                job = receiver.recv() => job,
            }
        };

        let Some(job) = job else { break };
        (inner.runner)(job).await;
    }
    inner.slots.lock().alive[id] = false;
    debug!(worker = id, "worker stopped");
}
