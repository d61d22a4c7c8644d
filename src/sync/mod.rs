//! Coalescing work synchronizers.
//!
//! Many threads submit work units concurrently; a lazily spawned worker drains
//! the queue, folds the queued units into one and applies it once against the
//! shared target. Every submitted unit is applied exactly once.

#![forbid(unsafe_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::types::{clone_error, ApplyError, Result};

/// A delta that can be merged with others of its kind and applied to `M`.
pub trait Work<M: ?Sized>: Send + Sized + 'static {
    /// Folds `other` into `self`; the combined unit must have the effect of
    /// applying both.
    fn combine(&mut self, other: Self);

    fn apply(self, target: &M) -> Result<()>;

    /// Logical units carried, for stats.
    fn units(&self) -> usize {
        1
    }
}

/// Batching limits for a [`WorkSync`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WorkSyncConfig {
    /// Maximum number of submissions folded into one apply
    pub max_batch_units: usize,
    /// How long the worker waits for more submissions; zero only drains what
    /// is already queued
    #[serde(rename = "max_batch_wait_us", deserialize_with = "duration_micros::deserialize")]
    pub max_batch_wait: Duration,
}

impl Default for WorkSyncConfig {
    fn default() -> Self {
        Self {
            max_batch_units: 64,
            max_batch_wait: Duration::ZERO,
        }
    }
}

impl WorkSyncConfig {
    pub(crate) fn normalize(mut self) -> Self {
        if self.max_batch_units == 0 {
            self.max_batch_units = 1;
        }
        self
    }
}

mod duration_micros {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let micros = u64::deserialize(deserializer)?;
        Ok(Duration::from_micros(micros))
    }
}

/// Counters describing how submissions were coalesced.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct WorkSyncStats {
    /// Work units submitted.
    pub submitted: u64,
    /// Physical applies against the target.
    pub applies: u64,
    /// Logical units carried by successful applies.
    pub units_applied: u64,
    /// Physical applies that failed.
    pub failures: u64,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    applies: AtomicU64,
    units_applied: AtomicU64,
    failures: AtomicU64,
}

struct SyncState<W> {
    pending: VecDeque<Arc<WorkRequest<W>>>,
    worker_running: bool,
}

impl<W> Default for SyncState<W> {
    fn default() -> Self {
        Self {
            pending: VecDeque::new(),
            worker_running: false,
        }
    }
}

struct WorkRequest<W> {
    work: Mutex<Option<W>>,
    result: Mutex<Option<Result<()>>>,
    cv: Condvar,
}

impl<W> WorkRequest<W> {
    fn new(work: W) -> Self {
        Self {
            work: Mutex::new(Some(work)),
            result: Mutex::new(None),
            cv: Condvar::new(),
        }
    }

    fn finish(&self, outcome: Result<()>) {
        let mut result = self.result.lock();
        if result.is_none() {
            *result = Some(outcome);
            self.cv.notify_all();
        }
    }

    fn wait(&self) -> Result<()> {
        let mut guard = self.result.lock();
        loop {
            if let Some(result) = guard.take() {
                return result;
            }
            self.cv.wait(&mut guard);
        }
    }
}

/// Handle to a submitted unit; `wait` blocks until it has been applied.
#[must_use = "the outcome of the work is only observed through wait()"]
pub struct WorkTicket {
    waiter: Box<dyn FnOnce() -> Result<()> + Send>,
}

impl WorkTicket {
    pub fn wait(self) -> Result<()> {
        (self.waiter)()
    }
}

/// Process-wide synchronizer applying coalesced `W` units to one `M`.
pub struct WorkSync<M: ?Sized + Send + Sync + 'static, W: Work<M>> {
    name: &'static str,
    target: Arc<M>,
    state: Arc<Mutex<SyncState<W>>>,
    wakeup: Arc<Condvar>,
    config: Arc<Mutex<WorkSyncConfig>>,
    counters: Arc<Counters>,
}

impl<M, W> WorkSync<M, W>
where
    M: ?Sized + Send + Sync + 'static,
    W: Work<M>,
{
    pub fn new(name: &'static str, target: Arc<M>, config: WorkSyncConfig) -> Self {
        Self {
            name,
            target,
            state: Arc::new(Mutex::new(SyncState::default())),
            wakeup: Arc::new(Condvar::new()),
            config: Arc::new(Mutex::new(config.normalize())),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn target(&self) -> &Arc<M> {
        &self.target
    }

    /// Submits `work` and blocks until it has been applied.
    pub fn apply(&self, work: W) -> Result<()> {
        self.apply_async(work).wait()
    }

    /// Submits `work` without waiting.
    pub fn apply_async(&self, work: W) -> WorkTicket {
        let request = Arc::new(WorkRequest::new(work));
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        {
            let mut state = self.state.lock();
            state.pending.push_back(Arc::clone(&request));
            debug!(
                sync = self.name,
                pending = state.pending.len(),
                worker_running = state.worker_running,
                "work_sync.enqueue"
            );
            if !state.worker_running {
                state.worker_running = true;
                if let Err(err) = self.spawn_worker() {
                    warn!(sync = self.name, error = %err, "work_sync.spawn_failed");
                    state.worker_running = false;
                    while let Some(req) = state.pending.pop_front() {
                        req.finish(Err(ApplyError::SyncClosed));
                    }
                }
            } else {
                self.wakeup.notify_one();
            }
        }
        WorkTicket {
            waiter: Box::new(move || request.wait()),
        }
    }

    /// Updates the batching limits at runtime.
    pub fn set_config(&self, config: WorkSyncConfig) {
        {
            let mut guard = self.config.lock();
            *guard = config.normalize();
        }
        self.wakeup.notify_one();
    }

    pub fn stats(&self) -> WorkSyncStats {
        WorkSyncStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            applies: self.counters.applies.load(Ordering::Relaxed),
            units_applied: self.counters.units_applied.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
        }
    }

    fn spawn_worker(&self) -> std::io::Result<()> {
        let worker = Worker {
            name: self.name,
            target: Arc::clone(&self.target),
            state: Arc::clone(&self.state),
            wakeup: Arc::clone(&self.wakeup),
            config: Arc::clone(&self.config),
            counters: Arc::clone(&self.counters),
        };
        thread::Builder::new()
            .name(format!("work-sync-{}", self.name))
            .spawn(move || worker.run())
            .map(|_| ())
    }
}

struct Worker<M: ?Sized, W> {
    name: &'static str,
    target: Arc<M>,
    state: Arc<Mutex<SyncState<W>>>,
    wakeup: Arc<Condvar>,
    config: Arc<Mutex<WorkSyncConfig>>,
    counters: Arc<Counters>,
}

impl<M, W> Worker<M, W>
where
    M: ?Sized + Send + Sync + 'static,
    W: Work<M>,
{
    fn run(self) {
        let mut batch = Vec::new();
        loop {
            batch.clear();
            {
                let mut guard = self.state.lock();
                let Some(first) = guard.pending.pop_front() else {
                    guard.worker_running = false;
                    debug!(sync = self.name, "work_sync.worker_exit");
                    break;
                };
                batch.push(first);
            }
            let config = *self.config.lock();
            self.coalesce_batch(&mut batch, config);
            match self.apply_batch(&batch) {
                Ok(units) => {
                    self.counters.applies.fetch_add(1, Ordering::Relaxed);
                    self.counters
                        .units_applied
                        .fetch_add(units as u64, Ordering::Relaxed);
                    for req in batch.drain(..) {
                        req.finish(Ok(()));
                    }
                }
                Err(err) => {
                    self.counters.applies.fetch_add(1, Ordering::Relaxed);
                    self.counters.failures.fetch_add(1, Ordering::Relaxed);
                    warn!(sync = self.name, error = %err, "work_sync.apply_failed");
                    for req in batch.drain(..) {
                        req.finish(Err(clone_error(&err)));
                    }
                }
            }
        }
    }

    fn coalesce_batch(&self, batch: &mut Vec<Arc<WorkRequest<W>>>, config: WorkSyncConfig) {
        let start = Instant::now();
        while batch.len() < config.max_batch_units {
            let mut guard = self.state.lock();
            if let Some(req) = guard.pending.pop_front() {
                batch.push(req);
                continue;
            }
            let remaining = match config.max_batch_wait.checked_sub(start.elapsed()) {
                Some(dur) if !dur.is_zero() => dur,
                _ => break,
            };
            let wait_result = self.wakeup.wait_for(&mut guard, remaining);
            if wait_result.timed_out() && guard.pending.is_empty() {
                break;
            }
        }
    }

    fn apply_batch(&self, batch: &[Arc<WorkRequest<W>>]) -> Result<usize> {
        let mut combined: Option<W> = None;
        for req in batch {
            let Some(work) = req.work.lock().take() else {
                continue;
            };
            match combined.as_mut() {
                Some(acc) => acc.combine(work),
                None => combined = Some(work),
            }
        }
        let Some(work) = combined else {
            return Ok(0);
        };
        let units = work.units();
        debug!(
            sync = self.name,
            submissions = batch.len(),
            units,
            "work_sync.apply_batch"
        );
        work.apply(&self.target)?;
        Ok(units)
    }
}
