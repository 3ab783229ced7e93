//! In-process job queue with a concurrency ceiling and retries.
//!
//! All bookkeeping lives behind one mutex that is never held across an
//! await. Handlers run on spawned tasks; each one is wrapped in a second
//! task so a panic surfaces as a failed attempt instead of taking the
//! scheduler down with it.

pub mod job;

pub use job::{
    AddOptions, AuditJobOutcome, Job, JobContext, JobHandlers, JobId, JobKind, JobOutput, JobPayload,
    JobStats, JobStatus, QueueEvent, RunAuditHandler, RunAuditPayload,
};

use std::any::Any;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinError;
use tracing::Instrument;

use crate::error::{AppError, Result};
use crate::events::{EventBus, Subscription};

pub const MIN_CONCURRENT_JOBS: usize = 1;
pub const MAX_CONCURRENT_JOBS: usize = 10;

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub max_concurrent_jobs: usize,
    pub default_max_attempts: u32,
    /// Deadline for a single attempt. `None` lets handlers run unbounded.
    pub job_timeout: Option<Duration>,
    /// Job table size above which old terminal jobs are swept.
    pub cleanup_threshold: usize,
    /// Minimum age of a terminal job before the sweep may drop it.
    pub retention: chrono::Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            default_max_attempts: 3,
            job_timeout: None,
            cleanup_threshold: 100,
            retention: chrono::Duration::hours(24),
        }
    }
}

struct QueueState {
    /// Keyed by the numeric form of the job id, so iteration is FIFO.
    jobs: BTreeMap<u64, Job>,
    waiting: VecDeque<u64>,
    active: HashSet<u64>,
    next_id: u64,
    paused: bool,
    max_concurrent: usize,
}

impl QueueState {
    fn is_idle(&self) -> bool {
        self.active.is_empty() && (self.waiting.is_empty() || self.paused)
    }
}

struct Inner {
    state: Mutex<QueueState>,
    handlers: JobHandlers,
    events: EventBus<QueueEvent>,
    config: QueueConfig,
    runtime: Handle,
    idle: Notify,
}

#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<Inner>,
}

struct Started {
    seq: u64,
    job_id: JobId,
    attempt: u32,
    payload: JobPayload,
}

impl JobQueue {
    /// Create a queue that spawns handlers on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn new(handlers: JobHandlers, config: QueueConfig) -> Self {
        Self::with_handle(handlers, config, Handle::current())
    }

    pub fn with_handle(handlers: JobHandlers, config: QueueConfig, runtime: Handle) -> Self {
        let max_concurrent = config
            .max_concurrent_jobs
            .clamp(MIN_CONCURRENT_JOBS, MAX_CONCURRENT_JOBS);
        if max_concurrent != config.max_concurrent_jobs {
            log::warn!(
                "[QUEUE] max_concurrent_jobs {} out of range, using {}",
                config.max_concurrent_jobs,
                max_concurrent
            );
        }
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState {
                    jobs: BTreeMap::new(),
                    waiting: VecDeque::new(),
                    active: HashSet::new(),
                    next_id: 0,
                    paused: false,
                    max_concurrent,
                }),
                handlers,
                events: EventBus::new(),
                config,
                runtime,
                idle: Notify::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: QueueEvent) {
        self.inner.events.emit(&event);
    }

    // ========================================================================
    // SUBMISSION
    // ========================================================================

    /// Enqueue a job and try to start it right away.
    pub fn add(&self, payload: JobPayload, opts: AddOptions) -> JobId {
        let kind = payload.kind();
        let max_attempts = opts
            .max_attempts
            .unwrap_or(self.inner.config.default_max_attempts)
            .max(1);

        let job_id = {
            let mut state = self.lock();
            state.next_id += 1;
            let seq = state.next_id;
            let now = Utc::now();
            let job = Job {
                id: seq.to_string(),
                payload,
                status: JobStatus::Waiting,
                attempts: 0,
                max_attempts,
                error: None,
                result: None,
                created_at: now,
                updated_at: now,
            };
            let id = job.id.clone();
            state.jobs.insert(seq, job);
            state.waiting.push_back(seq);
            id
        };

        log::info!("[QUEUE] Added job {} ({:?}, max {} attempts)", job_id, kind, max_attempts);
        self.emit(QueueEvent::Added {
            job_id: job_id.clone(),
            kind,
        });
        self.schedule();
        job_id
    }

    /// Activate waiting jobs until the ceiling is reached.
    fn schedule(&self) {
        let started: Vec<Started> = {
            let mut guard = self.lock();
            let state = &mut *guard;
            let mut started = Vec::new();
            while !state.paused && state.active.len() < state.max_concurrent {
                let Some(seq) = state.waiting.pop_front() else {
                    break;
                };
                let Some(job) = state.jobs.get_mut(&seq) else {
                    continue;
                };
                job.status = JobStatus::Active;
                job.attempts += 1;
                job.updated_at = Utc::now();
                state.active.insert(seq);
                started.push(Started {
                    seq,
                    job_id: job.id.clone(),
                    attempt: job.attempts,
                    payload: job.payload.clone(),
                });
            }
            started
        };

        for job in started {
            log::debug!("[QUEUE] Job {} active (attempt {})", job.job_id, job.attempt);
            self.emit(QueueEvent::Active {
                job_id: job.job_id.clone(),
                attempt: job.attempt,
            });
            self.spawn(job);
        }
    }

    fn spawn(&self, job: Started) {
        let queue = self.clone();
        let handlers = self.inner.handlers.clone();
        let timeout = self.inner.config.job_timeout;
        let ctx = JobContext::new(job.job_id.clone(), job.attempt, self.inner.events.clone());
        let span = tracing::info_span!("job", id = %job.job_id, attempt = job.attempt);
        let Started { seq, payload, .. } = job;

        self.inner.runtime.spawn(async move {
            let expired = (ctx.clone(), payload.clone());
            let dispatcher = handlers.clone();
            let mut work = queue
                .inner
                .runtime
                .spawn(async move { dispatcher.dispatch(ctx, payload).await }.instrument(span));

            let result = match timeout {
                Some(limit) => match tokio::time::timeout(limit, &mut work).await {
                    Ok(joined) => flatten_join(joined),
                    Err(_) => {
                        work.abort();
                        // Wait for the aborted future to drop before the hook runs.
                        let _ = work.await;
                        let (ctx, payload) = expired;
                        handlers.on_timeout(ctx, payload, limit).await;
                        Err(AppError::Timeout(limit))
                    }
                },
                None => flatten_join(work.await),
            };
            queue.settle(seq, result);
        });
    }

    /// Record the outcome of one attempt, then keep the queue moving.
    fn settle(&self, seq: u64, result: Result<JobOutput>) {
        let event = {
            let mut guard = self.lock();
            let state = &mut *guard;
            state.active.remove(&seq);
            state.jobs.get_mut(&seq).map(|job| {
                job.updated_at = Utc::now();
                match result {
                    Ok(output) => {
                        job.status = JobStatus::Completed;
                        job.error = None;
                        job.result = Some(output.clone());
                        QueueEvent::Completed {
                            job_id: job.id.clone(),
                            result: output,
                        }
                    }
                    Err(e) if job.attempts < job.max_attempts => {
                        job.status = JobStatus::Waiting;
                        job.error = Some(e.to_string());
                        state.waiting.push_back(seq);
                        QueueEvent::Retrying {
                            job_id: job.id.clone(),
                            attempt: job.attempts,
                            error: e.to_string(),
                        }
                    }
                    Err(e) => {
                        job.status = JobStatus::Failed;
                        job.error = Some(e.to_string());
                        QueueEvent::Failed {
                            job_id: job.id.clone(),
                            attempts: job.attempts,
                            error: e.to_string(),
                        }
                    }
                }
            })
        };

        if let Some(event) = event {
            match &event {
                QueueEvent::Completed { job_id, .. } => log::info!("[QUEUE] Job {} completed", job_id),
                QueueEvent::Retrying { job_id, attempt, error } => {
                    log::warn!("[QUEUE] Job {} attempt {} failed, retrying: {}", job_id, attempt, error)
                }
                QueueEvent::Failed { job_id, attempts, error } => {
                    log::error!("[QUEUE] Job {} failed after {} attempts: {}", job_id, attempts, error)
                }
                _ => {}
            }
            self.emit(event);
        }

        self.cleanup_old_jobs();
        self.schedule();
        self.notify_if_idle();
    }

    fn notify_if_idle(&self) {
        if self.lock().is_idle() {
            self.inner.idle.notify_waiters();
        }
    }

    // ========================================================================
    // CONTROL
    // ========================================================================

    /// Stop activating jobs. Active jobs run to completion.
    pub fn pause(&self) {
        self.lock().paused = true;
        log::info!("[QUEUE] Paused");
        self.emit(QueueEvent::Paused);
        self.notify_if_idle();
    }

    pub fn resume(&self) {
        self.lock().paused = false;
        log::info!("[QUEUE] Resumed");
        self.emit(QueueEvent::Resumed);
        self.schedule();
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    /// Change the ceiling. Values outside `1..=10` are ignored with a warning.
    pub fn set_max_concurrent_jobs(&self, max: usize) -> bool {
        if !(MIN_CONCURRENT_JOBS..=MAX_CONCURRENT_JOBS).contains(&max) {
            log::warn!(
                "[QUEUE] Ignoring max_concurrent_jobs={} (must be {}..={})",
                max,
                MIN_CONCURRENT_JOBS,
                MAX_CONCURRENT_JOBS
            );
            return false;
        }
        let raised = {
            let mut state = self.lock();
            let raised = max > state.max_concurrent;
            state.max_concurrent = max;
            raised
        };
        log::info!("[QUEUE] max_concurrent_jobs set to {}", max);
        if raised {
            self.schedule();
        }
        true
    }

    // ========================================================================
    // INSPECTION
    // ========================================================================

    pub fn get_job(&self, job_id: &str) -> Option<Job> {
        let seq = job_id.parse::<u64>().ok()?;
        self.lock().jobs.get(&seq).cloned()
    }

    /// Jobs in the given status, oldest first.
    pub fn get_jobs_by_status(&self, status: JobStatus) -> Vec<Job> {
        self.lock()
            .jobs
            .values()
            .filter(|job| job.status == status)
            .cloned()
            .collect()
    }

    pub fn get_job_stats(&self) -> JobStats {
        let state = self.lock();
        let mut stats = JobStats {
            total: state.jobs.len(),
            is_paused: state.paused,
            max_concurrent_jobs: state.max_concurrent,
            ..Default::default()
        };
        for job in state.jobs.values() {
            match job.status {
                JobStatus::Waiting => stats.waiting += 1,
                JobStatus::Active => stats.active += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    // ========================================================================
    // REMOVAL
    // ========================================================================

    /// Remove a waiting or finished job. Active jobs cannot be removed.
    pub fn remove_job(&self, job_id: &str) -> bool {
        let Ok(seq) = job_id.parse::<u64>() else {
            return false;
        };
        let removed = {
            let mut state = self.lock();
            match state.jobs.get(&seq).map(|job| job.status) {
                None => false,
                Some(JobStatus::Active) => {
                    log::warn!("[QUEUE] Job {} is active and cannot be removed", job_id);
                    false
                }
                Some(_) => {
                    state.jobs.remove(&seq);
                    state.waiting.retain(|s| *s != seq);
                    true
                }
            }
        };
        if removed {
            log::info!("[QUEUE] Removed job {}", job_id);
            self.emit(QueueEvent::Removed {
                job_id: job_id.to_string(),
            });
            self.notify_if_idle();
        }
        removed
    }

    /// Drop every completed or failed job. Returns how many were removed.
    pub fn clear_completed_jobs(&self) -> usize {
        let count = {
            let mut state = self.lock();
            let before = state.jobs.len();
            state.jobs.retain(|_, job| !job.status.is_terminal());
            before - state.jobs.len()
        };
        if count > 0 {
            log::info!("[QUEUE] Cleared {} finished jobs", count);
            self.emit(QueueEvent::Cleaned { count });
        }
        count
    }

    /// Once the job table grows past the threshold, drop terminal jobs older
    /// than the retention period.
    pub fn cleanup_old_jobs(&self) -> usize {
        let count = {
            let mut state = self.lock();
            if state.jobs.len() <= self.inner.config.cleanup_threshold {
                return 0;
            }
            let cutoff = Utc::now() - self.inner.config.retention;
            let before = state.jobs.len();
            state
                .jobs
                .retain(|_, job| !(job.status.is_terminal() && job.updated_at <= cutoff));
            before - state.jobs.len()
        };
        if count > 0 {
            log::info!("[QUEUE] Cleaned up {} old jobs", count);
            self.emit(QueueEvent::Cleaned { count });
        }
        count
    }

    // ========================================================================
    // OBSERVATION
    // ========================================================================

    /// Register a lifecycle listener. Listeners run in registration order.
    pub fn on<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&QueueEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(listener)
    }

    /// Resolve once nothing is active and nothing can start: the waiting
    /// list is empty or the queue is paused.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.lock().is_idle() {
                return;
            }
            notified.await;
        }
    }
}

fn flatten_join(joined: std::result::Result<Result<JobOutput>, JoinError>) -> Result<JobOutput> {
    match joined {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(anyhow::anyhow!("job handler panicked: {}", panic_message(e.into_panic())).into()),
        Err(_) => Err(anyhow::anyhow!("job handler was cancelled").into()),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
