//! Bounded-concurrency audit job scheduling.
//!
//! Jobs are held in a single ordered set, sorted by priority weight then
//! insertion order, and dispatched while fewer than `max_concurrent` jobs
//! are running. Each job runs under a per-job deadline; deadline expiry
//! cancels the in-flight work and counts against the job's retry budget.
//! Admission fails immediately once `max_queue_size` thoughts are pending,
//! which is the engine's backpressure signal. Running jobs are never
//! preempted by higher-priority arrivals.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::types::{StructuredReview, Thought};

/// Unique identifier for a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scheduling priority. Weights order the queue; they do not preempt
/// running jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    High,
    #[default]
    Normal,
    Low,
}

impl JobPriority {
    /// Numeric scheduling weight.
    pub fn weight(&self) -> u8 {
        match self {
            Self::High => 100,
            Self::Normal => 50,
            Self::Low => 10,
        }
    }
}

/// Per-enqueue options.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Scheduling priority
    pub priority: JobPriority,
    /// Per-job deadline; falls back to the queue default
    pub timeout: Option<Duration>,
    /// Retry budget; falls back to the queue default
    pub max_retries: Option<u32>,
}

/// Queue sizing and defaults.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Jobs running at once
    pub max_concurrent: usize,
    /// Pending jobs admitted before `QueueFull`
    pub max_queue_size: usize,
    /// Default per-job deadline
    pub default_timeout: Duration,
    /// Default retry budget
    pub default_max_retries: u32,
    /// Completed jobs feeding the moving averages
    pub stats_window: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            max_queue_size: 50,
            default_timeout: Duration::from_secs(30),
            default_max_retries: 1,
            stats_window: 100,
        }
    }
}

/// Queue statistics snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub pending: usize,
    pub running: usize,
    pub completed: u64,
    pub failed: u64,
    /// Mean enqueue-to-start over the stats window, milliseconds
    pub avg_wait_ms: f64,
    /// Mean execution time over the stats window, milliseconds
    pub avg_exec_ms: f64,
    /// Running slots in use, 0..=100
    pub utilization: f64,
}

/// The unit of work the queue runs: the orchestrator installs an executor
/// that drives the judge for one thought.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn run(&self, job: &JobContext) -> Result<StructuredReview>;
}

/// Inputs the executor needs beyond the thought itself, assembled by the
/// orchestrator before admission.
#[derive(Debug, Clone, Default)]
pub struct JobPayload {
    /// Context pack for the session
    pub context_pack: String,
    /// The effective session configuration
    pub config: SessionConfig,
}

/// Execution context handed to the executor per attempt.
#[derive(Debug, Clone)]
pub struct JobContext {
    /// Job id
    pub id: JobId,
    /// The thought under audit
    pub thought: Thought,
    /// Session the thought belongs to, when known at enqueue time
    pub session_id: Option<String>,
    /// Context and configuration for the audit
    pub payload: JobPayload,
    /// 0-based attempt number
    pub attempt: u32,
}

struct QueuedJob {
    id: JobId,
    thought: Thought,
    session_id: Option<String>,
    payload: JobPayload,
    priority: JobPriority,
    seq: u64,
    created_at: Instant,
    timeout: Duration,
    retries: u32,
    max_retries: u32,
    responder: oneshot::Sender<Result<StructuredReview>>,
}

struct RingSample {
    wait_ms: f64,
    exec_ms: f64,
}

struct QueueState {
    pending: Vec<QueuedJob>,
    running: HashMap<JobId, JoinHandle<()>>,
    paused: bool,
    destroyed: bool,
    seq: u64,
    completed: u64,
    failed: u64,
    recent: VecDeque<RingSample>,
}

struct QueueInner {
    config: QueueConfig,
    executor: Arc<dyn JobExecutor>,
    state: Mutex<QueueState>,
    wakeup: Notify,
}

/// Priority-FIFO job queue with bounded concurrency, per-job timeout, and
/// bounded retry.
pub struct AuditQueue {
    inner: Arc<QueueInner>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl AuditQueue {
    /// Create a queue and start its dispatcher.
    pub fn new(config: QueueConfig, executor: Arc<dyn JobExecutor>) -> Self {
        let inner = Arc::new(QueueInner {
            config,
            executor,
            state: Mutex::new(QueueState {
                pending: Vec::new(),
                running: HashMap::new(),
                paused: false,
                destroyed: false,
                seq: 0,
                completed: 0,
                failed: 0,
                recent: VecDeque::new(),
            }),
            wakeup: Notify::new(),
        });

        let dispatcher = tokio::spawn(dispatch_loop(Arc::clone(&inner)));

        Self {
            inner,
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    /// Enqueue a thought and await its review.
    ///
    /// Fails immediately with `QueueFull` when the pending set is at
    /// capacity, and with `QueueDestroyed` if the queue is torn down while
    /// the job is pending or running. The returned future resolves exactly
    /// once.
    pub async fn enqueue(
        &self,
        thought: Thought,
        session_id: Option<String>,
        payload: JobPayload,
        options: EnqueueOptions,
    ) -> Result<StructuredReview> {
        let (tx, rx) = oneshot::channel();

        {
            let mut state = self.inner.state.lock().expect("queue lock");
            if state.destroyed {
                return Err(Error::QueueDestroyed);
            }
            if state.pending.len() >= self.inner.config.max_queue_size {
                return Err(Error::QueueFull {
                    pending: state.pending.len(),
                    max: self.inner.config.max_queue_size,
                });
            }

            state.seq += 1;
            let job = QueuedJob {
                id: JobId::new(),
                thought,
                session_id,
                payload,
                priority: options.priority,
                seq: state.seq,
                created_at: Instant::now(),
                timeout: options.timeout.unwrap_or(self.inner.config.default_timeout),
                retries: 0,
                max_retries: options
                    .max_retries
                    .unwrap_or(self.inner.config.default_max_retries),
                responder: tx,
            };
            debug!(job = %job.id, priority = ?job.priority, "job enqueued");
            state.pending.push(job);
        }
        self.inner.wakeup.notify_one();

        rx.await.unwrap_or(Err(Error::QueueDestroyed))
    }

    /// Statistics snapshot.
    pub fn stats(&self) -> QueueStats {
        let state = self.inner.state.lock().expect("queue lock");
        let samples = state.recent.len().max(1) as f64;
        QueueStats {
            pending: state.pending.len(),
            running: state.running.len(),
            completed: state.completed,
            failed: state.failed,
            avg_wait_ms: state.recent.iter().map(|s| s.wait_ms).sum::<f64>() / samples,
            avg_exec_ms: state.recent.iter().map(|s| s.exec_ms).sum::<f64>() / samples,
            utilization: state.running.len() as f64 / self.inner.config.max_concurrent as f64
                * 100.0,
        }
    }

    /// Stop dispatching; running jobs finish, pending jobs wait.
    pub fn pause(&self) {
        self.inner.state.lock().expect("queue lock").paused = true;
    }

    /// Resume dispatching.
    pub fn resume(&self) {
        self.inner.state.lock().expect("queue lock").paused = false;
        self.inner.wakeup.notify_one();
    }

    /// Drop every pending job; their futures resolve with `QueueDestroyed`.
    /// Running jobs are unaffected.
    pub fn clear(&self) {
        let drained: Vec<QueuedJob> = {
            let mut state = self.inner.state.lock().expect("queue lock");
            state.pending.drain(..).collect()
        };
        for job in drained {
            let _ = job.responder.send(Err(Error::QueueDestroyed));
        }
    }

    /// Tear the queue down: pending and running jobs are cancelled and every
    /// outstanding future resolves with `QueueDestroyed`.
    pub fn destroy(&self) {
        let (drained, running): (Vec<QueuedJob>, Vec<JoinHandle<()>>) = {
            let mut state = self.inner.state.lock().expect("queue lock");
            state.destroyed = true;
            let drained = state.pending.drain(..).collect();
            let running = state.running.drain().map(|(_, handle)| handle).collect();
            (drained, running)
        };
        for job in drained {
            let _ = job.responder.send(Err(Error::QueueDestroyed));
        }
        for handle in running {
            // Dropping the job's responder inside the aborted task resolves
            // the caller's future with QueueDestroyed.
            handle.abort();
        }
        if let Some(handle) = self.dispatcher.lock().expect("dispatcher lock").take() {
            handle.abort();
        }
        self.inner.wakeup.notify_one();
    }
}

impl Drop for AuditQueue {
    fn drop(&mut self) {
        if let Some(handle) = self.dispatcher.lock().expect("dispatcher lock").take() {
            handle.abort();
        }
    }
}

async fn dispatch_loop(inner: Arc<QueueInner>) {
    loop {
        let notified = inner.wakeup.notified();

        loop {
            let job = {
                let mut state = inner.state.lock().expect("queue lock");
                if state.destroyed {
                    return;
                }
                if state.paused || state.running.len() >= inner.config.max_concurrent {
                    None
                } else {
                    pop_next(&mut state.pending)
                }
            };

            let Some(job) = job else { break };
            let id = job.id;
            // The job waits on `ready` until its handle is registered, so it
            // cannot complete and deregister before the insert happens.
            let (ready_tx, ready_rx) = oneshot::channel::<()>();
            let handle = tokio::spawn(run_job(Arc::clone(&inner), job, ready_rx));
            {
                let mut state = inner.state.lock().expect("queue lock");
                if state.destroyed {
                    handle.abort();
                    return;
                }
                state.running.insert(id, handle);
            }
            let _ = ready_tx.send(());
        }

        notified.await;
    }
}

/// Highest priority weight first, then oldest insertion.
fn pop_next(pending: &mut Vec<QueuedJob>) -> Option<QueuedJob> {
    if pending.is_empty() {
        return None;
    }
    let mut best = 0;
    for i in 1..pending.len() {
        let (a, b) = (&pending[i], &pending[best]);
        if (a.priority.weight(), std::cmp::Reverse(a.seq))
            > (b.priority.weight(), std::cmp::Reverse(b.seq))
        {
            best = i;
        }
    }
    Some(pending.remove(best))
}

async fn run_job(inner: Arc<QueueInner>, mut job: QueuedJob, ready: oneshot::Receiver<()>) {
    // Wait for the dispatcher to register this job's handle.
    let _ = ready.await;
    let started = Instant::now();
    let wait_ms = (started - job.created_at).as_millis() as f64;

    let context = JobContext {
        id: job.id,
        thought: job.thought.clone(),
        session_id: job.session_id.clone(),
        payload: job.payload.clone(),
        attempt: job.retries,
    };

    let timeout = job.timeout;
    let outcome = match tokio::time::timeout(timeout, inner.executor.run(&context)).await {
        Ok(Ok(review)) => Ok(review),
        Ok(Err(err)) => Err(err),
        // Deadline expiry: the executor future was dropped, cancelling the
        // in-flight judge call.
        Err(_) => Err(Error::job_timeout(timeout.as_millis() as u64)),
    };
    let exec_ms = started.elapsed().as_millis() as f64;

    match outcome {
        Ok(review) => {
            let mut state = inner.state.lock().expect("queue lock");
            state.running.remove(&job.id);
            state.completed += 1;
            push_sample(&mut state, &inner.config, wait_ms, exec_ms);
            drop(state);
            let _ = job.responder.send(Ok(review));
        }
        Err(err) if err.is_retryable() && job.retries < job.max_retries => {
            warn!(job = %job.id, retries = job.retries, %err, "job failed, re-queueing");
            job.retries += 1;
            let mut state = inner.state.lock().expect("queue lock");
            state.running.remove(&job.id);
            if state.destroyed {
                drop(state);
                let _ = job.responder.send(Err(Error::QueueDestroyed));
            } else {
                // Start timestamp stays the original enqueue time; only the
                // attempt counter moves.
                state.pending.push(job);
                drop(state);
            }
        }
        Err(err) => {
            warn!(job = %job.id, %err, "job failed terminally");
            let mut state = inner.state.lock().expect("queue lock");
            state.running.remove(&job.id);
            state.failed += 1;
            push_sample(&mut state, &inner.config, wait_ms, exec_ms);
            drop(state);
            let _ = job.responder.send(Err(err));
        }
    }

    inner.wakeup.notify_one();
}

fn push_sample(state: &mut QueueState, config: &QueueConfig, wait_ms: f64, exec_ms: f64) {
    state.recent.push_back(RingSample { wait_ms, exec_ms });
    while state.recent.len() > config.stats_window {
        state.recent.pop_front();
    }
}
