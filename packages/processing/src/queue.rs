//! Job queue and worker pool.
//!
//! Submissions go onto a bounded channel and fail fast when it is full.
//! A fixed set of workers pulls from the channel and runs each job through
//! the [`Pipeline`]. Job records live in a status table behind a single
//! reader/writer lock that is never held across an await.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use audio_core::{EngineConfig, Job, JobEvent, JobId, JobMetadata, JobResult, JobStatus, MAX_WORKERS};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::cleanup::TempFiles;
use crate::error::QueueError;
use crate::pipeline::Pipeline;

/// How often completion waiters re-check the status table.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Direct status transitions, for tests and operators.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusUpdate {
    Processing,
    Complete(JobResult),
    Failed(String),
}

/// Job counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub complete: u64,
    pub failed: u64,
}

impl QueueStats {
    /// Jobs not yet in a terminal state.
    pub fn active(&self) -> u64 {
        self.pending + self.processing
    }

    /// Jobs in a terminal state.
    pub fn finished(&self) -> u64 {
        self.complete + self.failed
    }
}

struct Shared {
    config: EngineConfig,
    pipeline: Pipeline,
    /// Status table.
    jobs: RwLock<HashMap<JobId, Job>>,
    /// `None` once the queue is stopped, which closes the channel.
    sender: RwLock<Option<mpsc::Sender<Job>>>,
    receiver: tokio::sync::Mutex<mpsc::Receiver<Job>>,
    completions_tx: mpsc::Sender<JobId>,
    completions_rx: tokio::sync::Mutex<mpsc::Receiver<JobId>>,
    events: broadcast::Sender<JobEvent>,
    cancel: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Shared {
    fn broadcast(&self, event: JobEvent) {
        let _ = self.events.send(event);
    }

    /// Best effort: a full completion channel drops the notification.
    fn notify_completion(&self, job_id: JobId) {
        if let Err(mpsc::error::TrySendError::Full(_)) = self.completions_tx.try_send(job_id) {
            tracing::debug!("Completion channel full, dropped notification for {}", job_id);
        }
    }

    async fn process(&self, job: Job, worker_id: &str) {
        let job_id = job.id;

        let started = self
            .jobs
            .write()
            .get_mut(&job_id)
            .is_some_and(|j| j.start());
        if !started {
            tracing::warn!("Job {} is no longer pending, skipping and removing its source", job_id);
            let mut source = TempFiles::new();
            source.track(&job.source_path);
            drop(source);
            return;
        }

        self.broadcast(JobEvent::JobStarted {
            job_id,
            worker_id: worker_id.to_string(),
            timestamp: Utc::now(),
        });

        let clock = Instant::now();
        let outcome = self.pipeline.run(&job).await;
        let duration_ms = clock.elapsed().as_millis() as u64;

        match outcome {
            Ok(result) => {
                let applied = self
                    .jobs
                    .write()
                    .get_mut(&job_id)
                    .is_some_and(|j| j.complete(result));
                if applied {
                    tracing::info!("Job {} completed in {}ms", job_id, duration_ms);
                    self.broadcast(JobEvent::JobCompleted {
                        job_id,
                        duration_ms,
                        timestamp: Utc::now(),
                    });
                    self.pipeline.notify_completed(&job);
                }
            }
            Err(e) => {
                let error = e.to_string();
                let applied = self
                    .jobs
                    .write()
                    .get_mut(&job_id)
                    .is_some_and(|j| j.fail(error.clone()));
                if applied {
                    tracing::warn!("Job {} failed: {}", job_id, error);
                    self.broadcast(JobEvent::JobFailed {
                        job_id,
                        error,
                        timestamp: Utc::now(),
                    });
                }
            }
        }

        self.notify_completion(job_id);
    }
}

async fn worker_loop(shared: Arc<Shared>, worker_id: String) {
    tracing::info!("Starting worker: {}", worker_id);

    loop {
        let next = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => None,
            job = async { shared.receiver.lock().await.recv().await } => job,
        };
        let Some(job) = next else {
            break;
        };
        shared.process(job, &worker_id).await;
    }

    tracing::info!("Worker {} stopped", worker_id);
}

/// In-memory job queue with a fixed worker pool.
///
/// Cloning yields another handle to the same queue. Dropping the last handle
/// cancels the workers the same way [`JobQueue::stop`] does.
#[derive(Clone)]
pub struct JobQueue {
    shared: Arc<Shared>,
    _stop_on_drop: Arc<DropGuard>,
}

impl JobQueue {
    /// Create a queue. Workers do not run until [`JobQueue::start`].
    pub fn new(mut config: EngineConfig, pipeline: Pipeline) -> Self {
        config.workers = config.workers.clamp(1, MAX_WORKERS);
        config.queue_capacity = config.queue_capacity.max(1);
        config.completion_buffer = config.completion_buffer.max(1);

        let (sender, receiver) = mpsc::channel(config.queue_capacity);
        let (completions_tx, completions_rx) = mpsc::channel(config.completion_buffer);
        let (events, _) = broadcast::channel(1024);
        let cancel = CancellationToken::new();

        Self {
            _stop_on_drop: Arc::new(cancel.clone().drop_guard()),
            shared: Arc::new(Shared {
                config,
                pipeline,
                jobs: RwLock::new(HashMap::new()),
                sender: RwLock::new(Some(sender)),
                receiver: tokio::sync::Mutex::new(receiver),
                completions_tx,
                completions_rx: tokio::sync::Mutex::new(completions_rx),
                events,
                cancel,
                workers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Register a pending job and enqueue it without blocking.
    ///
    /// On [`QueueError::QueueFull`] or [`QueueError::Stopped`] no record is kept
    /// and the caller keeps ownership of `source_path`.
    pub fn submit(
        &self,
        owner_id: impl Into<String>,
        related_id: Option<String>,
        source_path: impl Into<PathBuf>,
        filename: impl Into<String>,
        metadata: JobMetadata,
    ) -> Result<Job, QueueError> {
        let mut job = Job::new(owner_id, related_id, source_path, filename, metadata);

        // Workers need this lock to start a job, so JobSubmitted always precedes JobStarted.
        let mut jobs = self.shared.jobs.write();
        while jobs.contains_key(&job.id) {
            job.id = JobId::new();
        }

        let sent = match self.shared.sender.read().as_ref() {
            Some(tx) => tx.try_send(job.clone()).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => QueueError::QueueFull {
                    capacity: self.shared.config.queue_capacity,
                },
                mpsc::error::TrySendError::Closed(_) => QueueError::Stopped,
            }),
            None => Err(QueueError::Stopped),
        };

        if let Err(e) = sent {
            tracing::warn!("Rejected job {} for {}: {}", job.id, job.owner_id, e);
            return Err(e);
        }

        jobs.insert(job.id, job.clone());
        tracing::debug!("Job {} submitted ({})", job.id, job.filename);
        self.shared.broadcast(JobEvent::JobSubmitted {
            job: job.clone(),
            timestamp: Utc::now(),
        });

        Ok(job)
    }

    /// Snapshot of a job's current state.
    pub fn get_status(&self, job_id: JobId) -> Result<Job, QueueError> {
        self.shared
            .jobs
            .read()
            .get(&job_id)
            .cloned()
            .ok_or(QueueError::NotFound(job_id))
    }

    /// Snapshots of every job in the table.
    pub fn list_jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.shared.jobs.read().values().cloned().collect();
        jobs.sort_by_key(|j| j.id.0);
        jobs
    }

    pub fn stats(&self) -> QueueStats {
        let jobs = self.shared.jobs.read();
        let mut stats = QueueStats::default();
        for job in jobs.values() {
            match job.status() {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Processing => stats.processing += 1,
                JobStatus::Complete => stats.complete += 1,
                JobStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    /// Apply a transition directly. Returns `Ok(false)` when the state machine
    /// rejects it (e.g. the job is already terminal); the job is left unchanged.
    ///
    /// A job moved out of `pending` here is skipped by the workers, which only
    /// delete its source file. The caller then owns the rest of its lifecycle.
    pub fn update_status(&self, job_id: JobId, update: StatusUpdate) -> Result<bool, QueueError> {
        let terminal = !matches!(update, StatusUpdate::Processing);
        let applied = {
            let mut jobs = self.shared.jobs.write();
            let job = jobs.get_mut(&job_id).ok_or(QueueError::NotFound(job_id))?;
            match update {
                StatusUpdate::Processing => job.start(),
                StatusUpdate::Complete(result) => job.complete(result),
                StatusUpdate::Failed(error) => job.fail(error),
            }
        };

        if applied && terminal {
            self.shared.notify_completion(job_id);
        }
        Ok(applied)
    }

    /// Subscribe to lifecycle events. Slow subscribers lag; workers never wait on them.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.shared.events.subscribe()
    }

    /// Launch the worker pool. Must be called from within a Tokio runtime.
    ///
    /// Calling it again, or after [`JobQueue::stop`], does nothing.
    pub fn start(&self) {
        let mut workers = self.shared.workers.lock();
        if !workers.is_empty() || self.shared.cancel.is_cancelled() {
            tracing::warn!("Queue already started or stopped, ignoring start");
            return;
        }

        for n in 0..self.shared.config.workers {
            let shared = Arc::clone(&self.shared);
            let worker_id = format!("worker-{}", n + 1);
            workers.push(tokio::spawn(worker_loop(shared, worker_id)));
        }

        tracing::info!(
            "Started {} workers (capacity {})",
            workers.len(),
            self.shared.config.queue_capacity
        );
    }

    /// Stop dequeuing and close the work channel.
    ///
    /// Idle workers exit; a job already mid-pipeline runs to completion or its
    /// own timeout. Jobs still in the channel stay `pending`.
    pub fn stop(&self) {
        self.shared.cancel.cancel();
        if self.shared.sender.write().take().is_some() {
            tracing::info!("Queue stopped");
        }
    }

    /// [`JobQueue::stop`], then wait for every worker to exit.
    pub async fn shutdown(&self) {
        self.stop();
        let handles = std::mem::take(&mut *self.shared.workers.lock());
        for joined in futures_util::future::join_all(handles).await {
            if let Err(e) = joined {
                tracing::warn!("Worker task ended abnormally: {}", e);
            }
        }
    }

    /// Wait until `job_id` is terminal, or `timeout` elapses.
    pub async fn wait_for_completion(&self, job_id: JobId, timeout: Duration) -> Result<Job, QueueError> {
        let mut jobs = self.wait_for_jobs(&[job_id], timeout).await?;
        jobs.pop().ok_or(QueueError::NotFound(job_id))
    }

    /// Wait until every job in `job_ids` is terminal, or `timeout` elapses.
    ///
    /// Completion notifications only wake the waiter; the status table is the
    /// source of truth, so a dropped notification just costs one poll interval.
    pub async fn wait_for_jobs(&self, job_ids: &[JobId], timeout: Duration) -> Result<Vec<Job>, QueueError> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let snapshot = job_ids
                .iter()
                .map(|id| self.get_status(*id))
                .collect::<Result<Vec<_>, _>>()?;
            let pending = snapshot.iter().filter(|j| !j.status().is_terminal()).count();
            if pending == 0 {
                return Ok(snapshot);
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Err(QueueError::WaitTimeout { pending });
            }

            let slice = (deadline - now).min(WAIT_POLL_INTERVAL);
            let _ = tokio::time::timeout(slice, async {
                self.shared.completions_rx.lock().await.recv().await
            })
            .await;
        }
    }
}
