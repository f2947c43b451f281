//! Job scheduler implementation
//!
//! The public façade over both execution domains. Blocking jobs go to the
//! [`SyncQueue`] drained by the background worker; non-blocking render jobs
//! go to the owning thread's [`AsyncDispatcher`]. The job's mode decides the
//! domain once, at `add`, and every later operation follows it there.

use crate::config::SchedulerConfig;
use crate::dispatcher::{AsyncDispatcher, AsyncExecutor};
use crate::error::SchedulerError;
use crate::idle::IdleScheduler;
use crate::job::{Job, JobHandle, JobMode, JobPriority};
use crate::worker::{JobExecutor, QueueCounters, SyncQueue, SyncWorker};
use std::sync::Arc;

/// Job scheduler statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Total jobs accepted
    pub jobs_submitted: u64,

    /// Total jobs whose work has run
    pub jobs_completed: u64,

    /// Total jobs removed before running (including those discarded at shutdown)
    pub jobs_removed: u64,

    /// Jobs currently waiting in any queue
    pub queue_size: usize,
}

impl SchedulerStats {
    /// Get the number of jobs accepted but not yet completed or removed
    pub fn pending_jobs(&self) -> u64 {
        self.jobs_submitted - self.jobs_completed - self.jobs_removed
    }

    fn add_counters(&mut self, counters: QueueCounters) {
        self.jobs_submitted += counters.submitted;
        self.jobs_completed += counters.completed;
        self.jobs_removed += counters.removed;
    }
}

/// Job scheduler with a background worker and an owning-thread dispatcher
///
/// Created on, and owned by, the owning (UI) thread; it is not `Send`.
/// Other threads submit blocking work through [`JobScheduler::sync_queue`].
///
/// # Example
///
/// ```
/// use butterpaper_scheduler::{IdleQueue, Job, JobPriority, JobScheduler, JobType};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let idle = IdleQueue::new();
/// let executor = Arc::new(|job: &mut Job| {
///     if let JobType::Fonts = job.job_type() {
///         job.set_output(vec!["Helvetica".to_string()]);
///     }
/// });
///
/// let scheduler = JobScheduler::new(executor, Arc::new(idle.sender())).unwrap();
///
/// let job = Job::new(JobType::Fonts).on_finished(|mut job| {
///     let fonts: Vec<String> = job.take_output().unwrap_or_default();
///     println!("document uses {} fonts", fonts.len());
/// });
/// let handle = scheduler.add(job, JobPriority::Low);
///
/// // The finished hook is delivered through the owning thread's idle queue
/// while !handle.is_finished() {
///     idle.run_one_timeout(Duration::from_millis(50));
/// }
///
/// scheduler.shutdown();
/// ```
pub struct JobScheduler {
    sync_queue: SyncQueue,
    worker: Option<SyncWorker>,
    dispatcher: Option<AsyncDispatcher>,
}

impl JobScheduler {
    /// Start the background worker with the default configuration.
    ///
    /// `executor` runs blocking jobs on the worker; `idle` carries their
    /// finished notifications back to the owning thread.
    pub fn new(executor: JobExecutor, idle: Arc<dyn IdleScheduler>) -> Result<Self, SchedulerError> {
        Self::with_config(SchedulerConfig::default(), executor, idle)
    }

    /// Start the background worker configured from environment variables.
    pub fn from_env(executor: JobExecutor, idle: Arc<dyn IdleScheduler>) -> Result<Self, SchedulerError> {
        let config = SchedulerConfig::from_env()?;
        Self::with_config(config, executor, idle)
    }

    /// Start the background worker with an explicit configuration.
    pub fn with_config(
        config: SchedulerConfig,
        executor: JobExecutor,
        idle: Arc<dyn IdleScheduler>,
    ) -> Result<Self, SchedulerError> {
        let sync_queue = SyncQueue::new();
        let worker = SyncWorker::spawn(sync_queue.clone(), executor, idle, &config)?;

        tracing::debug!(worker = %config.worker_name, "job scheduler initialized");
        Ok(Self {
            sync_queue,
            worker: Some(worker),
            dispatcher: None,
        })
    }

    /// Enable non-blocking render jobs, run on the owning thread by `executor`.
    pub fn with_async_executor(mut self, executor: AsyncExecutor) -> Self {
        self.dispatcher = Some(AsyncDispatcher::new(executor));
        self
    }

    /// Queue a job.
    ///
    /// Blocking jobs wake the worker; a non-blocking job starts immediately
    /// if the owning-thread dispatcher is idle.
    ///
    /// # Panics
    ///
    /// Panics when given a non-blocking job and no async executor was set.
    pub fn add(&self, job: Job, priority: JobPriority) -> JobHandle {
        match job.mode() {
            JobMode::Blocking => self.sync_queue.add(job, priority),
            JobMode::NonBlocking => self.dispatcher().submit(job, priority),
        }
    }

    /// Move a queued job to another priority class.
    ///
    /// Returns false when the job is not queued any more, already has
    /// `new_priority`, or is of a kind without priorities.
    pub fn update_priority(&self, handle: &JobHandle, new_priority: JobPriority) -> bool {
        match handle.mode() {
            JobMode::Blocking => self.sync_queue.update_priority(handle, new_priority),
            JobMode::NonBlocking => self.dispatcher().update_priority(handle, new_priority),
        }
    }

    /// Take a queued job back, returning ownership so it can be re-submitted.
    ///
    /// A running job cannot be taken; its work always runs to completion.
    pub fn take(&self, handle: &JobHandle) -> Option<Job> {
        match handle.mode() {
            JobMode::Blocking => self.sync_queue.take(handle),
            JobMode::NonBlocking => self.dispatcher().take(handle),
        }
    }

    /// Remove a queued job. Returns whether it was found.
    pub fn remove(&self, handle: &JobHandle) -> bool {
        self.take(handle).is_some()
    }

    /// Thread-safe handle for submitting blocking jobs from other threads.
    pub fn sync_queue(&self) -> SyncQueue {
        self.sync_queue.clone()
    }

    /// The owning-thread dispatcher, if an async executor was set.
    pub fn async_dispatcher(&self) -> Option<&AsyncDispatcher> {
        self.dispatcher.as_ref()
    }

    /// Get the number of jobs waiting in any queue
    pub fn pending_jobs(&self) -> usize {
        self.sync_queue.len() + self.dispatcher.as_ref().map_or(0, AsyncDispatcher::len)
    }

    /// Check if any job is waiting in a queue
    pub fn has_pending_jobs(&self) -> bool {
        self.pending_jobs() > 0
    }

    /// Get scheduler statistics over both domains
    pub fn stats(&self) -> SchedulerStats {
        let mut stats = SchedulerStats::default();
        stats.add_counters(self.sync_queue.counters());
        if let Some(dispatcher) = &self.dispatcher {
            stats.add_counters(dispatcher.counters());
        }
        stats.queue_size = self.pending_jobs();
        stats
    }

    /// Stop the worker after its current job and discard queued blocking jobs.
    ///
    /// Blocks until the worker thread has exited. Dropping the scheduler does
    /// the same.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        let discarded = self.sync_queue.close();
        if !discarded.is_empty() {
            tracing::warn!(count = discarded.len(), "discarding queued jobs at shutdown");
        }
        worker.join();
    }

    fn dispatcher(&self) -> &AsyncDispatcher {
        match &self.dispatcher {
            Some(dispatcher) => dispatcher,
            None => panic!("non-blocking job scheduled but no async executor was set"),
        }
    }
}

impl Drop for JobScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
