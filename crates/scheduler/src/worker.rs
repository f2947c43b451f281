//! Background worker for blocking jobs.
//!
//! [`SyncQueue`] wraps the eight FIFOs of [`QueueSet`] in one mutex and one
//! wake condition. Any number of producer threads add, move and remove jobs
//! through it. A single [`SyncWorker`] thread sleeps on the condition while
//! every FIFO is empty, pops the highest priority job under the lock, and
//! runs it with the lock released so long renders never stall producers.

use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::idle::IdleScheduler;
use crate::job::{Job, JobHandle, JobMode, JobPriority, JobState};
use crate::queue::{QueueSet, QueueSlot};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

/// Callback that performs the work of a blocking job.
///
/// The worker invokes it for each job it pops, on the worker thread. It should
/// match on [`Job::job_type`] to dispatch to the kind-specific work and store
/// any result (or error) with [`Job::set_output`].
pub type JobExecutor = Arc<dyn Fn(&mut Job) + Send + Sync>;

/// Counters kept under the queue lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct QueueCounters {
    pub submitted: u64,
    pub completed: u64,
    pub removed: u64,
}

struct SyncState {
    queues: QueueSet,
    shutdown: bool,
    counters: QueueCounters,
    empty_wakeups: u64,
}

struct Shared {
    state: Mutex<SyncState>,
    wake: Condvar,
}

/// Thread-safe handle to the blocking-job queues.
///
/// Cloning is cheap; every clone refers to the same queues. Producer threads
/// use this to submit blocking work without going through the owning thread.
///
/// # Panics
///
/// Every operation panics when given a [`JobMode::NonBlocking`] job. Those
/// belong to the owning thread's dispatcher and must never reach these queues.
#[derive(Clone)]
pub struct SyncQueue {
    shared: Arc<Shared>,
}

impl SyncQueue {
    pub(crate) fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SyncState {
                    queues: QueueSet::new(),
                    shutdown: false,
                    counters: QueueCounters::default(),
                    empty_wakeups: 0,
                }),
                wake: Condvar::new(),
            }),
        }
    }

    // Queue data stays consistent across a panic: nothing runs user code
    // while holding the lock.
    fn lock(&self) -> MutexGuard<'_, SyncState> {
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a blocking job and wake the worker.
    ///
    /// Returns the job's handle. After shutdown the job is dropped and its
    /// handle reports [`JobState::Removed`].
    pub fn add(&self, mut job: Job, priority: JobPriority) -> JobHandle {
        assert_blocking(job.mode());
        let handle = job.handle();
        job.priority = priority;

        let mut state = self.lock();
        if state.shutdown {
            drop(state);
            tracing::warn!(job_id = job.id(), "job added after shutdown, dropping");
            job.status().set(JobState::Removed);
            return handle;
        }

        job.status().set(JobState::Queued);
        let slot = state.queues.push(job);
        state.counters.submitted += 1;
        self.shared.wake.notify_all();
        drop(state);

        tracing::debug!(job_id = handle.id(), ?slot, "job queued");
        handle
    }

    /// Move a queued job to the FIFO for `new_priority`.
    ///
    /// Returns false if the job is no longer queued (already running or
    /// finished), is already at `new_priority`, or is of a kind without
    /// priorities. Never races with the worker: either the job moves before the
    /// worker sees it, or the worker has popped it and nothing changes.
    pub fn update_priority(&self, handle: &JobHandle, new_priority: JobPriority) -> bool {
        assert_blocking(handle.mode());
        let kind = handle.kind();
        if !kind.has_priority() {
            return false;
        }

        let from = QueueSlot::for_job(kind, opposite(new_priority));
        let to = QueueSlot::for_job(kind, new_priority);

        let mut state = self.lock();
        let moved = state.queues.move_job(handle.id(), from, to, new_priority);
        drop(state);

        tracing::debug!(job_id = handle.id(), ?from, ?to, moved, "job priority update");
        moved
    }

    /// Take a queued job back out of the queues, returning ownership.
    ///
    /// Returns `None` if the job is running, finished, or was already removed.
    pub fn take(&self, handle: &JobHandle) -> Option<Job> {
        assert_blocking(handle.mode());

        let mut state = self.lock();
        let job = state.queues.take(handle.id(), handle.kind())?;
        state.counters.removed += 1;
        job.status().set(JobState::Removed);
        drop(state);

        tracing::debug!(job_id = handle.id(), "job removed from queue");
        Some(job)
    }

    /// Remove a queued job. Returns whether it was found.
    pub fn remove(&self, handle: &JobHandle) -> bool {
        self.take(handle).is_some()
    }

    /// Number of queued blocking jobs (not counting one being executed).
    pub fn len(&self) -> usize {
        self.lock().queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().queues.is_empty()
    }

    pub(crate) fn counters(&self) -> QueueCounters {
        self.lock().counters
    }

    /// Stop accepting work, wake the worker so it exits, and hand back every
    /// job that never ran.
    pub(crate) fn close(&self) -> Vec<Job> {
        let mut state = self.lock();
        state.shutdown = true;
        let discarded = state.queues.drain();
        state.counters.removed += discarded.len() as u64;
        self.shared.wake.notify_all();
        drop(state);

        for job in &discarded {
            job.status().set(JobState::Removed);
        }
        discarded
    }

    /// Wake the worker without queuing anything.
    #[cfg(test)]
    pub(crate) fn wake_spuriously(&self) {
        let _state = self.lock();
        self.shared.wake.notify_all();
    }

    /// Times the worker woke up and found nothing to do.
    #[cfg(test)]
    pub(crate) fn empty_wakeups(&self) -> u64 {
        self.lock().empty_wakeups
    }

    /// Block until a job is available, then pop the highest priority one.
    ///
    /// Returns `None` once the queue has been closed.
    fn wait_for_job(&self) -> Option<Job> {
        let mut state = self.lock();
        while state.queues.is_empty() && !state.shutdown {
            state = self
                .shared
                .wake
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
            if state.queues.is_empty() && !state.shutdown {
                state.empty_wakeups += 1;
                tracing::trace!("job worker woke with nothing queued");
            }
        }

        if state.shutdown {
            return None;
        }

        let job = state.queues.pop_highest_priority()?;
        // Still under the lock, so a concurrent move or remove sees it gone.
        job.start();
        Some(job)
    }

    fn record_completed(&self) {
        self.lock().counters.completed += 1;
    }
}

fn assert_blocking(mode: JobMode) {
    assert!(
        mode == JobMode::Blocking,
        "non-blocking jobs must be scheduled on the owning thread's dispatcher"
    );
}

fn opposite(priority: JobPriority) -> JobPriority {
    match priority {
        JobPriority::High => JobPriority::Low,
        JobPriority::Low => JobPriority::High,
    }
}

/// The single background thread that executes blocking jobs.
pub(crate) struct SyncWorker {
    thread: Option<JoinHandle<()>>,
}

impl SyncWorker {
    /// Spawn the worker thread.
    ///
    /// Finished hooks are posted through `idle` so they run on the owning
    /// thread, unless `config.notify_on_owner` is false.
    pub(crate) fn spawn(
        queue: SyncQueue,
        executor: JobExecutor,
        idle: Arc<dyn IdleScheduler>,
        config: &SchedulerConfig,
    ) -> Result<Self, SchedulerError> {
        let mut builder = thread::Builder::new().name(config.worker_name.clone());
        if let Some(stack_size) = config.worker_stack_size {
            builder = builder.stack_size(stack_size);
        }

        let notify_on_owner = config.notify_on_owner;
        let thread = builder.spawn(move || {
            Self::run(queue, executor, idle, notify_on_owner);
        })?;

        Ok(Self {
            thread: Some(thread),
        })
    }

    /// Main worker loop.
    fn run(
        queue: SyncQueue,
        executor: JobExecutor,
        idle: Arc<dyn IdleScheduler>,
        notify_on_owner: bool,
    ) {
        tracing::info!("job worker started");

        while let Some(mut job) = queue.wait_for_job() {
            tracing::debug!(job_id = job.id(), kind = ?job.kind(), "running job");

            execute(&executor, &mut job);
            queue.record_completed();
            notify_finished(idle.as_ref(), job, notify_on_owner);
        }

        tracing::info!("job worker stopped");
    }

    /// Wait for the worker thread to exit.
    pub(crate) fn join(mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };

        if thread.join().is_err() {
            tracing::warn!("job worker thread panicked");
        }
    }
}

fn execute(executor: &JobExecutor, job: &mut Job) {
    let result = panic::catch_unwind(AssertUnwindSafe(|| executor(job)));
    if let Err(payload) = result {
        tracing::warn!(
            job_id = job.id(),
            kind = ?job.kind(),
            "job panicked: {}",
            panic_message(payload.as_ref())
        );
    }
}

/// Hand a completed job to its finished hook.
///
/// The hook may run right here on the worker (`ImmediateIdle`, or
/// `notify_on_owner` off), so a panicking hook is caught like a panicking job.
fn notify_finished(idle: &dyn IdleScheduler, job: Job, notify_on_owner: bool) {
    let job_id = job.id();
    let result = panic::catch_unwind(AssertUnwindSafe(move || {
        if notify_on_owner {
            // The idle task owns the job from here on.
            idle.schedule_idle(Box::new(move || job.finish()));
        } else {
            job.finish();
        }
    }));
    if let Err(payload) = result {
        tracing::warn!(job_id, "finished hook panicked: {}", panic_message(payload.as_ref()));
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}
