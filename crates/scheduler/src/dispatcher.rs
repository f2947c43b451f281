//! Owning-thread dispatcher for non-blocking render jobs
//!
//! Some rendering backends may only be called from the thread that owns the
//! UI, and must not block it. Jobs for those backends never reach the
//! background worker. Instead they wait in one of two FIFOs here and run one
//! at a time on the owning thread: the executor starts the work and hands back
//! an [`AsyncCompletion`], and completing it dispatches the next job.
//!
//! Nothing here is `Send`. The dispatcher, its completions and its executor
//! stay on the owning thread, so the FIFOs and the busy flag need no lock.

use crate::job::{Job, JobHandle, JobKind, JobMode, JobPriority, JobState};
use crate::worker::QueueCounters;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};

/// Starts the work of a non-blocking job.
///
/// Must return promptly. The work reports that it has finished by calling
/// [`AsyncCompletion::complete`], possibly much later from an owning-thread
/// event callback, or immediately if it finished synchronously.
pub type AsyncExecutor = Rc<dyn Fn(AsyncCompletion)>;

struct AsyncState {
    high: VecDeque<Job>,
    low: VecDeque<Job>,
    busy: bool,
    dispatching: bool,
    counters: QueueCounters,
}

impl AsyncState {
    fn queue_mut(&mut self, priority: JobPriority) -> &mut VecDeque<Job> {
        match priority {
            JobPriority::High => &mut self.high,
            JobPriority::Low => &mut self.low,
        }
    }
}

struct Inner {
    state: RefCell<AsyncState>,
    executor: AsyncExecutor,
}

/// Runs non-blocking render jobs on the owning thread, one at a time.
///
/// Cloning yields another handle to the same dispatcher.
///
/// # Panics
///
/// Every operation panics when handed anything other than a non-blocking
/// render job.
#[derive(Clone)]
pub struct AsyncDispatcher {
    inner: Rc<Inner>,
}

impl AsyncDispatcher {
    /// Create an idle dispatcher.
    ///
    /// The executor must not own a clone of this dispatcher, or neither is
    /// ever freed.
    pub fn new(executor: AsyncExecutor) -> Self {
        Self {
            inner: Rc::new(Inner {
                state: RefCell::new(AsyncState {
                    high: VecDeque::new(),
                    low: VecDeque::new(),
                    busy: false,
                    dispatching: false,
                    counters: QueueCounters::default(),
                }),
                executor,
            }),
        }
    }

    /// Queue a job and start it right away if nothing is running.
    pub fn submit(&self, mut job: Job, priority: JobPriority) -> JobHandle {
        assert_supported(job.kind(), job.mode());
        let handle = job.handle();
        job.priority = priority;
        job.status().set(JobState::Queued);

        let busy = {
            let mut state = self.inner.state.borrow_mut();
            state.queue_mut(priority).push_back(job);
            state.counters.submitted += 1;
            state.busy
        };

        tracing::debug!(job_id = handle.id(), ?priority, busy, "async job queued");
        if !busy {
            Self::run_next(&self.inner);
        }
        handle
    }

    /// Take a queued job back out, returning ownership.
    ///
    /// Returns `None` if the job is running or already done.
    pub fn take(&self, handle: &JobHandle) -> Option<Job> {
        assert_supported(handle.kind(), handle.mode());

        let mut state = self.inner.state.borrow_mut();
        let job = match take_from(&mut state.high, handle) {
            Some(job) => job,
            None => take_from(&mut state.low, handle)?,
        };
        state.counters.removed += 1;
        drop(state);

        job.status().set(JobState::Removed);
        tracing::debug!(job_id = handle.id(), "async job removed");
        Some(job)
    }

    /// Remove a queued job. Returns whether it was found.
    pub fn remove(&self, handle: &JobHandle) -> bool {
        self.take(handle).is_some()
    }

    /// Move a queued job to the FIFO for `new_priority`.
    ///
    /// Returns false if the job is running, done, or already at `new_priority`.
    pub fn update_priority(&self, handle: &JobHandle, new_priority: JobPriority) -> bool {
        assert_supported(handle.kind(), handle.mode());

        let old_priority = match new_priority {
            JobPriority::High => JobPriority::Low,
            JobPriority::Low => JobPriority::High,
        };

        let mut state = self.inner.state.borrow_mut();
        let Some(mut job) = take_from(state.queue_mut(old_priority), handle) else {
            return false;
        };
        job.priority = new_priority;
        state.queue_mut(new_priority).push_back(job);
        drop(state);

        tracing::debug!(job_id = handle.id(), ?new_priority, "async job priority updated");
        true
    }

    /// Whether a job is currently running.
    pub fn is_busy(&self) -> bool {
        self.inner.state.borrow().busy
    }

    /// Number of jobs waiting to run.
    pub fn len(&self) -> usize {
        let state = self.inner.state.borrow();
        state.high.len() + state.low.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn counters(&self) -> QueueCounters {
        self.inner.state.borrow().counters
    }

    /// Start queued jobs until one is left running or the FIFOs are empty.
    ///
    /// No borrow of the state is held while the executor runs, so the
    /// executor may submit, remove, or complete synchronously. A call made
    /// from inside the executor returns at once and the outer loop picks up
    /// whatever it queued or freed, so synchronous completions never nest.
    fn run_next(inner: &Rc<Inner>) {
        {
            let mut state = inner.state.borrow_mut();
            if state.dispatching {
                return;
            }
            state.dispatching = true;
        }
        let _dispatching = DispatchingGuard(inner);

        loop {
            let job = {
                let mut state = inner.state.borrow_mut();
                if state.busy {
                    return;
                }
                let next = match state.high.pop_front() {
                    Some(job) => Some(job),
                    None => state.low.pop_front(),
                };
                let Some(job) = next else {
                    return;
                };
                state.busy = true;
                job
            };

            job.start();
            tracing::debug!(job_id = job.id(), "async job dispatched");

            let completion = AsyncCompletion {
                dispatcher: Rc::downgrade(inner),
                job: Some(job),
            };
            (inner.executor)(completion);
        }
    }
}

impl fmt::Debug for AsyncDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("AsyncDispatcher")
            .field("high", &state.high.len())
            .field("low", &state.low.len())
            .field("busy", &state.busy)
            .field("dispatching", &state.dispatching)
            .finish()
    }
}

/// Clears the dispatching flag on every exit from `run_next`, including an
/// executor panic.
struct DispatchingGuard<'a>(&'a Inner);

impl Drop for DispatchingGuard<'_> {
    fn drop(&mut self) {
        self.0.state.borrow_mut().dispatching = false;
    }
}

fn take_from(queue: &mut VecDeque<Job>, handle: &JobHandle) -> Option<Job> {
    let index = queue.iter().position(|job| job.id() == handle.id())?;
    queue.remove(index)
}

fn assert_supported(kind: JobKind, mode: JobMode) {
    assert!(
        kind == JobKind::Render && mode == JobMode::NonBlocking,
        "async dispatcher only runs non-blocking render jobs, got {kind:?} ({mode:?})"
    );
}

/// The running job of an [`AsyncDispatcher`], and the means to finish it.
///
/// Call [`complete`](Self::complete) exactly when the asynchronous work has
/// truly finished. Dropping a completion without completing it leaves the
/// dispatcher busy forever.
pub struct AsyncCompletion {
    dispatcher: Weak<Inner>,
    job: Option<Job>,
}

impl AsyncCompletion {
    pub fn job(&self) -> &Job {
        self.job.as_ref().expect("job present until completed")
    }

    pub fn job_mut(&mut self) -> &mut Job {
        self.job.as_mut().expect("job present until completed")
    }

    /// Deliver the job's finished notification and dispatch the next job.
    pub fn complete(mut self) {
        let Some(job) = self.job.take() else {
            return;
        };
        let id = job.id();
        job.finish();

        let Some(inner) = self.dispatcher.upgrade() else {
            return;
        };
        {
            let mut state = inner.state.borrow_mut();
            state.busy = false;
            state.counters.completed += 1;
        }
        tracing::debug!(job_id = id, "async job completed");

        AsyncDispatcher::run_next(&inner);
    }
}

impl Drop for AsyncCompletion {
    fn drop(&mut self) {
        if let Some(job) = &self.job {
            tracing::warn!(
                job_id = job.id(),
                "async job dropped without completing, dispatcher stalled"
            );
        }
    }
}

impl fmt::Debug for AsyncCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncCompletion").field("job", &self.job).finish()
    }
}
