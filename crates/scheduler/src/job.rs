//! Job data model
//!
//! A [`Job`] is the unit of work handed to the scheduler. Its kind and mode are
//! fixed when it is built; its priority only changes while it sits in a queue.
//! Ownership of the job moves through the scheduler: producer, then a queue,
//! then the execution context, then the finished hook. Callers keep a
//! [`JobHandle`] to refer to the job after it has been moved away.

use std::any::Any;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

/// Unique job identifier
pub type JobId = u64;

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

/// Hook invoked with the completed job once its work is done.
pub type FinishedHook = Box<dyn FnOnce(Job) + Send + 'static>;

/// The category of work a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    Render,
    Thumbnail,
    Load,
    Links,
    Fonts,
    Print,
}

impl JobKind {
    /// Whether High/Low priority means anything for this kind.
    ///
    /// Only interactive work (page rendering and thumbnailing) has separate
    /// high and low queues; every other kind has exactly one queue.
    pub fn has_priority(self) -> bool {
        matches!(self, JobKind::Render | JobKind::Thumbnail)
    }

    /// Whether jobs of this kind may run on the owning thread without blocking it.
    pub fn supports_non_blocking(self) -> bool {
        matches!(self, JobKind::Render)
    }
}

/// How a job is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobMode {
    /// Runs to completion on the background worker thread
    Blocking,

    /// Runs on the owning thread and signals completion later
    NonBlocking,
}

/// Job priority class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobPriority {
    High,
    Low,
}

/// Lifecycle state of a job as seen through its handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    /// Built but not yet accepted by a scheduler
    New = 0,

    /// Waiting in a queue
    Queued = 1,

    /// Popped and executing
    Running = 2,

    /// Work done; the finished hook has been handed the job
    Finished = 3,

    /// Taken out of a queue before it ran, or discarded at shutdown
    Removed = 4,
}

impl JobState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => JobState::New,
            1 => JobState::Queued,
            2 => JobState::Running,
            3 => JobState::Finished,
            _ => JobState::Removed,
        }
    }
}

/// Job type and parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobType {
    /// Render a page at a zoom level and rotation
    Render {
        page_index: u32,
        zoom_level: u32,
        rotation: u16,
    },

    /// Generate a page thumbnail
    Thumbnail {
        page_index: u32,
        width: u32,
        height: u32,
        rotation: u16,
    },

    /// Load a document from disk
    Load { path: PathBuf },

    /// Extract the document outline (link tree)
    Links,

    /// Enumerate the fonts used by the document
    Fonts,

    /// Produce print output for a range of pages (inclusive)
    Print { first_page: u32, last_page: u32 },
}

impl JobType {
    /// The kind tag of this payload.
    pub fn kind(&self) -> JobKind {
        match self {
            JobType::Render { .. } => JobKind::Render,
            JobType::Thumbnail { .. } => JobKind::Thumbnail,
            JobType::Load { .. } => JobKind::Load,
            JobType::Links => JobKind::Links,
            JobType::Fonts => JobKind::Fonts,
            JobType::Print { .. } => JobKind::Print,
        }
    }
}

/// Shared state cell between a job and its handles.
#[derive(Debug)]
pub(crate) struct StatusCell(AtomicU8);

impl StatusCell {
    fn new() -> Self {
        Self(AtomicU8::new(JobState::New as u8))
    }

    pub(crate) fn get(&self) -> JobState {
        JobState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: JobState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// A unit of work owned by exactly one container at a time.
pub struct Job {
    id: JobId,
    job_type: JobType,
    mode: JobMode,
    pub(crate) priority: JobPriority,
    status: Arc<StatusCell>,
    on_finished: Option<FinishedHook>,
    output: Option<Box<dyn Any + Send>>,
}

impl Job {
    /// Create a blocking job that runs on the background worker.
    pub fn new(job_type: JobType) -> Self {
        Self::with_mode(job_type, JobMode::Blocking)
    }

    /// Create a job with an explicit execution mode.
    ///
    /// # Panics
    ///
    /// Panics if `mode` is [`JobMode::NonBlocking`] for a kind that cannot run on
    /// the owning thread. Only render jobs may be non-blocking.
    pub fn with_mode(job_type: JobType, mode: JobMode) -> Self {
        let kind = job_type.kind();
        assert!(
            mode == JobMode::Blocking || kind.supports_non_blocking(),
            "{kind:?} jobs cannot be non-blocking"
        );

        Self {
            id: NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed),
            job_type,
            mode,
            priority: JobPriority::Low,
            status: Arc::new(StatusCell::new()),
            on_finished: None,
            output: None,
        }
    }

    /// Attach the hook that receives this job once it has finished.
    pub fn on_finished<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(Job) + Send + 'static,
    {
        self.on_finished = Some(Box::new(hook));
        self
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn kind(&self) -> JobKind {
        self.job_type.kind()
    }

    pub fn job_type(&self) -> &JobType {
        &self.job_type
    }

    pub fn mode(&self) -> JobMode {
        self.mode
    }

    /// Priority the job was last queued with.
    pub fn priority(&self) -> JobPriority {
        self.priority
    }

    pub fn state(&self) -> JobState {
        self.status.get()
    }

    /// A handle that keeps referring to this job after it is moved into a scheduler.
    pub fn handle(&self) -> JobHandle {
        JobHandle {
            id: self.id,
            kind: self.kind(),
            mode: self.mode,
            status: self.status.clone(),
        }
    }

    /// Store the result of the job's work. Errors belong here too.
    pub fn set_output<T: Any + Send>(&mut self, output: T) {
        self.output = Some(Box::new(output));
    }

    /// Take the stored result if it has type `T`.
    ///
    /// A stored value of another type is left in place.
    pub fn take_output<T: Any + Send>(&mut self) -> Option<T> {
        match self.output.take()?.downcast::<T>() {
            Ok(value) => Some(*value),
            Err(other) => {
                self.output = Some(other);
                None
            }
        }
    }

    pub fn has_output(&self) -> bool {
        self.output.is_some()
    }

    pub(crate) fn status(&self) -> &Arc<StatusCell> {
        &self.status
    }

    /// Marks the job as popped for execution.
    pub(crate) fn start(&self) {
        self.status.set(JobState::Running);
    }

    /// Marks the job finished and hands it to its finished hook.
    ///
    /// The state is set first so the hook may re-submit the job and leave it
    /// `Queued`.
    pub(crate) fn finish(mut self) {
        self.status.set(JobState::Finished);
        if let Some(hook) = self.on_finished.take() {
            hook(self);
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("job_type", &self.job_type)
            .field("mode", &self.mode)
            .field("priority", &self.priority)
            .field("state", &self.state())
            .field("has_output", &self.output.is_some())
            .finish()
    }
}

/// Identity of a job that has been handed to a scheduler.
///
/// Cheap to clone and safe to share across threads. Used to change the
/// priority of, or remove, a job the caller no longer owns.
#[derive(Clone)]
pub struct JobHandle {
    id: JobId,
    kind: JobKind,
    mode: JobMode,
    status: Arc<StatusCell>,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn mode(&self) -> JobMode {
        self.mode
    }

    pub fn state(&self) -> JobState {
        self.status.get()
    }

    pub fn is_finished(&self) -> bool {
        self.state() == JobState::Finished
    }
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("mode", &self.mode)
            .field("state", &self.state())
            .finish()
    }
}

impl PartialEq for JobHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for JobHandle {}
