//! ButterPaper Job Scheduler
//!
//! Background job queue for expensive document work: page rendering,
//! thumbnails, document loading, outline (link tree) extraction, font
//! enumeration and print output.
//!
//! Blocking jobs run on a single background worker thread. They wait in eight
//! FIFOs, one per (kind, priority), scanned in a fixed order:
//! render-high, thumbnail-high, render-low, links, load, thumbnail-low,
//! fonts, print. Their finished hooks are marshaled back onto the owning
//! thread through an [`IdleScheduler`].
//!
//! Non-blocking render jobs are for backends that may only be driven from
//! the owning thread. They never touch the worker: an [`AsyncDispatcher`]
//! runs them one at a time on the owning thread and starts the next one when
//! the current job's [`AsyncCompletion`] is completed.
//!
//! # Example
//!
//! ```
//! use butterpaper_scheduler::{ImmediateIdle, Job, JobPriority, JobScheduler, JobType};
//! use std::sync::Arc;
//!
//! let executor = Arc::new(|job: &mut Job| match job.job_type() {
//!     JobType::Render { page_index, .. } => println!("rendering page {}", page_index),
//!     JobType::Load { path } => println!("loading {}", path.display()),
//!     _ => {}
//! });
//!
//! let scheduler = JobScheduler::new(executor, Arc::new(ImmediateIdle)).unwrap();
//!
//! let handle = scheduler.add(
//!     Job::new(JobType::Render {
//!         page_index: 0,
//!         zoom_level: 100,
//!         rotation: 0,
//!     }),
//!     JobPriority::Low,
//! );
//!
//! // The user scrolled to the page: promote it if it has not started yet
//! scheduler.update_priority(&handle, JobPriority::High);
//!
//! scheduler.shutdown();
//! ```

mod config;
mod dispatcher;
mod error;
mod idle;
mod job;
mod queue;
mod scheduler;
mod worker;

// Re-export public API
pub use config::{ConfigError, SchedulerConfig, DEFAULT_WORKER_NAME};
pub use dispatcher::{AsyncCompletion, AsyncDispatcher, AsyncExecutor};
pub use error::SchedulerError;
pub use idle::{IdleQueue, IdleScheduler, IdleSender, IdleTask, ImmediateIdle};
pub use job::{FinishedHook, Job, JobHandle, JobId, JobKind, JobMode, JobPriority, JobState, JobType};
pub use queue::{QueueSlot, SCAN_ORDER};
pub use scheduler::{JobScheduler, SchedulerStats};
pub use worker::{JobExecutor, SyncQueue};
