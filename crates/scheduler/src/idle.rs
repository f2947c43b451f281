//! Marshaling work back onto the owning thread
//!
//! Blocking jobs finish on the background worker, but their finished hooks
//! may touch UI state. The worker therefore never calls the hook itself: it
//! posts a task through an [`IdleScheduler`], and the owning thread runs that
//! task from its event loop when it has nothing more urgent to do.
//!
//! [`IdleQueue`] is a channel-backed implementation for owners that pump
//! their own loop (and for tests). UI toolkits plug in their own idle source
//! by implementing [`IdleScheduler`].

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

/// A task to run once on the owning thread.
pub type IdleTask = Box<dyn FnOnce() + Send + 'static>;

/// Schedules a task to run once on the owning thread, after other pending
/// owning-thread work.
pub trait IdleScheduler: Send + Sync {
    fn schedule_idle(&self, task: IdleTask);
}

/// Sending side of an [`IdleQueue`]. Shareable across threads.
#[derive(Clone)]
pub struct IdleSender {
    tx: Sender<IdleTask>,
}

impl IdleScheduler for IdleSender {
    fn schedule_idle(&self, task: IdleTask) {
        // The owner is gone; there is nobody left to notify.
        if self.tx.send(task).is_err() {
            tracing::debug!("idle queue closed, dropping task");
        }
    }
}

/// Tasks posted for the owning thread, drained by the owner.
///
/// # Example
///
/// ```
/// use butterpaper_scheduler::{IdleQueue, IdleScheduler};
///
/// let idle = IdleQueue::new();
/// let sender = idle.sender();
///
/// std::thread::spawn(move || {
///     sender.schedule_idle(Box::new(|| println!("back on the owning thread")));
/// })
/// .join()
/// .unwrap();
///
/// assert_eq!(idle.run_pending(), 1);
/// ```
pub struct IdleQueue {
    tx: Sender<IdleTask>,
    rx: Receiver<IdleTask>,
}

impl IdleQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self { tx, rx }
    }

    /// A sender to hand to the scheduler or any other thread.
    pub fn sender(&self) -> IdleSender {
        IdleSender {
            tx: self.tx.clone(),
        }
    }

    /// Run every task posted so far without waiting. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.rx.try_recv() {
            task();
            ran += 1;
        }
        ran
    }

    /// Wait up to `timeout` for one task and run it.
    ///
    /// Returns false if nothing arrived in time.
    pub fn run_one_timeout(&self, timeout: Duration) -> bool {
        match self.rx.recv_timeout(timeout) {
            Ok(task) => {
                task();
                true
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }
}

impl Default for IdleQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs tasks immediately on whichever thread posts them.
///
/// For owners without an event loop. Finished hooks then run on the worker.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImmediateIdle;

impl IdleScheduler for ImmediateIdle {
    fn schedule_idle(&self, task: IdleTask) {
        task();
    }
}
