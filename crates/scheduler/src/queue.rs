//! The eight FIFO queues drained by the background worker
//!
//! Jobs are kept in one FIFO per (kind, priority) for render and thumbnail
//! work, and one FIFO per kind for everything else. The worker scans the
//! FIFOs in a fixed order and takes the head of the first non-empty one.
//!
//! `QueueSet` holds no lock of its own. Every method must be called with the
//! shared queue lock held (see [`crate::worker::SyncQueue`]).

use crate::job::{Job, JobId, JobKind, JobPriority};
use std::collections::VecDeque;

/// One of the eight synchronous FIFOs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueSlot {
    RenderHigh,
    ThumbnailHigh,
    RenderLow,
    Links,
    Load,
    ThumbnailLow,
    Fonts,
    Print,
}

/// Scan order, highest first.
///
/// Links and Load sit between Render-Low and Thumbnail-Low so a steady stream of
/// low priority thumbnails cannot starve an outline extraction or document load.
pub const SCAN_ORDER: [QueueSlot; 8] = [
    QueueSlot::RenderHigh,
    QueueSlot::ThumbnailHigh,
    QueueSlot::RenderLow,
    QueueSlot::Links,
    QueueSlot::Load,
    QueueSlot::ThumbnailLow,
    QueueSlot::Fonts,
    QueueSlot::Print,
];

impl QueueSlot {
    /// The FIFO a job of `kind` queued at `priority` belongs to.
    ///
    /// `priority` is ignored for kinds that have a single queue.
    pub fn for_job(kind: JobKind, priority: JobPriority) -> Self {
        match (kind, priority) {
            (JobKind::Render, JobPriority::High) => QueueSlot::RenderHigh,
            (JobKind::Render, JobPriority::Low) => QueueSlot::RenderLow,
            (JobKind::Thumbnail, JobPriority::High) => QueueSlot::ThumbnailHigh,
            (JobKind::Thumbnail, JobPriority::Low) => QueueSlot::ThumbnailLow,
            (JobKind::Load, _) => QueueSlot::Load,
            (JobKind::Links, _) => QueueSlot::Links,
            (JobKind::Fonts, _) => QueueSlot::Fonts,
            (JobKind::Print, _) => QueueSlot::Print,
        }
    }

    /// Every FIFO a job of `kind` could be sitting in.
    pub fn candidates(kind: JobKind) -> &'static [QueueSlot] {
        match kind {
            JobKind::Render => &[QueueSlot::RenderHigh, QueueSlot::RenderLow],
            JobKind::Thumbnail => &[QueueSlot::ThumbnailHigh, QueueSlot::ThumbnailLow],
            JobKind::Load => &[QueueSlot::Load],
            JobKind::Links => &[QueueSlot::Links],
            JobKind::Fonts => &[QueueSlot::Fonts],
            JobKind::Print => &[QueueSlot::Print],
        }
    }

    /// Position of this slot in [`SCAN_ORDER`] (0 is scanned first).
    pub fn rank(self) -> usize {
        self as usize
    }
}

/// Eight FIFOs scanned in [`SCAN_ORDER`].
#[derive(Debug, Default)]
pub(crate) struct QueueSet {
    queues: [VecDeque<Job>; 8],
}

impl QueueSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `job` to the tail of the FIFO selected by its kind and priority.
    pub fn push(&mut self, job: Job) -> QueueSlot {
        let slot = QueueSlot::for_job(job.kind(), job.priority);
        self.queues[slot.rank()].push_back(job);
        slot
    }

    /// Pop the head of the highest ranked non-empty FIFO.
    pub fn pop_highest_priority(&mut self) -> Option<Job> {
        SCAN_ORDER
            .iter()
            .find_map(|slot| self.queues[slot.rank()].pop_front())
    }

    /// True iff all eight FIFOs are empty.
    pub fn is_empty(&self) -> bool {
        self.queues.iter().all(VecDeque::is_empty)
    }

    /// Total number of queued jobs.
    pub fn len(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum()
    }

    /// Number of jobs queued in one FIFO.
    #[cfg(test)]
    pub fn slot_len(&self, slot: QueueSlot) -> usize {
        self.queues[slot.rank()].len()
    }

    /// Remove the job with `id` from whichever FIFO of `kind` holds it.
    ///
    /// Returns `None` if the job is not queued (already popped, finished,
    /// or never added).
    pub fn take(&mut self, id: JobId, kind: JobKind) -> Option<Job> {
        QueueSlot::candidates(kind)
            .iter()
            .find_map(|slot| Self::take_from(&mut self.queues[slot.rank()], id))
    }

    /// Move the job with `id` from `from` to the tail of `to`.
    ///
    /// Returns false if the job is not in `from`; nothing changes then.
    pub fn move_job(&mut self, id: JobId, from: QueueSlot, to: QueueSlot, priority: JobPriority) -> bool {
        match Self::take_from(&mut self.queues[from.rank()], id) {
            Some(mut job) => {
                job.priority = priority;
                self.queues[to.rank()].push_back(job);
                true
            }
            None => false,
        }
    }

    /// Empty every FIFO, returning the jobs in scan order.
    pub fn drain(&mut self) -> Vec<Job> {
        let mut jobs = Vec::with_capacity(self.len());
        for slot in SCAN_ORDER {
            jobs.extend(self.queues[slot.rank()].drain(..));
        }
        jobs
    }

    fn take_from(queue: &mut VecDeque<Job>, id: JobId) -> Option<Job> {
        let index = queue.iter().position(|job| job.id() == id)?;
        queue.remove(index)
    }
}
