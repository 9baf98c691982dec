//! Priority queue of pending jobs.
//!
//! Three independent FIFO bands, one per [`Priority`]. `dequeue` drains the
//! highest non-empty band; within a band, insertion order is preserved. All
//! access happens inside the scheduler's single serialisation domain, so the
//! bands are plain `VecDeque`s rather than concurrent queues.

use std::collections::VecDeque;

use crate::job::{Job, JobId, Priority};

/// Multi-band FIFO of pending jobs. Unbounded; backpressure is the
/// caller's concern.
#[derive(Debug, Default)]
pub(crate) struct PriorityQueue {
    bands: [VecDeque<Job>; 3],
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place `job` at the tail of its priority band.
    pub fn enqueue(&mut self, job: Job) {
        self.bands[job.priority.band()].push_back(job);
    }

    /// Place `job` at the *front* of its priority band.
    ///
    /// Used when a stalled job is pulled off an evicted worker so it keeps
    /// its position ahead of later arrivals in the same band.
    pub fn requeue_front(&mut self, job: Job) {
        self.bands[job.priority.band()].push_front(job);
    }

    /// Remove and return the front of the highest non-empty band.
    pub fn dequeue(&mut self) -> Option<Job> {
        self.bands.iter_mut().find_map(VecDeque::pop_front)
    }

    /// Remove a specific job wherever it sits in its band.
    pub fn remove(&mut self, job_id: JobId) -> Option<Job> {
        for band in &mut self.bands {
            if let Some(pos) = band.iter().position(|job| job.id == job_id) {
                return band.remove(pos);
            }
        }
        None
    }

    /// Total number of queued jobs.
    pub fn len(&self) -> usize {
        self.bands.iter().map(VecDeque::len).sum()
    }

    /// Whether no job is queued in any band.
    pub fn is_empty(&self) -> bool {
        self.bands.iter().all(VecDeque::is_empty)
    }

    /// Number of queued jobs in one band.
    pub fn depth_of(&self, priority: Priority) -> usize {
        self.bands[priority.band()].len()
    }

    /// Drop every queued job. Used only during forced termination.
    pub fn clear(&mut self) {
        for band in &mut self.bands {
            band.clear();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::SubmitOptions;
    use tokio::sync::oneshot;
    use uuid::Uuid;

    fn job(priority: Priority) -> Job {
        let (tx, _rx) = oneshot::channel();
        Job::new(
            Uuid::now_v7(),
            "() => 1".into(),
            vec![],
            SubmitOptions::new().with_priority(priority),
            tx,
        )
    }

    #[test]
    fn empty_queue() {
        let mut queue = PriorityQueue::new();
        assert!(queue.is_empty());
        assert_eq!(queue.len(), 0);
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn high_preempts_normal_and_low() {
        let mut queue = PriorityQueue::new();
        queue.enqueue(job(Priority::Low));
        queue.enqueue(job(Priority::Normal));
        let high = job(Priority::High);
        let high_id = high.id;
        queue.enqueue(high);

        assert_eq!(queue.dequeue().expect("job").id, high_id);
    }

    #[test]
    fn fifo_within_band() {
        let mut queue = PriorityQueue::new();
        let first = job(Priority::Normal);
        let second = job(Priority::Normal);
        let (first_id, second_id) = (first.id, second.id);

        queue.enqueue(first);
        queue.enqueue(second);

        assert_eq!(queue.dequeue().unwrap().id, first_id);
        assert_eq!(queue.dequeue().unwrap().id, second_id);
    }

    #[test]
    fn requeue_front_keeps_position() {
        let mut queue = PriorityQueue::new();
        let waiting = job(Priority::Normal);
        queue.enqueue(waiting);

        let evicted = job(Priority::Normal);
        let evicted_id = evicted.id;
        queue.requeue_front(evicted);

        assert_eq!(queue.dequeue().unwrap().id, evicted_id);
    }

    #[test]
    fn depth_per_band() {
        let mut queue = PriorityQueue::new();
        queue.enqueue(job(Priority::High));
        queue.enqueue(job(Priority::Low));
        queue.enqueue(job(Priority::Low));

        assert_eq!(queue.depth_of(Priority::High), 1);
        assert_eq!(queue.depth_of(Priority::Normal), 0);
        assert_eq!(queue.depth_of(Priority::Low), 2);
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn remove_by_id() {
        let mut queue = PriorityQueue::new();
        let keep = job(Priority::Normal);
        let gone = job(Priority::Normal);
        let (keep_id, gone_id) = (keep.id, gone.id);
        queue.enqueue(keep);
        queue.enqueue(gone);

        assert_eq!(queue.remove(gone_id).expect("removed").id, gone_id);
        assert!(queue.remove(gone_id).is_none());
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.dequeue().unwrap().id, keep_id);
    }

    #[test]
    fn clear_empties_all_bands() {
        let mut queue = PriorityQueue::new();
        for priority in Priority::ALL {
            queue.enqueue(job(priority));
        }
        queue.clear();
        assert!(queue.is_empty());
    }
}
