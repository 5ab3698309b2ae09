//! Pending-job queue ordered by priority, FIFO among equals

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
struct QueuedJob {
    priority: u8,
    seq: u64,
    job_id: Uuid,
}

impl Ord for QueuedJob {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: lower priority number and earlier seq must compare greater
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
pub struct JobQueue {
    heap: BinaryHeap<QueuedJob>,
    next_seq: u64,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, job_id: Uuid, priority: u8) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(QueuedJob {
            priority,
            seq,
            job_id,
        });
    }

    pub fn pop(&mut self) -> Option<Uuid> {
        self.heap.pop().map(|q| q.job_id)
    }

    /// Drop a job that will no longer run
    pub fn remove(&mut self, job_id: Uuid) -> bool {
        let before = self.heap.len();
        self.heap.retain(|q| q.job_id != job_id);
        self.heap.len() != before
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_then_fifo() {
        let mut queue = JobQueue::new();
        let ids: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        for (id, priority) in ids.iter().zip([3u8, 1, 2, 1]) {
            queue.push(*id, priority);
        }

        let popped: Vec<Uuid> = std::iter::from_fn(|| queue.pop()).collect();
        assert_eq!(popped, vec![ids[1], ids[3], ids[2], ids[0]]);
    }

    #[test]
    fn test_remove() {
        let mut queue = JobQueue::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        queue.push(a, 1);
        queue.push(b, 2);
        assert!(queue.remove(a));
        assert!(!queue.remove(a));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop(), Some(b));
        assert!(queue.is_empty());
    }
}
