//! The two per-process task queues.
//!
//! `inbound` holds tasks waiting to run here (self-submitted or arrived from a
//! peer); `outbound` holds tasks waiting to be sent. Both are plain FIFOs behind
//! a lock, shared by submitting threads and the progress engine.

use std::collections::VecDeque;

use dispatch_types::{Rank, TaskBuffer};
use parking_lot::Mutex;

/// One task in flight.
#[derive(Debug)]
pub struct Task {
    /// Destination on the outbound queue, originator on the inbound queue.
    pub rank: Rank,
    pub buffer: TaskBuffer,
}

#[derive(Debug, Default)]
pub struct TaskQueue {
    tasks: Mutex<VecDeque<Task>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, task: Task) {
        self.tasks.lock().push_back(task);
    }

    pub fn pop(&self) -> Option<Task> {
        self.tasks.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    /// Drop everything still queued; returns how many tasks were discarded.
    pub fn discard(&self) -> usize {
        let mut tasks = self.tasks.lock();
        let n = tasks.len();
        tasks.clear();
        n
    }
}

#[derive(Debug, Default)]
pub struct QueuePair {
    pub inbound: TaskQueue,
    pub outbound: TaskQueue,
}

impl QueuePair {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use dispatch_types::TrampolineId;

    use super::*;

    fn task(rank: Rank, marker: u8) -> Task {
        Task {
            rank,
            buffer: TaskBuffer::pack(TrampolineId(1), &[marker]).unwrap(),
        }
    }

    #[test]
    fn fifo_order() {
        let q = TaskQueue::new();
        for i in 0..5 {
            q.push(task(0, i));
        }
        for i in 0..5 {
            assert_eq!(q.pop().unwrap().buffer.args()[0], i);
        }
        assert!(q.pop().is_none());
    }

    #[test]
    fn discard_reports_count() {
        let pair = QueuePair::new();
        pair.inbound.push(task(1, 0));
        pair.outbound.push(task(2, 0));
        pair.outbound.push(task(2, 1));

        assert!(!pair.inbound.is_empty());
        assert_eq!(pair.outbound.discard(), 2);
        assert_eq!(pair.inbound.discard(), 1);
        assert!(pair.inbound.is_empty() && pair.outbound.is_empty());
    }

    #[test]
    fn concurrent_pushes_are_all_kept() {
        let q = Arc::new(TaskQueue::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let q = q.clone();
                thread::spawn(move || {
                    for i in 0..100 {
                        q.push(task(t, i));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(q.len(), 400);
    }
}
