//! Per-printer priority queue
//!
//! Lower priority number runs first; equal priorities run in arrival order.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use shared::models::PrintJob;

#[derive(Debug)]
struct QueuedJob {
    priority: u8,
    seq: u64,
    job: PrintJob,
}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedJob {}

impl Ord for QueuedJob {
    // BinaryHeap is a max-heap; invert both keys
    fn cmp(&self, other: &Self) -> Ordering {
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

    pub fn push(&mut self, job: PrintJob) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(QueuedJob {
            priority: job.priority,
            seq,
            job,
        });
    }

    pub fn pop(&mut self) -> Option<PrintJob> {
        self.heap.pop().map(|q| q.job)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Remove every job, in execution order
    pub fn drain_ordered(&mut self) -> Vec<PrintJob> {
        let mut jobs = Vec::with_capacity(self.heap.len());
        while let Some(job) = self.pop() {
            jobs.push(job);
        }
        jobs
    }

    /// Queued jobs in execution order, without removing them
    pub fn snapshot(&self) -> Vec<PrintJob> {
        let mut items: Vec<&QueuedJob> = self.heap.iter().collect();
        items.sort_by(|a, b| b.cmp(a));
        items.into_iter().map(|q| q.job.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::{JobPayload, JobSource, JobType, PrintJobRequest};

    fn job(id: &str, priority: u8) -> PrintJob {
        PrintJob::from_request(
            PrintJobRequest {
                id: Some(id.into()),
                job_type: JobType::Receipt,
                printer_id: Some("p".into()),
                printer_name: None,
                payload: JobPayload::text("x"),
                priority,
            },
            JobSource::Http,
        )
    }

    #[test]
    fn test_priority_then_fifo() {
        let mut q = JobQueue::new();
        q.push(job("a", 5));
        q.push(job("b", 1));
        q.push(job("c", 5));
        q.push(job("d", 0));
        q.push(job("e", 1));

        let order: Vec<_> = q.snapshot().into_iter().map(|j| j.id).collect();
        assert_eq!(order, vec!["d", "b", "e", "a", "c"]);

        let popped: Vec<_> = q.drain_ordered().into_iter().map(|j| j.id).collect();
        assert_eq!(popped, order);
        assert!(q.is_empty());
    }
}
