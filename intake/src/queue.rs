//! Ingest queue: a bounded, blocking, FIFO hand-off of jobs from the
//! front-end to the worker pool. Implemented as N bounded per-worker
//! channels fed round-robin, which gives bounded, blocking enqueue with
//! FIFO per consumer while matching the reference lineage's own
//! per-worker channel sharding.

use crate::pool::Guard;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;

pub type JobHandle = Guard<crate::payment::Job>;

#[derive(Clone)]
pub struct IngestQueue {
    senders: std::sync::Arc<Vec<mpsc::Sender<JobHandle>>>,
    next: std::sync::Arc<AtomicUsize>,
}

impl IngestQueue {
    /// Builds the queue and the matching receivers, one pair per worker.
    pub fn new(num_workers: usize, per_worker_capacity: usize) -> (Self, Vec<mpsc::Receiver<JobHandle>>) {
        let mut senders = Vec::with_capacity(num_workers);
        let mut receivers = Vec::with_capacity(num_workers);
        for _ in 0..num_workers {
            let (tx, rx) = mpsc::channel(per_worker_capacity);
            senders.push(tx);
            receivers.push(rx);
        }
        (
            Self {
                senders: std::sync::Arc::new(senders),
                next: std::sync::Arc::new(AtomicUsize::new(0)),
            },
            receivers,
        )
    }

    /// Blocks until the chosen worker's channel has room — never drops
    /// an accepted job.
    pub async fn push(&self, job: JobHandle) {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.senders.len();
        // A send can only fail if the receiving worker task has
        // terminated (panicked or shut down); in that case the job is
        // unrecoverable locally and the error is surfaced as a log, since
        // the front-end has already committed to the 202 response by the
        // time this is called in the pipeline below.
        if self.senders[idx].send(job).await.is_err() {
            tracing::error!(worker = idx, "worker channel closed; job dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payment::Job;
    use crate::pool::Pool;
    use std::sync::Arc;

    #[tokio::test]
    async fn push_round_robins_across_workers() {
        let (queue, mut receivers) = IngestQueue::new(2, 4);
        let pool = Arc::new(Pool::new(8, Job::default));

        queue.push(pool.acquire()).await;
        queue.push(pool.acquire()).await;

        assert!(receivers[0].try_recv().is_ok());
        assert!(receivers[1].try_recv().is_ok());
    }

    #[tokio::test]
    async fn push_blocks_when_the_target_worker_channel_is_full() {
        let (queue, mut receivers) = IngestQueue::new(1, 1);
        let pool = Arc::new(Pool::new(8, Job::default));

        queue.push(pool.acquire()).await; // fills the single slot

        let blocked = tokio::time::timeout(std::time::Duration::from_millis(50), queue.push(pool.acquire())).await;
        assert!(blocked.is_err(), "push must block, not drop, when full");

        receivers[0].try_recv().unwrap(); // drain one slot
    }
}
