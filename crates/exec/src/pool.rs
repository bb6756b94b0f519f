//! The OS-thread worker pool: parallel OS threads, not async tasks. A
//! thin wrapper over `threadpool::ThreadPool` that forwards
//! every submitted job's result onto a single `mpsc` channel the
//! dispatcher drains — the same job/result channel pattern used for
//! object-writer fan-in elsewhere in this codebase.

use std::sync::mpsc::{self, Receiver, Sender};

use threadpool::ThreadPool;

pub struct WorkerPool<T: Send + 'static> {
    pool: ThreadPool,
    sender: Sender<T>,
    receiver: Receiver<T>,
}

impl<T: Send + 'static> WorkerPool<T> {
    pub fn new(size: usize) -> Self {
        let (sender, receiver) = mpsc::channel();
        WorkerPool {
            pool: ThreadPool::new(size.max(1)),
            sender,
            receiver,
        }
    }

    /// Submit a job. Its return value is pushed onto the shared results
    /// channel once it completes, in whatever order jobs happen to finish.
    pub fn submit(&self, job: impl FnOnce() -> T + Send + 'static) {
        let sender = self.sender.clone();
        self.pool.execute(move || {
            let result = job();
            // The dispatcher always outlives worker threads (it joins
            // before dropping the pool), so a closed channel here would
            // indicate a dispatcher bug, not a runtime condition to
            // recover from.
            let _ = sender.send(result);
        });
    }

    /// Block until the next completed job's result is available.
    pub fn recv(&self) -> T {
        self.receiver
            .recv()
            .expect("worker pool sender dropped while a recv was pending")
    }

    pub fn active_count(&self) -> usize {
        self.pool.active_count()
    }

    pub fn queued_count(&self) -> usize {
        self.pool.queued_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submitted_jobs_complete_and_are_received() {
        let pool: WorkerPool<i32> = WorkerPool::new(2);
        for i in 0..4 {
            pool.submit(move || i * 2);
        }
        let mut results: Vec<i32> = (0..4).map(|_| pool.recv()).collect();
        results.sort();
        assert_eq!(results, vec![0, 2, 4, 6]);
    }
}
