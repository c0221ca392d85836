//! WorkerPool: a fixed number of worker threads pull `TagTask`s off a
//! bounded submission queue and push outcomes onto a results channel in
//! completion order. `Submit` blocks once the queue reaches its high-water
//! mark (backpressure on the scheduler); `Close` stops accepting new work and
//! drains whatever's left.
//!
//! Workers are spawned once and pull from a shared queue for the life of the
//! job, rather than per-chunk, so a fast tag doesn't wait on a slow sibling
//! in the same chunk before the next tag starts.

use std::sync::mpsc::{self, Receiver, RecvError, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Default high-water mark for the submission queue, expressed as a
/// multiplier of worker count (bounded, default 2x worker count).
pub const DEFAULT_QUEUE_MULTIPLIER: usize = 2;

/// A long-lived pool of `workers` threads, each running `handler` against
/// jobs pulled from a bounded queue.
pub struct WorkerPool<J, R> {
    job_tx: Option<SyncSender<J>>,
    result_rx: Receiver<R>,
    handles: Vec<JoinHandle<()>>,
}

impl<J, R> WorkerPool<J, R>
where
    J: Send + 'static,
    R: Send + 'static,
{
    /// Spawn `workers` threads sharing a submission queue bounded to
    /// `workers * DEFAULT_QUEUE_MULTIPLIER` in-flight jobs.
    pub fn new<F>(workers: usize, handler: F) -> Self
    where
        F: Fn(J) -> R + Send + Sync + 'static,
    {
        Self::with_queue_capacity(workers, workers.max(1) * DEFAULT_QUEUE_MULTIPLIER, handler)
    }

    pub fn with_queue_capacity<F>(workers: usize, queue_capacity: usize, handler: F) -> Self
    where
        F: Fn(J) -> R + Send + Sync + 'static,
    {
        let workers = workers.max(1);
        let (job_tx, job_rx) = mpsc::sync_channel::<J>(queue_capacity.max(1));
        let job_rx = Arc::new(std::sync::Mutex::new(job_rx));
        let (result_tx, result_rx) = mpsc::channel::<R>();
        let handler = Arc::new(handler);

        let handles = (0..workers)
            .map(|_| {
                let job_rx = Arc::clone(&job_rx);
                let result_tx = result_tx.clone();
                let handler = Arc::clone(&handler);
                thread::spawn(move || {
                    loop {
                        let next: Result<J, RecvError> = {
                            let rx = job_rx.lock().expect("worker pool queue mutex poisoned");
                            rx.recv()
                        };
                        match next {
                            Ok(job) => {
                                let outcome = handler(job);
                                if result_tx.send(outcome).is_err() {
                                    break;
                                }
                            }
                            Err(_) => break, // sender dropped, queue drained: shut down
                        }
                    }
                })
            })
            .collect();

        Self { job_tx: Some(job_tx), result_rx, handles }
    }

    /// Enqueue a job. Blocks once the queue is at its high-water mark
    /// (backpressure), unblocking as workers drain it.
    ///
    /// # Panics
    /// Panics if called after [`WorkerPool::close`] — the scheduler only
    /// ever submits before closing, never the reverse.
    pub fn submit(&self, job: J) {
        self.job_tx
            .as_ref()
            .expect("submit called after close")
            .send(job)
            .expect("worker pool workers exited before queue drained");
    }

    /// Block for the next completed outcome, in whatever order workers
    /// finish (not submission order). Returns `None` once every worker has
    /// exited and no more results are coming — i.e. after `close` has been
    /// called and the queue has fully drained.
    pub fn recv(&self) -> Option<R> {
        self.result_rx.recv().ok()
    }

    /// Stop accepting new submissions and join every worker thread. Safe to
    /// call once the scheduler has submitted everything for this job; any
    /// remaining queued jobs still run to completion before workers exit.
    pub fn close(mut self) {
        self.job_tx.take();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}
