use super::{Job, ThreadPool};
use crate::Result;
use crossbeam::channel::{self, Receiver, Sender};
use std::thread;
use tracing::{debug, error};

/// A thread pool fed from a shared job queue.
///
/// The queue is a crossbeam MPMC [`channel`] used single-producer,
/// multiple-consumer: the pool sends, the worker threads receive. A worker
/// that panics while running a job is replaced from its `Drop` handler, so a
/// panicking task does not shrink the pool.
///
/// [`channel`]: https://docs.rs/crossbeam/0.8.1/crossbeam/channel/index.html
pub struct SharedQueueThreadPool {
    tx: Sender<Job>,
}

impl ThreadPool for SharedQueueThreadPool {
    fn new(threads: u32) -> Result<SharedQueueThreadPool> {
        let (tx, rx) = channel::unbounded::<Job>();
        for _ in 0..threads {
            let worker = Worker(rx.clone());
            thread::Builder::new().spawn(move || run_jobs(worker))?;
        }
        Ok(SharedQueueThreadPool { tx })
    }

    /// # Panics
    /// panics if every worker thread has died and could not be respawned
    fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.tx
            .send(Box::new(job))
            .expect("there are no threads in the pool");
    }
}

// the receiving half held by one worker; replaces its thread on panic
#[derive(Clone)]
struct Worker(Receiver<Job>);

impl Drop for Worker {
    fn drop(&mut self) {
        if thread::panicking() {
            debug!("worker panicked, spawning a replacement");
            let worker = self.clone();
            if let Err(e) = thread::Builder::new().spawn(move || run_jobs(worker)) {
                error!("failed to respawn worker thread: {}", e);
            }
        }
    }
}

fn run_jobs(worker: Worker) {
    loop {
        match worker.0.recv() {
            Ok(job) => job(),
            Err(_) => {
                debug!("worker exiting, the pool was dropped");
                break;
            }
        }
    }
}
