use super::ThreadPool;
use crate::Result;
use std::thread;

/// A "pool" that is not actually a pool: every spawn starts a fresh thread.
/// Useful as a baseline and in tests; the thread count is ignored.
pub struct NaiveThreadPool;

impl ThreadPool for NaiveThreadPool {
    fn new(_threads: u32) -> Result<NaiveThreadPool> {
        Ok(NaiveThreadPool)
    }

    fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        thread::spawn(job);
    }
}
