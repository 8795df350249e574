//! Worker pools used by the server's accept loop.
//!
//! Three implementations are provided: [`NaiveThreadPool`] starts a thread
//! per task, [`SharedQueueThreadPool`] (the default of the server binary)
//! feeds a fixed set of threads from a crossbeam channel, and
//! [`RayonThreadPool`] delegates to a rayon work-stealing pool.
//!
//! A `Listen` connection occupies its worker for the lifetime of the
//! subscription; fixed-size pools must be sized for the expected number of
//! watchers plus concurrent requests.

use crate::Result;

/// a boxed task as carried by the queue based pools
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// A pool of threads that tasks can be spawned onto.
pub trait ThreadPool {
    /// creates a pool with the given number of `threads`
    fn new(threads: u32) -> Result<Self>
    where
        Self: Sized;

    /// runs `job` on one of the pool's threads
    fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static;
}

mod naive;
mod rayon_pool;
mod shared_queue;

pub use self::naive::NaiveThreadPool;
pub use self::rayon_pool::RayonThreadPool;
pub use self::shared_queue::SharedQueueThreadPool;
