//! Fan-out of per-particle work.
//!
//! Every iteration maps one unit of work over the slot indices `0..n` and waits
//! for all of them. Results come back in slot order whichever executor runs them.

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::Arc;

use crate::error::{AbcError, Result};

/// The "map a function over N indices" capability.
pub trait ParallelMap {
    /// Runs `work(i)` for every `i` in `0..n` and returns the results ordered by `i`.
    fn map<T, F>(&self, n: usize, work: F) -> Vec<T>
    where
        F: Fn(usize) -> T + Sync + Send,
        T: Send;

    /// Releases worker resources, if any. Must be safe to call repeatedly.
    fn close(&mut self) {}
}

/// Built-in executors.
#[derive(Debug, Default)]
pub enum Executor {
    /// Runs every slot on the calling thread.
    #[default]
    Sequential,
    /// A fixed-size worker pool owned by the sampler.
    Pool(ThreadPool),
    /// A pool owned by somebody else. Closing only drops this handle.
    Shared(Arc<ThreadPool>),
}

impl Executor {
    /// One thread gives [`Executor::Sequential`]; more builds an owned pool.
    pub fn with_threads(threads: usize) -> Result<Self> {
        match threads {
            0 => Err(AbcError::InvalidConfig(
                "number of threads must be at least 1".to_string(),
            )),
            1 => Ok(Executor::Sequential),
            n => ThreadPoolBuilder::new()
                .num_threads(n)
                .thread_name(|i| format!("abc-pmc-worker-{i}"))
                .build()
                .map(Executor::Pool)
                .map_err(|e| AbcError::InvalidConfig(format!("failed to start worker pool: {e}"))),
        }
    }

    pub fn shared(pool: Arc<ThreadPool>) -> Self {
        Executor::Shared(pool)
    }

    pub fn num_threads(&self) -> usize {
        match self {
            Executor::Sequential => 1,
            Executor::Pool(pool) => pool.current_num_threads(),
            Executor::Shared(pool) => pool.current_num_threads(),
        }
    }
}

fn par_map<T, F>(pool: &ThreadPool, n: usize, work: F) -> Vec<T>
where
    F: Fn(usize) -> T + Sync + Send,
    T: Send,
{
    pool.install(|| (0..n).into_par_iter().map(&work).collect())
}

impl ParallelMap for Executor {
    fn map<T, F>(&self, n: usize, work: F) -> Vec<T>
    where
        F: Fn(usize) -> T + Sync + Send,
        T: Send,
    {
        match self {
            Executor::Sequential => (0..n).map(work).collect(),
            Executor::Pool(pool) => par_map(pool, n, work),
            Executor::Shared(pool) => par_map(pool, n, work),
        }
    }

    fn close(&mut self) {
        match std::mem::take(self) {
            Executor::Sequential => {}
            Executor::Pool(pool) => {
                log::debug!("releasing {} worker threads", pool.current_num_threads());
                drop(pool);
            }
            Executor::Shared(pool) => {
                log::debug!(
                    "dropping handle to shared pool ({} other handles remain)",
                    Arc::strong_count(&pool) - 1
                );
            }
        }
    }
}
