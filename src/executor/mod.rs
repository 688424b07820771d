//! Executors that run producers off the caller's thread
//!
//! The fetcher consumes a single capability: submit a unit of work, failing
//! synchronously with [`Rejected`] when it cannot be accepted. [`ThreadPool`]
//! is the bounded pool used by default; [`TokioExecutor`] hands work to a tokio
//! runtime's blocking pool.

use crate::config::PoolConfig;
use crate::error::Rejected;
use std::sync::{Arc, OnceLock};
use tokio::runtime::Handle;

mod pool;

pub use pool::ThreadPool;

/// A unit of work submitted to an [`Executor`]
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Something that can run jobs on threads other than the caller's
pub trait Executor: Send + Sync {
    /// Accept `job` for eventual execution or reject it immediately
    fn execute(&self, job: Job) -> Result<(), Rejected>;
}

impl<E: Executor + ?Sized> Executor for &E {
    fn execute(&self, job: Job) -> Result<(), Rejected> {
        (**self).execute(job)
    }
}

impl<E: Executor + ?Sized> Executor for Arc<E> {
    fn execute(&self, job: Job) -> Result<(), Rejected> {
        (**self).execute(job)
    }
}

/// Process-wide pool used when the caller does not supply an executor
///
/// Built once, on first use, from [`PoolConfig::default`].
pub fn default_pool() -> &'static ThreadPool {
    static DEFAULT_POOL: OnceLock<ThreadPool> = OnceLock::new();
    DEFAULT_POOL.get_or_init(|| {
        let config = PoolConfig::default();
        tracing::debug!(
            core_workers = config.core_workers,
            max_workers = config.max_workers,
            queue_capacity = config.queue_capacity,
            "creating default fetch pool"
        );
        ThreadPool::from_validated(config)
    })
}

/// Runs jobs on a tokio runtime's blocking thread pool
///
/// Producers may block, so jobs go through `spawn_blocking` rather than
/// onto the async workers. The runtime never rejects a submission.
#[derive(Clone, Debug)]
pub struct TokioExecutor {
    handle: Handle,
}

impl TokioExecutor {
    /// Wrap an existing runtime handle
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Use the runtime the caller is running inside
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime, like [`Handle::current`].
    pub fn current() -> Self {
        Self::new(Handle::current())
    }
}

impl Executor for TokioExecutor {
    fn execute(&self, job: Job) -> Result<(), Rejected> {
        // Detached; the job reports through its own slot
        drop(self.handle.spawn_blocking(job));
        Ok(())
    }
}
