//! Bounded worker pool
//!
//! Core workers start lazily, one per submission, until `core_workers` are
//! alive. After that jobs go to a bounded queue. When the queue is full, extra
//! workers are started up to `max_workers`; those retire after sitting idle
//! for `keep_alive`. Once both limits are hit, submissions are rejected.

use super::{Executor, Job};
use crate::config::PoolConfig;
use crate::error::{Rejected, Result, panic_message};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::RwLock;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering, fence};

/// Fixed-bound thread pool implementing [`Executor`]
///
/// Dropping the pool, or calling [`ThreadPool::shutdown`], stops new
/// submissions; workers finish whatever is already queued and exit.
pub struct ThreadPool {
    sender: RwLock<Option<Sender<Job>>>,
    shared: Arc<Shared>,
}

struct Shared {
    config: PoolConfig,
    receiver: Receiver<Job>,
    workers: AtomicUsize,
    next_id: AtomicUsize,
}

impl ThreadPool {
    /// Create a pool after validating `config`
    pub fn new(config: PoolConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_validated(config))
    }

    pub(crate) fn from_validated(config: PoolConfig) -> Self {
        let (sender, receiver) = crossbeam_channel::bounded(config.queue_capacity);
        Self {
            sender: RwLock::new(Some(sender)),
            shared: Arc::new(Shared {
                config,
                receiver,
                workers: AtomicUsize::new(0),
                next_id: AtomicUsize::new(1),
            }),
        }
    }

    /// Sizing this pool was built with
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Workers currently alive
    pub fn worker_count(&self) -> usize {
        self.shared.workers.load(Ordering::SeqCst)
    }

    /// Jobs waiting in the queue
    pub fn queued(&self) -> usize {
        self.shared.receiver.len()
    }

    /// Stop accepting jobs; queued jobs still run
    pub fn shutdown(&self) {
        if self.sender.write().take().is_some() {
            tracing::debug!(
                workers = self.worker_count(),
                queued = self.queued(),
                "fetch pool shutting down"
            );
        }
    }

    /// Returns true once [`ThreadPool::shutdown`] has been called
    pub fn is_shut_down(&self) -> bool {
        self.sender.read().is_none()
    }

    /// Start a worker if fewer than `limit` are alive, handing it `first`
    ///
    /// Gives the job back when `limit` workers are already alive.
    fn spawn_worker(
        &self,
        first: Option<Job>,
        limit: usize,
    ) -> std::result::Result<(), Option<Job>> {
        let shared = &self.shared;
        let mut current = shared.workers.load(Ordering::SeqCst);
        loop {
            if current >= limit {
                return Err(first);
            }
            match shared.workers.compare_exchange(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        let id = shared.next_id.fetch_add(1, Ordering::SeqCst);
        let name = format!("{}{}", shared.config.thread_name_prefix, id);
        let worker_shared = Arc::clone(shared);

        // On spawn failure the closure, and `first` with it, is dropped
        let spawned = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker_loop(worker_shared, first));

        match spawned {
            Ok(_) => {
                tracing::debug!(worker = %name, "fetch pool worker started");
                Ok(())
            }
            Err(e) => {
                shared.workers.fetch_sub(1, Ordering::SeqCst);
                tracing::warn!(worker = %name, error = %e, "failed to start fetch pool worker");
                Err(None)
            }
        }
    }
}

impl Executor for ThreadPool {
    fn execute(&self, job: Job) -> std::result::Result<(), Rejected> {
        let guard = self.sender.read();
        let Some(sender) = guard.as_ref() else {
            return Err(Rejected::ShutDown);
        };
        let config = &self.shared.config;

        let job = match self.spawn_worker(Some(job), config.core_workers) {
            Ok(()) => return Ok(()),
            Err(Some(job)) => job,
            Err(None) => {
                return Err(Rejected::Saturated {
                    capacity: config.queue_capacity,
                });
            }
        };

        let job = match sender.try_send(job) {
            Ok(()) => {
                // Pairs with the fence in `try_retire`: either the retiring
                // worker sees this job, or this sees the worker gone
                fence(Ordering::SeqCst);
                if self.worker_count() == 0 {
                    let _ = self.spawn_worker(None, config.max_workers);
                }
                return Ok(());
            }
            Err(TrySendError::Full(job)) => job,
            Err(TrySendError::Disconnected(_)) => return Err(Rejected::ShutDown),
        };

        match self.spawn_worker(Some(job), config.max_workers) {
            Ok(()) => Ok(()),
            Err(_) => {
                tracing::warn!(
                    workers = self.worker_count(),
                    queue_capacity = config.queue_capacity,
                    "fetch pool saturated, rejecting job"
                );
                Err(Rejected::Saturated {
                    capacity: config.queue_capacity,
                })
            }
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("config", &self.shared.config)
            .field("workers", &self.worker_count())
            .field("queued", &self.queued())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

fn worker_loop(shared: Arc<Shared>, first: Option<Job>) {
    if let Some(job) = first {
        run_job(job);
    }

    loop {
        match shared.receiver.recv_timeout(shared.config.keep_alive) {
            Ok(job) => run_job(job),
            Err(RecvTimeoutError::Timeout) => {
                if try_retire(&shared) {
                    tracing::debug!("idle fetch pool worker retired");
                    return;
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                shared.workers.fetch_sub(1, Ordering::SeqCst);
                return;
            }
        }
    }
}

/// Leave the pool if more than `core_workers` are alive
///
/// The last worker never leaves while jobs are queued.
fn try_retire(shared: &Shared) -> bool {
    let mut current = shared.workers.load(Ordering::SeqCst);
    loop {
        if current <= shared.config.core_workers {
            return false;
        }
        if current == 1 && !shared.receiver.is_empty() {
            return false;
        }
        match shared.workers.compare_exchange(
            current,
            current - 1,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => break,
            Err(actual) => current = actual,
        }
    }

    fence(Ordering::SeqCst);
    if shared.receiver.is_empty() {
        return true;
    }

    // A job was queued while leaving; rejoin unless the pool is already full
    let mut current = shared.workers.load(Ordering::SeqCst);
    loop {
        if current >= shared.config.max_workers {
            return true;
        }
        match shared.workers.compare_exchange(
            current,
            current + 1,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => return false,
            Err(actual) => current = actual,
        }
    }
}

fn run_job(job: Job) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(job)) {
        tracing::error!(panic = %panic_message(payload.as_ref()), "fetch pool job panicked");
    }
}
