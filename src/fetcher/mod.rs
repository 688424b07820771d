//! Concurrent property assembly
//!
//! A [`Fetcher`] owns an aggregate and a list of nodes. [`Fetcher::fetch`]
//! runs every producer on an executor, waits on a single timed barrier, and
//! then installs the values on the calling thread in declaration order.
//!
//! # Example
//!
//! ```
//! use data_fetcher::Fetcher;
//!
//! #[derive(Default)]
//! struct Page { title: String, views: u64 }
//!
//! # fn main() -> data_fetcher::Result<()> {
//! let mut fetcher = Fetcher::new(Page::default());
//! fetcher.add_node(|| "Home".to_string(), |page: &mut Page, title| page.title = title)?;
//! fetcher.add_node(|| 42_u64, |page: &mut Page, views| page.views = views)?;
//! fetcher.fetch()?;
//!
//! let page = fetcher.into_inner();
//! assert_eq!(page.title, "Home");
//! assert_eq!(page.views, 42);
//! # Ok(())
//! # }
//! ```

use crate::config::FetchConfig;
use crate::error::{BoxError, Error, FetchError, NodeError, Result};
use crate::executor::{Executor, default_pool};
use crate::node::{Assemble, Node, NodeBuilder, Outcome};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;


/// Where a fetcher is in its single execution
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchState {
    /// Accepting nodes, `fetch` not yet called
    Idle,
    /// Every producer has been handed to the executor
    Dispatched,
    /// All producers finished successfully; installing
    Joined,
    /// Every installer ran
    Done,
    /// The executor refused a producer
    Rejected,
    /// The join timed out or a producer failed
    Failed,
    /// An installer failed part way through
    InstallFailed,
}

impl FetchState {
    /// Returns true if no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FetchState::Done
                | FetchState::Rejected
                | FetchState::Failed
                | FetchState::InstallFailed
        )
    }
}

/// Fills the fields of an aggregate `D` from concurrently running producers
pub struct Fetcher<D> {
    data: D,
    nodes: Vec<Box<dyn Assemble<D>>>,
    state: FetchState,
    timeout: Duration,
    cancel: CancellationToken,
}

impl<D: 'static> Fetcher<D> {
    /// Create an empty fetcher bound to `data`
    pub fn new(data: D) -> Self {
        Self::with_config(data, FetchConfig::default())
    }

    /// Create a fetcher whose [`Fetcher::fetch`] uses `config.timeout`
    pub fn with_config(data: D, config: FetchConfig) -> Self {
        Self {
            data,
            nodes: Vec::new(),
            state: FetchState::Idle,
            timeout: config.timeout,
            cancel: CancellationToken::new(),
        }
    }

    /// Append a prebuilt node
    pub fn add<P: Send + 'static>(&mut self, node: Node<D, P>) -> Result<()> {
        self.ensure_idle("add a node")?;
        self.nodes.push(Box::new(node));
        Ok(())
    }

    /// Append a node built from an infallible producer and installer
    pub fn add_node<P, F, S>(&mut self, producer: F, installer: S) -> Result<()>
    where
        P: Send + 'static,
        F: FnOnce() -> P + Send + 'static,
        S: FnOnce(&mut D, P) + Send + 'static,
    {
        self.add(Node::new(producer, installer))
    }

    /// Append a node whose producer and installer may fail
    pub fn try_add_node<P, F, S, E1, E2>(&mut self, producer: F, installer: S) -> Result<()>
    where
        P: Send + 'static,
        F: FnOnce() -> std::result::Result<P, E1> + Send + 'static,
        S: FnOnce(&mut D, P) -> std::result::Result<(), E2> + Send + 'static,
        E1: Into<BoxError>,
        E2: Into<BoxError>,
    {
        self.add(Node::try_new(producer, installer))
    }

    /// Append the node described by `builder`
    ///
    /// Fails with [`Error::InvalidArgument`] if the producer or installer is
    /// missing; the fetcher is left unchanged.
    pub fn add_builder<P: Send + 'static>(&mut self, builder: NodeBuilder<D, P>) -> Result<()> {
        self.ensure_idle("add a node")?;
        let node = builder.build()?;
        self.add(node)
    }

    /// Fetch with the configured timeout on the process-wide pool
    pub fn fetch(&mut self) -> Result<()> {
        self.fetch_with(self.timeout, default_pool())
    }

    /// Fetch with `timeout` on the process-wide pool
    pub fn fetch_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.fetch_with(timeout, default_pool())
    }

    /// Run every producer on `executor`, join under `timeout`, then install
    ///
    /// Blocks the calling thread. On timeout the caller is released without
    /// waiting for producers still running; their results are discarded.
    pub fn fetch_with<E>(&mut self, timeout: Duration, executor: &E) -> Result<()>
    where
        E: Executor + ?Sized,
    {
        self.ensure_idle("fetch")?;
        let started = Instant::now();
        let mut nodes = std::mem::take(&mut self.nodes);
        let total = nodes.len();
        let latch = Arc::new(Latch::new(total));

        tracing::debug!(
            nodes = total,
            timeout_ms = timeout.as_millis() as u64,
            "dispatching producers"
        );

        for (index, node) in nodes.iter_mut().enumerate() {
            let Some(job) = node.run_producer(Arc::clone(&latch)) else {
                latch.count_down();
                continue;
            };
            if let Err(rejected) = executor.execute(job) {
                tracing::warn!(
                    index,
                    nodes = total,
                    error = %rejected,
                    "executor rejected producer"
                );
                self.fail(FetchState::Rejected);
                return Err(rejected.into());
            }
        }
        self.state = FetchState::Dispatched;

        let pending = latch.wait_timeout(timeout);
        self.complete(nodes, pending, timeout, started)
    }

    /// Async counterpart of [`Fetcher::fetch_with`] for tokio callers
    ///
    /// Producers run on the runtime's blocking pool and the join is awaited
    /// rather than blocking a thread. Fails with [`Error::IllegalState`] when
    /// called outside a tokio runtime.
    pub async fn fetch_async(&mut self, timeout: Duration) -> Result<()> {
        self.ensure_idle("fetch")?;
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::IllegalState(format!("no tokio runtime: {e}")))?;
        let started = Instant::now();
        let mut nodes = std::mem::take(&mut self.nodes);
        let latch = Arc::new(Latch::new(nodes.len()));

        tracing::debug!(
            nodes = nodes.len(),
            timeout_ms = timeout.as_millis() as u64,
            "dispatching producers to blocking pool"
        );

        let tasks: Vec<_> = nodes
            .iter_mut()
            .filter_map(|node| node.run_producer(Arc::clone(&latch)))
            .map(|job| handle.spawn_blocking(job))
            .collect();
        self.state = FetchState::Dispatched;

        // Dropped handles detach; late producers keep running
        let pending = match tokio::time::timeout(timeout, futures::future::join_all(tasks)).await {
            Ok(_) => 0,
            Err(_) => pending_past_deadline(&latch),
        };
        self.complete(nodes, pending, timeout, started)
    }

    /// Token cancelled when a fetch fails before installing
    ///
    /// Producers may clone it to stop early; the fetcher never waits on them.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Current execution state
    pub fn state(&self) -> FetchState {
        self.state
    }

    /// Number of nodes waiting for `fetch`
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if no nodes are waiting for `fetch`
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The aggregate
    pub fn data(&self) -> &D {
        &self.data
    }

    /// Mutable access to the aggregate
    pub fn data_mut(&mut self) -> &mut D {
        &mut self.data
    }

    /// Give the aggregate back
    pub fn into_inner(self) -> D {
        self.data
    }

    fn ensure_idle(&self, action: &str) -> Result<()> {
        if self.state == FetchState::Idle {
            Ok(())
        } else {
            Err(Error::IllegalState(format!(
                "cannot {action}: fetcher already executed (state: {:?})",
                self.state
            )))
        }
    }

    fn fail(&mut self, state: FetchState) {
        self.state = state;
        self.cancel.cancel();
    }

    /// Turn the join result into installs, or into the first failure
    fn complete(
        &mut self,
        mut nodes: Vec<Box<dyn Assemble<D>>>,
        pending: usize,
        timeout: Duration,
        started: Instant,
    ) -> Result<()> {
        if pending > 0 {
            tracing::warn!(
                pending,
                nodes = nodes.len(),
                timeout_ms = timeout.as_millis() as u64,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "fetch timed out"
            );
            self.fail(FetchState::Failed);
            return Err(FetchError::TimedOut { timeout, pending }.into());
        }

        for (index, node) in nodes.iter_mut().enumerate() {
            let source = match node.outcome() {
                Outcome::Ready => continue,
                Outcome::Failed(source) => source,
                Outcome::Pending => NodeError::Cancelled,
            };
            tracing::warn!(index, error = %source, "producer failed");
            self.fail(FetchState::Failed);
            return Err(FetchError::Producer { index, source }.into());
        }
        self.state = FetchState::Joined;

        for (index, node) in nodes.into_iter().enumerate() {
            if let Err(source) = node.run_installer(&mut self.data) {
                tracing::warn!(index, error = %source, "installer failed");
                self.state = FetchState::InstallFailed;
                return Err(Error::Install { index, source });
            }
        }
        self.state = FetchState::Done;

        tracing::debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "fetch complete"
        );
        Ok(())
    }
}

impl<D: std::fmt::Debug> std::fmt::Debug for Fetcher<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetcher")
            .field("data", &self.data)
            .field("nodes", &self.nodes.len())
            .field("state", &self.state)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Producers to report once the deadline has passed
///
/// At least one: producers finishing after the deadline do not turn a
/// timeout into a success.
fn pending_past_deadline(latch: &Latch) -> usize {
    latch.remaining().max(1)
}

/// Count-down barrier the caller waits on with a deadline
pub(crate) struct Latch {
    remaining: Mutex<usize>,
    done: Condvar,
}

impl Latch {
    pub(crate) fn new(count: usize) -> Self {
        Self {
            remaining: Mutex::new(count),
            done: Condvar::new(),
        }
    }

    pub(crate) fn count_down(&self) {
        let mut remaining = self.remaining.lock();
        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 {
            self.done.notify_all();
        }
    }

    pub(crate) fn remaining(&self) -> usize {
        *self.remaining.lock()
    }

    /// Block until the count reaches zero or `timeout` elapses
    ///
    /// Returns the count left when the wait ended.
    pub(crate) fn wait_timeout(&self, timeout: Duration) -> usize {
        let mut remaining = self.remaining.lock();
        match Instant::now().checked_add(timeout) {
            Some(deadline) => {
                while *remaining > 0 {
                    if self.done.wait_until(&mut remaining, deadline).timed_out() {
                        break;
                    }
                }
            }
            None => {
                while *remaining > 0 {
                    self.done.wait(&mut remaining);
                }
            }
        }
        *remaining
    }
}
