//! Producer/installer pairs
//!
//! A [`Node`] contributes one property to the aggregate. Its producer runs on
//! an executor thread and parks the value in a slot shared with the caller;
//! its installer later writes that value into the aggregate on the caller's
//! thread. The fetcher only sees nodes through the `Assemble` trait, which
//! keeps each node's property type hidden.

use crate::error::{BoxError, Error, NodeError, Result};
use crate::executor::Job;
use crate::fetcher::Latch;
use parking_lot::Mutex;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

type Producer<P> = Box<dyn FnOnce() -> std::result::Result<P, NodeError> + Send>;
type Installer<D, P> =
    Box<dyn FnOnce(&mut D, P) -> std::result::Result<(), NodeError> + Send>;

/// Written once by the producer job, read once by the installer
type Slot<P> = Arc<Mutex<Option<std::result::Result<P, NodeError>>>>;

/// One property fetch: how to produce the value and how to install it
pub struct Node<D, P> {
    producer: Option<Producer<P>>,
    installer: Option<Installer<D, P>>,
    slot: Slot<P>,
}

impl<D, P> Node<D, P>
where
    D: 'static,
    P: Send + 'static,
{
    /// Build a node from an infallible producer and installer
    ///
    /// # Examples
    ///
    /// ```
    /// use data_fetcher::Node;
    ///
    /// struct Profile { name: String }
    ///
    /// let node = Node::new(
    ///     || "ada".to_string(),
    ///     |profile: &mut Profile, name: String| profile.name = name,
    /// );
    /// # let _ = node;
    /// ```
    pub fn new<F, S>(producer: F, installer: S) -> Self
    where
        F: FnOnce() -> P + Send + 'static,
        S: FnOnce(&mut D, P) + Send + 'static,
    {
        Self::from_parts(
            Box::new(move || Ok(producer())),
            Box::new(move |data: &mut D, value: P| {
                installer(data, value);
                Ok(())
            }),
        )
    }

    /// Build a node whose producer and installer may fail
    pub fn try_new<F, S, E1, E2>(producer: F, installer: S) -> Self
    where
        F: FnOnce() -> std::result::Result<P, E1> + Send + 'static,
        S: FnOnce(&mut D, P) -> std::result::Result<(), E2> + Send + 'static,
        E1: Into<BoxError>,
        E2: Into<BoxError>,
    {
        Self::from_parts(fallible_producer(producer), fallible_installer(installer))
    }

    /// Start building a node piece by piece
    pub fn builder() -> NodeBuilder<D, P> {
        NodeBuilder::default()
    }

    fn from_parts(producer: Producer<P>, installer: Installer<D, P>) -> Self {
        Self {
            producer: Some(producer),
            installer: Some(installer),
            slot: Arc::new(Mutex::new(None)),
        }
    }
}

impl<D, P> std::fmt::Debug for Node<D, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("produced", &self.producer.is_none())
            .field("installed", &self.installer.is_none())
            .finish()
    }
}

fn fallible_producer<P, F, E>(producer: F) -> Producer<P>
where
    F: FnOnce() -> std::result::Result<P, E> + Send + 'static,
    E: Into<BoxError>,
{
    Box::new(move || producer().map_err(NodeError::failed))
}

fn fallible_installer<D, P, S, E>(installer: S) -> Installer<D, P>
where
    S: FnOnce(&mut D, P) -> std::result::Result<(), E> + Send + 'static,
    E: Into<BoxError>,
{
    Box::new(move |data: &mut D, value: P| {
        installer(data, value).map_err(NodeError::failed)
    })
}

/// Assembles a [`Node`] from optional parts
///
/// Handing an incomplete builder to
/// [`Fetcher::add_builder`](crate::Fetcher::add_builder) fails with
/// [`Error::InvalidArgument`].
pub struct NodeBuilder<D, P> {
    producer: Option<Producer<P>>,
    installer: Option<Installer<D, P>>,
}

impl<D, P> Default for NodeBuilder<D, P> {
    fn default() -> Self {
        Self {
            producer: None,
            installer: None,
        }
    }
}

impl<D, P> NodeBuilder<D, P>
where
    D: 'static,
    P: Send + 'static,
{
    /// Set an infallible producer
    pub fn producer<F>(mut self, producer: F) -> Self
    where
        F: FnOnce() -> P + Send + 'static,
    {
        self.producer = Some(Box::new(move || Ok(producer())));
        self
    }

    /// Set a producer that may fail
    pub fn try_producer<F, E>(mut self, producer: F) -> Self
    where
        F: FnOnce() -> std::result::Result<P, E> + Send + 'static,
        E: Into<BoxError>,
    {
        self.producer = Some(fallible_producer(producer));
        self
    }

    /// Set an infallible installer
    pub fn installer<S>(mut self, installer: S) -> Self
    where
        S: FnOnce(&mut D, P) + Send + 'static,
    {
        self.installer = Some(Box::new(move |data: &mut D, value: P| {
            installer(data, value);
            Ok(())
        }));
        self
    }

    /// Set an installer that may fail
    pub fn try_installer<S, E>(mut self, installer: S) -> Self
    where
        S: FnOnce(&mut D, P) -> std::result::Result<(), E> + Send + 'static,
        E: Into<BoxError>,
    {
        self.installer = Some(fallible_installer(installer));
        self
    }

    /// Finish the node, failing if either half is missing
    pub fn build(self) -> Result<Node<D, P>> {
        match (self.producer, self.installer) {
            (Some(producer), Some(installer)) => Ok(Node::from_parts(producer, installer)),
            (None, _) => Err(Error::InvalidArgument("node has no producer".to_string())),
            (_, None) => Err(Error::InvalidArgument("node has no installer".to_string())),
        }
    }
}

/// Where a node stands after the join
#[derive(Debug)]
pub(crate) enum Outcome {
    /// The producer has not finished
    Pending,
    /// The producer returned a value
    Ready,
    /// The producer failed or panicked
    Failed(NodeError),
}

/// The two capabilities the fetcher needs from a node
///
/// `Send` so a fetcher, and the future of an async fetch, can move between
/// threads whenever its aggregate can.
pub(crate) trait Assemble<D>: Send {
    /// Hand the producer over as a job that fills the slot, then counts
    /// `latch` down. Returns `None` if the producer was already taken.
    fn run_producer(&mut self, latch: Arc<Latch>) -> Option<Job>;

    /// Inspect the slot once the join is over; takes a failure out of it
    fn outcome(&mut self) -> Outcome;

    /// Install the produced value into `data`
    fn run_installer(self: Box<Self>, data: &mut D) -> std::result::Result<(), NodeError>;
}

impl<D, P> Assemble<D> for Node<D, P>
where
    D: 'static,
    P: Send + 'static,
{
    fn run_producer(&mut self, latch: Arc<Latch>) -> Option<Job> {
        let producer = self.producer.take()?;
        let slot = Arc::clone(&self.slot);
        Some(Box::new(move || {
            let result = match catch_unwind(AssertUnwindSafe(producer)) {
                Ok(result) => result,
                Err(payload) => Err(NodeError::from_panic(payload.as_ref())),
            };
            *slot.lock() = Some(result);
            latch.count_down();
        }))
    }

    fn outcome(&mut self) -> Outcome {
        let mut slot = self.slot.lock();
        match slot.take() {
            None => Outcome::Pending,
            Some(Err(e)) => Outcome::Failed(e),
            Some(Ok(value)) => {
                *slot = Some(Ok(value));
                Outcome::Ready
            }
        }
    }

    fn run_installer(self: Box<Self>, data: &mut D) -> std::result::Result<(), NodeError> {
        let value = match self.slot.lock().take() {
            Some(Ok(value)) => value,
            Some(Err(e)) => return Err(e),
            None => return Err(NodeError::Cancelled),
        };
        let installer = self.installer.ok_or(NodeError::Cancelled)?;
        match catch_unwind(AssertUnwindSafe(move || installer(data, value))) {
            Ok(result) => result,
            Err(payload) => Err(NodeError::from_panic(payload.as_ref())),
        }
    }
}
