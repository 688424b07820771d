//! Error types for data-fetcher
//!
//! A single `fetch` either installs every node or fails before any installer
//! runs. The one exception is [`Error::Install`], raised when a caller-supplied
//! installer fails after earlier installers already committed their writes.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for data-fetcher operations
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error produced by caller-supplied producers and installers
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for data-fetcher
#[derive(Debug, Error)]
pub enum Error {
    /// A node handed to the fetcher was incomplete
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The fetcher was used outside its single-execution contract
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// The executor refused a submission; no installer ran
    #[error("resource exhausted: {0}")]
    ResourceExhausted(#[from] Rejected),

    /// The join timed out or a producer failed; no installer ran
    #[error("failed to fetch: {0}")]
    Fetch(#[from] FetchError),

    /// An installer failed; installers before `index` have committed
    #[error("failed to install node {index}: {source}")]
    Install {
        /// Declaration index of the failing node
        index: usize,
        /// What the installer reported
        #[source]
        source: NodeError,
    },

    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "max_workers")
        key: Option<String>,
    },
}

impl Error {
    /// Returns true if the error came from the join deadline passing
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Fetch(FetchError::TimedOut { .. }))
    }

    /// Declaration index of the node that caused the error, if one did
    pub fn node_index(&self) -> Option<usize> {
        match self {
            Error::Fetch(FetchError::Producer { index, .. }) | Error::Install { index, .. } => {
                Some(*index)
            }
            _ => None,
        }
    }
}

/// Why the fetch phase failed
#[derive(Debug, Error)]
pub enum FetchError {
    /// Not every producer finished before the deadline
    #[error("timed out after {timeout:?} with {pending} producer(s) still running")]
    TimedOut {
        /// The deadline that was applied to the whole assembly
        timeout: Duration,
        /// Producers that had not finished when the deadline passed
        pending: usize,
    },

    /// A producer failed; the lowest failing declaration index is reported
    #[error("producer of node {index} failed: {source}")]
    Producer {
        /// Declaration index of the failing node
        index: usize,
        /// What the producer reported
        #[source]
        source: NodeError,
    },
}

/// Failure reported by a single producer or installer
#[derive(Debug, Error)]
pub enum NodeError {
    /// The closure returned an error
    #[error("{0}")]
    Failed(#[source] BoxError),

    /// The closure panicked
    #[error("panicked: {0}")]
    Panicked(String),

    /// The closure never completed, e.g. its task was dropped by the runtime
    #[error("did not complete")]
    Cancelled,
}

impl NodeError {
    /// Wrap any error type into a [`NodeError::Failed`]
    pub fn failed<E: Into<BoxError>>(err: E) -> Self {
        NodeError::Failed(err.into())
    }

    pub(crate) fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        NodeError::Panicked(panic_message(payload))
    }
}

/// An executor could not accept a unit of work
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejected {
    /// The queue is full and no more workers may be started
    #[error("executor saturated: queue capacity {capacity} and all workers busy")]
    Saturated {
        /// Capacity of the queue that was full
        capacity: usize,
    },

    /// The executor no longer accepts work
    #[error("executor has been shut down")]
    ShutDown,
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
