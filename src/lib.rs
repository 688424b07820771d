//! # data-fetcher
//!
//! Concurrent property assembly. Build an aggregate whose fields come from
//! several slow sources by running every source at once: total latency is the
//! slowest fetch rather than the sum of all of them.
//!
//! ## Contract
//!
//! - Producers run on an [`Executor`] (the process-wide [`default_pool`] unless
//!   one is supplied) and may block.
//! - The caller waits on a single timed barrier across all producers.
//! - Installers run afterwards on the caller's thread, in declaration order.
//! - Either every installer runs or none do; the only partial outcome is an
//!   installer itself failing ([`Error::Install`]).
//!
//! ## Quick Start
//!
//! ```no_run
//! use data_fetcher::Fetcher;
//! use std::time::Duration;
//!
//! #[derive(Default)]
//! struct Profile {
//!     name: String,
//!     followers: u64,
//!     tags: Vec<String>,
//! }
//!
//! # fn load_name() -> String { String::new() }
//! # fn count_followers() -> u64 { 0 }
//! # fn load_tags() -> Vec<String> { Vec::new() }
//! fn main() -> data_fetcher::Result<()> {
//!     let mut fetcher = Fetcher::new(Profile::default());
//!     fetcher.add_node(load_name, |p: &mut Profile, name| p.name = name)?;
//!     fetcher.add_node(count_followers, |p: &mut Profile, n| p.followers = n)?;
//!     fetcher.add_node(load_tags, |p: &mut Profile, tags| p.tags = tags)?;
//!
//!     fetcher.fetch_timeout(Duration::from_secs(2))?;
//!     let profile = fetcher.into_inner();
//!     println!("{} has {} followers", profile.name, profile.followers);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Executors and the default worker pool
pub mod executor;
/// Fetch orchestration
pub mod fetcher;
/// Producer/installer nodes
pub mod node;

// Re-export commonly used types
pub use config::{FetchConfig, PoolConfig};
pub use error::{BoxError, Error, FetchError, NodeError, Rejected, Result};
pub use executor::{Executor, Job, ThreadPool, TokioExecutor, default_pool};
pub use fetcher::{FetchState, Fetcher};
pub use node::{Node, NodeBuilder};
