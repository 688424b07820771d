//! Configuration types for data-fetcher

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings for a single assembly
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Deadline for the whole join barrier (default: 10 seconds)
    #[serde(default = "default_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
        }
    }
}

/// Worker pool sizing
///
/// Defaults are derived from the number of logical processors `P`:
/// `2·P + 1` core workers, `3·P` max workers, a 30 second idle TTL for
/// workers above the core count, and a bounded queue of 2028 jobs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Workers kept alive even when idle (default: 2·P + 1)
    #[serde(default = "default_core_workers")]
    pub core_workers: usize,

    /// Upper bound on live workers (default: 3·P)
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// How long a worker above the core count may sit idle (default: 30 seconds)
    #[serde(default = "default_keep_alive", with = "duration_serde")]
    pub keep_alive: Duration,

    /// Bounded submission queue capacity (default: 2028)
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Worker thread name prefix; workers are numbered from 1
    #[serde(default = "default_thread_name_prefix")]
    pub thread_name_prefix: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            core_workers: default_core_workers(),
            max_workers: default_max_workers(),
            keep_alive: default_keep_alive(),
            queue_capacity: default_queue_capacity(),
            thread_name_prefix: default_thread_name_prefix(),
        }
    }
}

impl PoolConfig {
    /// Check the sizing is usable by a [`ThreadPool`](crate::executor::ThreadPool)
    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(config_error("max_workers must be at least 1", "max_workers"));
        }
        if self.max_workers < self.core_workers {
            return Err(config_error(
                format!(
                    "max_workers ({}) must not be below core_workers ({})",
                    self.max_workers, self.core_workers
                ),
                "max_workers",
            ));
        }
        if self.queue_capacity == 0 {
            return Err(config_error(
                "queue_capacity must be at least 1",
                "queue_capacity",
            ));
        }
        Ok(())
    }
}

fn config_error(message: impl Into<String>, key: &str) -> Error {
    Error::Config {
        message: message.into(),
        key: Some(key.to_string()),
    }
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_core_workers() -> usize {
    num_cpus::get() * 2 + 1
}

fn default_max_workers() -> usize {
    num_cpus::get() * 3
}

fn default_keep_alive() -> Duration {
    Duration::from_secs(30)
}

fn default_queue_capacity() -> usize {
    2028
}

fn default_thread_name_prefix() -> String {
    "dataFetcher-thread-".to_string()
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
