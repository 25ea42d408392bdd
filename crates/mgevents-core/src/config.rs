//! Tunables for the queue poller and the object store helpers.

use serde::Deserialize;
use std::time::Duration;

/// Settings read once when a [`crate::QueuePoller`] is built.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    /// Number of concurrent worker loops. More workers mean more receive calls
    /// and a higher bill from the queue provider.
    pub threads: usize,
    /// How long a worker pauses after a receive call that returned nothing.
    pub empty_queue_delay_secs: u64,
    /// Messages requested per receive call (SQS caps this at 10).
    pub max_batch_size: u32,
    /// Time a worker has to dispatch and delete a whole batch before the
    /// queue hands the messages to someone else. Keep this well above the
    /// worst-case processing time or expect duplicates.
    pub visibility_timeout_secs: u64,
    /// SDK-level retries for retryable queue failures.
    pub max_error_retry: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            threads: 1,
            empty_queue_delay_secs: 30,
            max_batch_size: 1,
            visibility_timeout_secs: 600,
            max_error_retry: 3,
        }
    }
}

impl PollerConfig {
    pub fn empty_queue_delay(&self) -> Duration {
        Duration::from_secs(self.empty_queue_delay_secs)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }
}

/// The provider account that needs read access to uploaded recipient lists.
pub const PROVIDER_CANONICAL_ID: &str =
    "2dd8e53f1a8e4dfe3a6893d1229635b4915661d95f5283df75215779ce462819";

/// Retry policy for [`crate::FileUploader`].
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Attempts per operation, including the first.
    pub max_error_retry: u32,
    /// Pause after each failed attempt.
    pub retry_delay_ms: u64,
    /// Upper bound on a single upload attempt.
    pub put_timeout_secs: u64,
    pub provider_canonical_id: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_error_retry: 5,
            retry_delay_ms: 1000,
            put_timeout_secs: 900,
            provider_canonical_id: PROVIDER_CANONICAL_ID.to_string(),
        }
    }
}

impl StoreConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn put_timeout(&self) -> Duration {
        Duration::from_secs(self.put_timeout_secs)
    }
}
