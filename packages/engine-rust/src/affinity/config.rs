//! Configuration for the thread-affinity executor.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Thread-affinity executor settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AffinityConfig {
    /// How long a worker may sit with an empty queue before it is retired.
    pub keep_alive: Duration,
    /// Prefix for worker thread names; a sequence number is appended.
    pub thread_name_prefix: String,
}

impl Default for AffinityConfig {
    fn default() -> Self {
        Self {
            keep_alive: Duration::from_secs(60),
            thread_name_prefix: "affinity-worker".to_string(),
        }
    }
}

impl AffinityConfig {
    /// Default settings with the given keep-alive.
    #[must_use]
    pub fn with_keep_alive(keep_alive: Duration) -> Self {
        Self {
            keep_alive,
            ..Self::default()
        }
    }
}
