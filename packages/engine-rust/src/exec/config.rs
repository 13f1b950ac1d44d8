//! Live-tunable job partitioning configuration.
//!
//! The configuration is published as an immutable [`ConfigSnapshot`] through
//! `ArcSwap`: readers take one lock-free load and always observe a consistent
//! (min, max) pair together with the version it was published under. Writers
//! are serialized by a mutex so that a setter validates against the latest
//! snapshot, never a stale one.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use calcgrid_core::Cost;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::info;

/// Largest accepted `max_concurrency`: the permit limit of the dispatch
/// semaphore.
pub const MAX_CONCURRENCY: usize = Semaphore::MAX_PERMITS;

/// Job sizing and concurrency bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobLimits {
    /// Preferred minimum number of nodes per job.
    pub min_job_items: usize,
    /// Hard maximum number of nodes per job.
    pub max_job_items: usize,
    /// Preferred minimum aggregate cost per job.
    pub min_job_cost: Cost,
    /// Maximum aggregate cost per job (a single node may exceed it).
    pub max_job_cost: Cost,
    /// Maximum number of jobs in flight at once during a pass.
    pub max_concurrency: usize,
}

impl Default for JobLimits {
    fn default() -> Self {
        Self {
            min_job_items: 1,
            max_job_items: 1000,
            min_job_cost: 0,
            max_job_cost: 10_000_000,
            max_concurrency: 8,
        }
    }
}

impl JobLimits {
    /// Checks the invariants that must hold whenever the limits are read.
    ///
    /// # Errors
    ///
    /// Returns the first violated bound.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_job_items == 0 {
            return Err(ConfigError::ZeroMaxItems);
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.max_concurrency > MAX_CONCURRENCY {
            return Err(ConfigError::ConcurrencyTooLarge {
                value: self.max_concurrency,
                max: MAX_CONCURRENCY,
            });
        }
        if self.min_job_items > self.max_job_items {
            return Err(ConfigError::ItemBounds {
                min: self.min_job_items,
                max: self.max_job_items,
            });
        }
        if self.min_job_cost > self.max_job_cost {
            return Err(ConfigError::CostBounds {
                min: self.min_job_cost,
                max: self.max_job_cost,
            });
        }
        Ok(())
    }
}

/// Rejected configuration change. The live configuration is left untouched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("minimum job items {min} exceeds maximum job items {max}")]
    ItemBounds { min: usize, max: usize },
    #[error("minimum job cost {min} exceeds maximum job cost {max}")]
    CostBounds { min: Cost, max: Cost },
    #[error("maximum job items must be at least 1")]
    ZeroMaxItems,
    #[error("maximum concurrency must be at least 1")]
    ZeroConcurrency,
    #[error("maximum concurrency {value} exceeds the limit of {max}")]
    ConcurrencyTooLarge { value: usize, max: usize },
    #[error("invalid configuration document: {0}")]
    Parse(String),
}

/// Limits together with the version they were published under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigSnapshot {
    pub version: u64,
    pub limits: JobLimits,
}

type ChangeListener = Box<dyn Fn(&ConfigSnapshot) + Send + Sync>;

/// Process-wide holder of the live [`JobLimits`].
pub struct ExecutorConfig {
    current: ArcSwap<ConfigSnapshot>,
    write_lock: Mutex<()>,
    listeners: RwLock<Vec<ChangeListener>>,
}

impl ExecutorConfig {
    /// Creates a configuration holder after validating `limits`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if `limits` violates a bound.
    pub fn new(limits: JobLimits) -> Result<Self, ConfigError> {
        limits.validate()?;
        Ok(Self {
            current: ArcSwap::from_pointee(ConfigSnapshot { version: 0, limits }),
            write_lock: Mutex::new(()),
            listeners: RwLock::new(Vec::new()),
        })
    }

    /// Loads initial limits from a JSON document; absent fields take defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed JSON, or a bound error.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let limits: JobLimits =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Self::new(limits)
    }

    /// Current snapshot. Lock-free.
    #[must_use]
    pub fn snapshot(&self) -> Arc<ConfigSnapshot> {
        self.current.load_full()
    }

    /// Current limits. Lock-free.
    #[must_use]
    pub fn limits(&self) -> JobLimits {
        self.current.load().limits
    }

    /// Version of the current snapshot; bumped by every accepted write.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.current.load().version
    }

    /// Applies `change` to a copy of the current limits and publishes it.
    ///
    /// Change listeners run after publication, in version order, while the
    /// writer lock is held; they must not write to this configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] and publishes nothing if the changed limits
    /// are invalid.
    pub fn update<F>(&self, change: F) -> Result<Arc<ConfigSnapshot>, ConfigError>
    where
        F: FnOnce(&mut JobLimits),
    {
        let _writer = self.write_lock.lock();
        let previous = self.current.load_full();
        let mut limits = previous.limits;
        change(&mut limits);
        limits.validate()?;

        let next = Arc::new(ConfigSnapshot {
            version: previous.version + 1,
            limits,
        });
        self.current.store(Arc::clone(&next));
        info!(
            version = next.version,
            old = ?previous.limits,
            new = ?next.limits,
            "executor configuration changed"
        );

        for listener in self.listeners.read().iter() {
            listener(&next);
        }
        Ok(next)
    }

    /// Registers a callback invoked after every accepted change.
    pub fn on_change<F>(&self, listener: F)
    where
        F: Fn(&ConfigSnapshot) + Send + Sync + 'static,
    {
        self.listeners.write().push(Box::new(listener));
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            current: ArcSwap::from_pointee(ConfigSnapshot {
                version: 0,
                limits: JobLimits::default(),
            }),
            write_lock: Mutex::new(()),
            listeners: RwLock::new(Vec::new()),
        }
    }
}

impl fmt::Debug for ExecutorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorConfig")
            .field("current", &**self.current.load())
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::thread;

    use super::*;

    #[test]
    fn job_limits_defaults() {
        let limits = JobLimits::default();
        assert_eq!(limits.min_job_items, 1);
        assert_eq!(limits.max_job_items, 1000);
        assert_eq!(limits.min_job_cost, 0);
        assert_eq!(limits.max_job_cost, 10_000_000);
        assert_eq!(limits.max_concurrency, 8);
        assert!(limits.validate().is_ok());
    }

    #[test]
    fn inverted_item_bounds_rejected_and_unchanged() {
        let config = ExecutorConfig::default();
        config.update(|l| l.max_job_items = 10).unwrap();

        let err = config.update(|l| l.min_job_items = 11).unwrap_err();
        assert_eq!(err, ConfigError::ItemBounds { min: 11, max: 10 });

        let limits = config.limits();
        assert_eq!(limits.min_job_items, 1);
        assert_eq!(limits.max_job_items, 10);
        assert_eq!(config.version(), 1);
    }

    #[test]
    fn inverted_cost_bounds_rejected() {
        let config = ExecutorConfig::default();
        config.update(|l| l.min_job_cost = 500).unwrap();
        let err = config.update(|l| l.max_job_cost = 499).unwrap_err();
        assert_eq!(err, ConfigError::CostBounds { min: 500, max: 499 });
        assert_eq!(config.limits().max_job_cost, 10_000_000);
    }

    #[test]
    fn zero_maximums_rejected() {
        let config = ExecutorConfig::default();
        config.update(|l| l.min_job_items = 0).unwrap();
        assert_eq!(
            config.update(|l| l.max_job_items = 0).unwrap_err(),
            ConfigError::ZeroMaxItems
        );
        assert_eq!(
            config.update(|l| l.max_concurrency = 0).unwrap_err(),
            ConfigError::ZeroConcurrency
        );
    }

    #[test]
    fn concurrency_above_permit_limit_rejected() {
        let config = ExecutorConfig::default();
        assert_eq!(
            config.update(|l| l.max_concurrency = usize::MAX).unwrap_err(),
            ConfigError::ConcurrencyTooLarge {
                value: usize::MAX,
                max: MAX_CONCURRENCY,
            }
        );
        assert_eq!(config.limits().max_concurrency, 8);
        assert_eq!(config.version(), 0);

        config.update(|l| l.max_concurrency = MAX_CONCURRENCY).unwrap();
        assert_eq!(config.limits().max_concurrency, MAX_CONCURRENCY);
    }

    #[test]
    fn from_json_fills_defaults_and_validates() {
        let config = ExecutorConfig::from_json(r#"{"max_job_items": 50, "max_concurrency": 2}"#)
            .unwrap();
        let limits = config.limits();
        assert_eq!(limits.max_job_items, 50);
        assert_eq!(limits.max_concurrency, 2);
        assert_eq!(limits.max_job_cost, 10_000_000);

        assert!(matches!(
            ExecutorConfig::from_json(r#"{"min_job_items": 5, "max_job_items": 4}"#),
            Err(ConfigError::ItemBounds { min: 5, max: 4 })
        ));
        assert!(matches!(
            ExecutorConfig::from_json("{not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn listeners_see_each_accepted_version() {
        let config = ExecutorConfig::default();
        let seen = Arc::new(AtomicU64::new(0));
        let seen_clone = Arc::clone(&seen);
        config.on_change(move |snapshot| {
            seen_clone.store(snapshot.version, Ordering::SeqCst);
        });

        config.update(|l| l.max_concurrency = 3).unwrap();
        config.update(|l| l.max_concurrency = 4).unwrap();
        let _ = config.update(|l| l.max_concurrency = 0);

        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn readers_never_observe_inverted_pairs() {
        let config = Arc::new(ExecutorConfig::default());
        config
            .update(|l| {
                l.min_job_items = 1;
                l.max_job_items = 1;
            })
            .unwrap();

        let writer = {
            let config = Arc::clone(&config);
            thread::spawn(move || {
                for i in 1..500 {
                    // Grow max then min, then shrink min then max.
                    config.update(|l| l.max_job_items = i + 1).unwrap();
                    config.update(|l| l.min_job_items = i + 1).unwrap();
                    config.update(|l| l.min_job_items = 1).unwrap();
                }
            })
        };

        let reader = {
            let config = Arc::clone(&config);
            thread::spawn(move || {
                for _ in 0..5_000 {
                    let limits = config.snapshot().limits;
                    assert!(limits.min_job_items <= limits.max_job_items);
                }
            })
        };

        writer.join().unwrap();
        reader.join().unwrap();
    }
}
