//! Job partitioning and dispatch.
//!
//! - [`ExecutorConfig`]: live, versioned [`JobLimits`]
//! - [`partition()`]: greedy split of an ordered node sequence into jobs
//! - [`NodeExecutorController`]: plan memoization and bounded dispatch
//! - [`NodeExecutorManagement`]: get/set operations for remote tuning
//! - [`dispatch`]: tower layers for composing job dispatchers

pub mod config;
pub mod controller;
pub mod dispatch;
pub mod management;
pub mod partition;
pub mod stats;

pub use config::{ConfigError, ConfigSnapshot, ExecutorConfig, JobLimits, MAX_CONCURRENCY};
pub use controller::{ExecutionReport, JobOutcome, NodeExecutorController};
pub use dispatch::{
    DispatchConfig, DispatchError, DispatchFuture, JobMetricsLayer, JobMetricsService,
    JobTimeoutLayer, JobTimeoutService,
};
pub use management::{ConcurrencyTuner, NodeExecutorManagement};
pub use partition::{partition, PartitionPlan};
pub use stats::{ExecutionStatistics, StatisticsSnapshot};
