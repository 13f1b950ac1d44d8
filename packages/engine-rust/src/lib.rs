//! `calcgrid` engine: the scheduling core of the graph execution system.
//! Function exclusion groups, thread-affinity execution, and job
//! partitioning with bounded dispatch.

pub mod affinity;
pub mod exclusion;
pub mod exec;
pub mod logging;

pub use affinity::{AffinityConfig, AffinityExecutor, ExecutorError, TaskError, TaskHandle};
pub use exclusion::{CategoryExclusion, ExclusionGroup, ExclusionGroups, ExclusionPath};
pub use exec::{
    ConfigError, DispatchError, ExecutorConfig, JobLimits, NodeExecutorController,
    NodeExecutorManagement,
};
pub use logging::{init_tracing, LogFormat};
