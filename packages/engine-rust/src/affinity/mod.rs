//! Thread-affinity task execution.
//!
//! Tasks submitted from the same caller thread run, in submission order, on
//! one dedicated worker thread so that thread-local state (warm caches) is
//! reused across submissions. Workers idle for longer than the keep-alive are
//! retired; the next submission from that caller binds a fresh worker.

pub mod config;
pub mod executor;
pub mod handle;

pub use config::AffinityConfig;
pub use executor::{AffinityExecutor, BindingInfo, ExecutorError};
pub use handle::{TaskError, TaskHandle, TaskResult};
