//! Management interface for live tuning of the node executor.
//!
//! Each parameter is a get/set pair. A setter validates the new value against
//! its paired bound using the latest published limits and either publishes a
//! new configuration version or leaves everything unchanged. Every accepted
//! write invalidates memoized partition plans. A pass already running keeps
//! the snapshot it started with.
//!
//! The transport that exposes these operations remotely is not part of this
//! crate.

use calcgrid_core::Cost;
use tracing::info;

use super::config::{ConfigError, MAX_CONCURRENCY};
use super::controller::NodeExecutorController;

/// Live-tunable executor parameters.
pub trait NodeExecutorManagement: Send + Sync {
    fn minimum_job_items(&self) -> usize;

    /// # Errors
    ///
    /// [`ConfigError::ItemBounds`] if `value` exceeds the maximum.
    fn set_minimum_job_items(&self, value: usize) -> Result<(), ConfigError>;

    fn maximum_job_items(&self) -> usize;

    /// # Errors
    ///
    /// [`ConfigError::ItemBounds`] if `value` is below the minimum, or
    /// [`ConfigError::ZeroMaxItems`].
    fn set_maximum_job_items(&self, value: usize) -> Result<(), ConfigError>;

    fn minimum_job_cost(&self) -> Cost;

    /// # Errors
    ///
    /// [`ConfigError::CostBounds`] if `value` exceeds the maximum.
    fn set_minimum_job_cost(&self, value: Cost) -> Result<(), ConfigError>;

    fn maximum_job_cost(&self) -> Cost;

    /// # Errors
    ///
    /// [`ConfigError::CostBounds`] if `value` is below the minimum.
    fn set_maximum_job_cost(&self, value: Cost) -> Result<(), ConfigError>;

    fn maximum_concurrency(&self) -> usize;

    /// # Errors
    ///
    /// [`ConfigError::ZeroConcurrency`] if `value` is zero, or
    /// [`ConfigError::ConcurrencyTooLarge`] above [`MAX_CONCURRENCY`].
    fn set_maximum_concurrency(&self, value: usize) -> Result<(), ConfigError>;

    /// Drops memoized partition plans without changing any parameter.
    fn invalidate(&self);
}

impl NodeExecutorManagement for NodeExecutorController {
    fn minimum_job_items(&self) -> usize {
        self.config().limits().min_job_items
    }

    fn set_minimum_job_items(&self, value: usize) -> Result<(), ConfigError> {
        self.config().update(|l| l.min_job_items = value).map(drop)
    }

    fn maximum_job_items(&self) -> usize {
        self.config().limits().max_job_items
    }

    fn set_maximum_job_items(&self, value: usize) -> Result<(), ConfigError> {
        self.config().update(|l| l.max_job_items = value).map(drop)
    }

    fn minimum_job_cost(&self) -> Cost {
        self.config().limits().min_job_cost
    }

    fn set_minimum_job_cost(&self, value: Cost) -> Result<(), ConfigError> {
        self.config().update(|l| l.min_job_cost = value).map(drop)
    }

    fn maximum_job_cost(&self) -> Cost {
        self.config().limits().max_job_cost
    }

    fn set_maximum_job_cost(&self, value: Cost) -> Result<(), ConfigError> {
        self.config().update(|l| l.max_job_cost = value).map(drop)
    }

    fn maximum_concurrency(&self) -> usize {
        self.config().limits().max_concurrency
    }

    fn set_maximum_concurrency(&self, value: usize) -> Result<(), ConfigError> {
        self.config().update(|l| l.max_concurrency = value).map(drop)
    }

    fn invalidate(&self) {
        NodeExecutorController::invalidate(self);
    }
}

/// Derives the dispatch concurrency from the number of calculation nodes
/// currently available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcurrencyTuner {
    jobs_per_node: usize,
}

impl ConcurrencyTuner {
    /// `jobs_per_node` of zero is treated as one.
    #[must_use]
    pub fn new(jobs_per_node: usize) -> Self {
        Self {
            jobs_per_node: jobs_per_node.max(1),
        }
    }

    #[must_use]
    pub fn jobs_per_node(&self) -> usize {
        self.jobs_per_node
    }

    /// Concurrency for `available_nodes`, clamped to `1..=MAX_CONCURRENCY`.
    #[must_use]
    pub fn concurrency_for(&self, available_nodes: usize) -> usize {
        available_nodes
            .saturating_mul(self.jobs_per_node)
            .clamp(1, MAX_CONCURRENCY)
    }

    /// Applies the derived concurrency through `target`, skipping the write
    /// when it is already current. Returns the value in effect.
    ///
    /// # Errors
    ///
    /// Propagates the setter's [`ConfigError`].
    pub fn tune(
        &self,
        target: &dyn NodeExecutorManagement,
        available_nodes: usize,
    ) -> Result<usize, ConfigError> {
        let concurrency = self.concurrency_for(available_nodes);
        if target.maximum_concurrency() != concurrency {
            target.set_maximum_concurrency(concurrency)?;
            info!(available_nodes, concurrency, "dispatch concurrency retuned");
        }
        Ok(concurrency)
    }
}

impl Default for ConcurrencyTuner {
    fn default() -> Self {
        Self::new(1)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use calcgrid_core::{DependencyGraph, GraphNode, Job, NodeId, StaticFunction};
    use tower::service_fn;

    use super::*;
    use crate::exec::DispatchError;

    fn graph(n: u32) -> DependencyGraph {
        let f = StaticFunction::new("f").into_ref();
        DependencyGraph::new((0..n).map(|i| GraphNode::new(NodeId(i), f.clone(), 1)).collect())
            .unwrap()
    }

    #[test]
    fn getters_reflect_setters() {
        let c = NodeExecutorController::with_defaults();
        c.set_maximum_job_items(40).unwrap();
        c.set_minimum_job_items(4).unwrap();
        c.set_maximum_job_cost(900).unwrap();
        c.set_minimum_job_cost(90).unwrap();
        c.set_maximum_concurrency(3).unwrap();

        assert_eq!(c.maximum_job_items(), 40);
        assert_eq!(c.minimum_job_items(), 4);
        assert_eq!(c.maximum_job_cost(), 900);
        assert_eq!(c.minimum_job_cost(), 90);
        assert_eq!(c.maximum_concurrency(), 3);
    }

    #[test]
    fn min_above_max_rejected_and_both_unchanged() {
        let c = NodeExecutorController::with_defaults();
        c.set_maximum_job_items(10).unwrap();
        let version = c.config().version();

        assert_eq!(
            c.set_minimum_job_items(11),
            Err(ConfigError::ItemBounds { min: 11, max: 10 })
        );
        assert_eq!(c.minimum_job_items(), 1);
        assert_eq!(c.maximum_job_items(), 10);
        assert_eq!(c.config().version(), version);
    }

    #[test]
    fn max_below_min_rejected() {
        let c = NodeExecutorController::with_defaults();
        c.set_minimum_job_cost(100).unwrap();
        assert_eq!(
            c.set_maximum_job_cost(99),
            Err(ConfigError::CostBounds { min: 100, max: 99 })
        );
        assert_eq!(c.maximum_job_cost(), 10_000_000);
    }

    #[test]
    fn setter_invalidates_cached_plan() {
        let c = NodeExecutorController::with_defaults();
        let g = graph(6);
        let before = c.plan(&g);
        assert_eq!(before.jobs().len(), 1);

        c.set_maximum_job_items(2).unwrap();
        assert_eq!(c.cached_plans(), 0);
        assert_eq!(c.plan(&g).jobs().len(), 3);
    }

    #[test]
    fn rejected_setter_keeps_cached_plan() {
        let c = NodeExecutorController::with_defaults();
        let g = graph(2);
        let before = c.plan(&g);
        assert!(c.set_maximum_concurrency(0).is_err());
        assert!(Arc::ptr_eq(&before, &c.plan(&g)));
    }

    #[test]
    fn invalidate_through_trait_object() {
        let c = NodeExecutorController::with_defaults();
        let _ = c.plan(&graph(2));
        let management: &dyn NodeExecutorManagement = &c;
        management.invalidate();
        assert_eq!(c.cached_plans(), 0);
    }

    #[test]
    fn tuner_scales_with_available_nodes() {
        let c = NodeExecutorController::with_defaults();
        let tuner = ConcurrencyTuner::new(4);

        assert_eq!(tuner.tune(&c, 3).unwrap(), 12);
        assert_eq!(c.maximum_concurrency(), 12);

        let version = c.config().version();
        assert_eq!(tuner.tune(&c, 3).unwrap(), 12);
        assert_eq!(c.config().version(), version);

        assert_eq!(tuner.tune(&c, 0).unwrap(), 1);
        assert_eq!(c.maximum_concurrency(), 1);
    }

    #[test]
    fn oversized_concurrency_rejected_by_setter() {
        let c = NodeExecutorController::with_defaults();
        assert!(matches!(
            c.set_maximum_concurrency(usize::MAX),
            Err(ConfigError::ConcurrencyTooLarge { .. })
        ));
        assert_eq!(c.maximum_concurrency(), 8);
    }

    #[tokio::test]
    async fn tuner_output_stays_dispatchable() {
        let c = NodeExecutorController::with_defaults();
        let tuner = ConcurrencyTuner::new(usize::MAX);

        assert_eq!(tuner.tune(&c, 2).unwrap(), MAX_CONCURRENCY);
        assert_eq!(c.maximum_concurrency(), MAX_CONCURRENCY);

        let ok = service_fn(|job: Arc<Job>| async move {
            Ok::<usize, DispatchError>(job.item_count())
        });
        let report = c.execute(&graph(3), ok).await;
        assert!(report.is_success());
        assert_eq!(report.outcomes.len(), 1);
    }

    #[test]
    fn tuner_treats_zero_jobs_per_node_as_one() {
        let tuner = ConcurrencyTuner::new(0);
        assert_eq!(tuner.jobs_per_node(), 1);
        assert_eq!(tuner.concurrency_for(5), 5);
        assert_eq!(ConcurrencyTuner::default().concurrency_for(0), 1);
    }
}
