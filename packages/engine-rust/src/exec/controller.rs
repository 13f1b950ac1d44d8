//! Node executor controller: partitions graphs into jobs and drives their
//! dispatch under the live [`ExecutorConfig`].

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use calcgrid_core::{DependencyGraph, GraphId, GraphNode, Job, JobId};
use dashmap::DashMap;
use tokio::sync::Semaphore;
use tower::{Service, ServiceExt};
use tracing::{debug, info};

use super::config::ExecutorConfig;
use super::dispatch::DispatchError;
use super::partition::{partition, PartitionPlan};
use super::stats::ExecutionStatistics;

type PlanCache = DashMap<GraphId, Arc<PartitionPlan>>;

/// Result of dispatching one job.
#[derive(Debug)]
pub struct JobOutcome<R> {
    pub job_id: JobId,
    pub items: usize,
    pub cost: u64,
    pub result: Result<R, DispatchError>,
}

/// Per-job outcomes of one [`NodeExecutorController::execute`] pass, in job
/// order.
#[derive(Debug)]
pub struct ExecutionReport<R> {
    pub graph_id: GraphId,
    pub config_version: u64,
    pub outcomes: Vec<JobOutcome<R>>,
}

impl<R> ExecutionReport<R> {
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }
}

/// Partitions dependency graphs and dispatches the resulting jobs.
///
/// Plans are memoized per graph id and tagged with the configuration version
/// they were cut under. Every accepted configuration write clears the cache,
/// and a plan whose version no longer matches is never served.
pub struct NodeExecutorController {
    config: Arc<ExecutorConfig>,
    plans: Arc<PlanCache>,
    stats: Arc<ExecutionStatistics>,
}

impl NodeExecutorController {
    #[must_use]
    pub fn new(config: Arc<ExecutorConfig>) -> Self {
        let plans: Arc<PlanCache> = Arc::new(DashMap::new());
        let weak: Weak<PlanCache> = Arc::downgrade(&plans);
        config.on_change(move |snapshot| {
            if let Some(plans) = weak.upgrade() {
                plans.clear();
                debug!(version = snapshot.version, "partition plans invalidated");
            }
        });
        Self {
            config,
            plans,
            stats: Arc::new(ExecutionStatistics::new()),
        }
    }

    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(Arc::new(ExecutorConfig::default()))
    }

    #[must_use]
    pub fn config(&self) -> &Arc<ExecutorConfig> {
        &self.config
    }

    #[must_use]
    pub fn statistics(&self) -> &ExecutionStatistics {
        &self.stats
    }

    /// Partitions `nodes` under the current configuration snapshot. Not
    /// memoized.
    #[must_use]
    pub fn partition(&self, nodes: &[Arc<GraphNode>]) -> Vec<Job> {
        let snapshot = self.config.snapshot();
        let jobs = partition(nodes, &snapshot.limits);
        self.record_pass(nodes.len(), jobs.len(), snapshot.version);
        jobs
    }

    /// Returns the plan for `graph`, reusing a cached one if it was cut under
    /// the live configuration version.
    pub fn plan(&self, graph: &DependencyGraph) -> Arc<PartitionPlan> {
        let snapshot = self.config.snapshot();
        if let Some(cached) = self.plans.get(&graph.id()) {
            if cached.config_version() == snapshot.version {
                return Arc::clone(cached.value());
            }
        }

        let plan = Arc::new(PartitionPlan::build(graph.id(), graph.nodes(), &snapshot));
        self.record_pass(graph.len(), plan.jobs().len(), snapshot.version);
        self.remember(&plan);
        plan
    }

    /// Caches `plan` unless the configuration moved on while it was cut; a
    /// write that landed meanwhile has already cleared the cache.
    fn remember(&self, plan: &Arc<PartitionPlan>) -> bool {
        if self.config.version() != plan.config_version() {
            return false;
        }
        self.plans.insert(plan.graph_id(), Arc::clone(plan));
        true
    }

    /// Drops every memoized plan.
    pub fn invalidate(&self) {
        self.plans.clear();
    }

    /// Number of memoized plans.
    #[must_use]
    pub fn cached_plans(&self) -> usize {
        self.plans.len()
    }

    /// Dispatches every job of `graph`'s plan through `dispatcher`, keeping at
    /// most `max_concurrency` jobs in flight. The bound is read once from the
    /// snapshot the plan was cut under.
    ///
    /// A failed or panicked dispatch only affects its own [`JobOutcome`].
    pub async fn execute<S>(
        &self,
        graph: &DependencyGraph,
        dispatcher: S,
    ) -> ExecutionReport<S::Response>
    where
        S: Service<Arc<Job>, Error = DispatchError> + Clone + Send + 'static,
        S::Future: Send + 'static,
        S::Response: Send + 'static,
    {
        let plan = self.plan(graph);
        let permits = Arc::new(Semaphore::new(plan.limits().max_concurrency));
        let mut in_flight = Vec::with_capacity(plan.jobs().len());

        for job in plan.jobs() {
            let permit = match Arc::clone(&permits).acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    in_flight.push((Arc::clone(job), Err(DispatchError::Failed(e.into()))));
                    continue;
                }
            };
            let service = dispatcher.clone();
            let stats = Arc::clone(&self.stats);
            let task_job = Arc::clone(job);
            let handle = tokio::spawn(async move {
                let _permit = permit;
                let start = Instant::now();
                let result = service.oneshot(Arc::clone(&task_job)).await;
                stats.record_job(&task_job, result.is_ok(), start.elapsed());
                result
            });
            in_flight.push((Arc::clone(job), Ok(handle)));
        }

        let mut outcomes = Vec::with_capacity(in_flight.len());
        for (job, spawned) in in_flight {
            let result = match spawned {
                Ok(handle) => match handle.await {
                    Ok(result) => result,
                    Err(join_err) => {
                        self.stats.record_job(&job, false, Duration::ZERO);
                        Err(DispatchError::Failed(anyhow::anyhow!(
                            "dispatch of job {} aborted: {join_err}",
                            job.id()
                        )))
                    }
                },
                Err(e) => Err(e),
            };
            outcomes.push(JobOutcome {
                job_id: job.id(),
                items: job.item_count(),
                cost: job.cost(),
                result,
            });
        }

        let report = ExecutionReport {
            graph_id: plan.graph_id(),
            config_version: plan.config_version(),
            outcomes,
        };
        info!(
            graph_id = %report.graph_id,
            jobs = report.outcomes.len(),
            succeeded = report.succeeded(),
            failed = report.failed(),
            "execution pass finished"
        );
        report
    }

    fn record_pass(&self, nodes: usize, jobs: usize, version: u64) {
        self.stats.record_partition();
        metrics::counter!("calcgrid_partition_jobs_total").increment(jobs as u64);
        info!(nodes, jobs, config_version = version, "partition pass");
    }
}

impl Default for NodeExecutorController {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for NodeExecutorController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeExecutorController")
            .field("config", &self.config)
            .field("cached_plans", &self.plans.len())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
