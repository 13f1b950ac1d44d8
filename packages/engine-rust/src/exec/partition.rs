//! Greedy, single-pass partitioning of a topologically ordered node sequence
//! into jobs.
//!
//! Rules, applied while walking the nodes in order:
//! 1. A node that would push the open job's cost past `max_job_cost` first
//!    closes the open job (if it holds anything).
//! 2. The node joins the open job.
//! 3. The open job closes as soon as it holds `max_job_items` nodes or its
//!    cost reaches `max_job_cost`.
//!
//! A trailing job that meets neither minimum is folded into its predecessor
//! when the merged job still respects both maximums; otherwise it is emitted
//! as is. Nodes are never dropped, duplicated, or reordered.

use std::mem;
use std::sync::Arc;

use calcgrid_core::{Cost, GraphId, GraphNode, Job};

use super::config::{ConfigSnapshot, JobLimits};

/// Splits `nodes` into jobs under `limits`.
///
/// Returns an empty sequence only for empty input.
#[must_use]
pub fn partition(nodes: &[Arc<GraphNode>], limits: &JobLimits) -> Vec<Job> {
    let mut jobs = Vec::new();
    let mut open: Vec<Arc<GraphNode>> = Vec::new();
    let mut open_cost: Cost = 0;

    for node in nodes {
        if !open.is_empty() && open_cost.saturating_add(node.cost()) > limits.max_job_cost {
            jobs.push(Job::new(mem::take(&mut open)));
            open_cost = 0;
        }

        open_cost = open_cost.saturating_add(node.cost());
        open.push(Arc::clone(node));

        if open.len() >= limits.max_job_items || open_cost >= limits.max_job_cost {
            jobs.push(Job::new(mem::take(&mut open)));
            open_cost = 0;
        }
    }

    if !open.is_empty() {
        let tail = fold_small_tail(&mut jobs, open, open_cost, limits);
        jobs.push(tail);
    }
    jobs
}

/// Merges an undersized trailing run into the last emitted job if the merged
/// job stays within both maximums; returns the job to emit last.
fn fold_small_tail(
    jobs: &mut Vec<Job>,
    tail: Vec<Arc<GraphNode>>,
    tail_cost: Cost,
    limits: &JobLimits,
) -> Job {
    let undersized = tail.len() < limits.min_job_items && tail_cost < limits.min_job_cost;
    let fits = jobs.last().is_some_and(|prev| {
        prev.item_count() + tail.len() <= limits.max_job_items
            && prev.cost().saturating_add(tail_cost) <= limits.max_job_cost
    });

    if undersized && fits {
        if let Some(prev) = jobs.pop() {
            let mut merged = prev.nodes().to_vec();
            merged.extend(tail);
            return Job::new(merged);
        }
    }
    Job::new(tail)
}

/// The jobs cut from one graph under one configuration snapshot.
#[derive(Debug, Clone)]
pub struct PartitionPlan {
    graph_id: GraphId,
    config_version: u64,
    limits: JobLimits,
    jobs: Vec<Arc<Job>>,
}

impl PartitionPlan {
    /// Partitions `nodes` under `snapshot`.
    #[must_use]
    pub fn build(graph_id: GraphId, nodes: &[Arc<GraphNode>], snapshot: &ConfigSnapshot) -> Self {
        let jobs = partition(nodes, &snapshot.limits)
            .into_iter()
            .map(Arc::new)
            .collect();
        Self {
            graph_id,
            config_version: snapshot.version,
            limits: snapshot.limits,
            jobs,
        }
    }

    #[must_use]
    pub fn graph_id(&self) -> GraphId {
        self.graph_id
    }

    /// Configuration version the plan was computed under.
    #[must_use]
    pub fn config_version(&self) -> u64 {
        self.config_version
    }

    /// Limits the plan was computed under.
    #[must_use]
    pub fn limits(&self) -> &JobLimits {
        &self.limits
    }

    /// Jobs in dispatch order.
    #[must_use]
    pub fn jobs(&self) -> &[Arc<Job>] {
        &self.jobs
    }

    /// Total number of nodes across all jobs.
    #[must_use]
    pub fn item_count(&self) -> usize {
        self.jobs.iter().map(|j| j.item_count()).sum()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use calcgrid_core::{NodeId, StaticFunction};
    use proptest::prelude::*;

    use super::*;

    fn nodes(costs: &[Cost]) -> Vec<Arc<GraphNode>> {
        let f = StaticFunction::new("f").into_ref();
        costs
            .iter()
            .enumerate()
            .map(|(i, &cost)| {
                let id = NodeId(u32::try_from(i).unwrap());
                Arc::new(GraphNode::new(id, f.clone(), cost))
            })
            .collect()
    }

    fn limits(max_items: usize, max_cost: Cost) -> JobLimits {
        JobLimits {
            min_job_items: 1,
            max_job_items: max_items,
            min_job_cost: 0,
            max_job_cost: max_cost,
            max_concurrency: 4,
        }
    }

    fn sizes(jobs: &[Job]) -> Vec<usize> {
        jobs.iter().map(Job::item_count).collect()
    }

    #[test]
    fn item_bound_splits_three_and_two() {
        let jobs = partition(&nodes(&[1, 1, 1, 1, 1]), &limits(3, 1000));
        assert_eq!(sizes(&jobs), vec![3, 2]);
    }

    #[test]
    fn cost_bound_isolates_expensive_nodes() {
        let jobs = partition(&nodes(&[500, 500, 500]), &limits(100, 600));
        assert_eq!(sizes(&jobs), vec![1, 1, 1]);
        assert!(jobs.iter().all(|j| j.cost() == 500));
    }

    #[test]
    fn oversized_node_gets_its_own_job() {
        let jobs = partition(&nodes(&[10, 5_000, 10]), &limits(100, 600));
        assert_eq!(sizes(&jobs), vec![1, 1, 1]);
        assert_eq!(jobs[1].cost(), 5_000);
    }

    #[test]
    fn job_closes_when_cost_reaches_bound() {
        let jobs = partition(&nodes(&[300, 300, 1]), &limits(100, 600));
        assert_eq!(sizes(&jobs), vec![2, 1]);
        assert_eq!(jobs[0].cost(), 600);
    }

    #[test]
    fn empty_input_yields_no_jobs() {
        assert!(partition(&[], &limits(3, 100)).is_empty());
    }

    #[test]
    fn undersized_zero_cost_tail_is_folded() {
        let mut l = limits(10, 100);
        l.min_job_items = 3;
        l.min_job_cost = 50;
        // The first job closes on cost; the tail adds nothing to its cost.
        let jobs = partition(&nodes(&[60, 40, 0]), &l);
        assert_eq!(sizes(&jobs), vec![3]);
        assert_eq!(jobs[0].cost(), 100);
    }

    #[test]
    fn undersized_tail_kept_when_merge_would_overflow() {
        let mut l = limits(3, 1000);
        l.min_job_items = 3;
        l.min_job_cost = 100;
        let jobs = partition(&nodes(&[1, 1, 1, 1]), &l);
        assert_eq!(sizes(&jobs), vec![3, 1]);
    }

    #[test]
    fn plan_records_snapshot() {
        let snapshot = ConfigSnapshot {
            version: 7,
            limits: limits(2, 1000),
        };
        let graph_id = GraphId::new_random();
        let plan = PartitionPlan::build(graph_id, &nodes(&[1, 1, 1]), &snapshot);

        assert_eq!(plan.graph_id(), graph_id);
        assert_eq!(plan.config_version(), 7);
        assert_eq!(plan.limits().max_job_items, 2);
        assert_eq!(plan.jobs().len(), 2);
        assert_eq!(plan.item_count(), 3);
    }

    fn arb_limits() -> impl Strategy<Value = JobLimits> {
        (1usize..20, 0usize..20, 0u64..2_000, 0u64..2_000, 1usize..8).prop_map(
            |(max_items, min_items, cost_a, cost_b, concurrency)| JobLimits {
                min_job_items: min_items.min(max_items),
                max_job_items: max_items,
                min_job_cost: cost_a.min(cost_b),
                max_job_cost: cost_a.max(cost_b),
                max_concurrency: concurrency,
            },
        )
    }

    proptest! {
        #[test]
        fn concatenation_reproduces_input(
            costs in proptest::collection::vec(0u64..1_000, 0..200),
            limits in arb_limits(),
        ) {
            let input = nodes(&costs);
            let jobs = partition(&input, &limits);

            let output: Vec<NodeId> = jobs.iter().flat_map(|j| j.node_ids()).collect();
            let expected: Vec<NodeId> = input.iter().map(|n| n.id()).collect();
            prop_assert_eq!(output, expected);
            prop_assert!(jobs.iter().all(|j| j.item_count() > 0));
        }

        #[test]
        fn multi_node_jobs_respect_maximums(
            costs in proptest::collection::vec(0u64..1_000, 0..200),
            limits in arb_limits(),
        ) {
            for job in partition(&nodes(&costs), &limits) {
                prop_assert!(job.item_count() <= limits.max_job_items);
                if job.item_count() > 1 {
                    prop_assert!(job.cost() <= limits.max_job_cost);
                }
            }
        }
    }
}
