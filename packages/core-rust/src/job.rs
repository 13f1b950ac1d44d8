//! Jobs: contiguous runs of graph nodes dispatched as one unit of work.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::graph::{Cost, GraphNode, NodeId};

/// Unique identifier of an emitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    #[must_use]
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// An immutable, ordered batch of graph nodes.
///
/// The node order is the topological order of the graph the job was cut
/// from, and is preserved by every consumer.
#[derive(Debug, Clone)]
pub struct Job {
    id: JobId,
    nodes: Vec<Arc<GraphNode>>,
    cost: Cost,
}

impl Job {
    /// Builds a job over `nodes`, computing its aggregate cost.
    #[must_use]
    pub fn new(nodes: Vec<Arc<GraphNode>>) -> Self {
        let cost = nodes
            .iter()
            .fold(0, |acc: Cost, n| acc.saturating_add(n.cost()));
        Self {
            id: JobId::new_random(),
            nodes,
            cost,
        }
    }

    #[must_use]
    pub fn id(&self) -> JobId {
        self.id
    }

    #[must_use]
    pub fn nodes(&self) -> &[Arc<GraphNode>] {
        &self.nodes
    }

    /// Number of graph nodes in the job.
    #[must_use]
    pub fn item_count(&self) -> usize {
        self.nodes.len()
    }

    /// Aggregate cost of all nodes in the job.
    #[must_use]
    pub fn cost(&self) -> Cost {
        self.cost
    }

    /// Node identifiers in execution order.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.iter().map(|n| n.id())
    }
}
