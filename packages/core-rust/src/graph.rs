//! Resolved dependency graph, as consumed by the job partitioner.
//!
//! Graph construction is performed elsewhere; this module only holds the
//! result: nodes in a fixed topological order, each naming the function it
//! runs, the nodes whose outputs it consumes, and a cost estimate.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::function::FunctionRef;

/// Unit-less, monotonic cost estimate of executing a node.
pub type Cost = u64;

/// Identifier of a node within one dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

/// A node of a resolved dependency graph.
#[derive(Debug, Clone)]
pub struct GraphNode {
    id: NodeId,
    function: FunctionRef,
    inputs: Vec<NodeId>,
    cost: Cost,
}

impl GraphNode {
    /// Creates a node with no inputs.
    pub fn new(id: NodeId, function: FunctionRef, cost: Cost) -> Self {
        Self {
            id,
            function,
            inputs: Vec::new(),
            cost,
        }
    }

    /// Sets the nodes whose outputs this node consumes, in order.
    #[must_use]
    pub fn with_inputs(mut self, inputs: impl IntoIterator<Item = NodeId>) -> Self {
        self.inputs = inputs.into_iter().collect();
        self
    }

    #[must_use]
    pub fn id(&self) -> NodeId {
        self.id
    }

    #[must_use]
    pub fn function(&self) -> &FunctionRef {
        &self.function
    }

    #[must_use]
    pub fn inputs(&self) -> &[NodeId] {
        &self.inputs
    }

    #[must_use]
    pub fn cost(&self) -> Cost {
        self.cost
    }
}

/// Identity of a resolved graph, used to memoize partition plans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GraphId(pub Uuid);

impl GraphId {
    /// Generates a fresh random graph identity.
    #[must_use]
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for GraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Errors detected while accepting a node ordering.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("node {id} appears more than once")]
    DuplicateNode { id: NodeId },
    #[error("node {node} consumes {input}, which is ordered after it")]
    ForwardInput { node: NodeId, input: NodeId },
    #[error("node {node} consumes unknown node {input}")]
    UnknownInput { node: NodeId, input: NodeId },
}

/// A resolved graph whose node sequence is a valid topological order.
///
/// Construction checks that every input of a node appears earlier in the
/// sequence, so consumers may rely on prefix-closure: any prefix of
/// [`nodes`](Self::nodes) contains all producers its members depend on.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    id: GraphId,
    nodes: Vec<Arc<GraphNode>>,
}

impl DependencyGraph {
    /// Accepts `nodes` under a freshly generated identity.
    ///
    /// # Errors
    ///
    /// Returns a [`GraphError`] if a node id repeats or if a node consumes a
    /// node that is not ordered before it.
    pub fn new(nodes: Vec<GraphNode>) -> Result<Self, GraphError> {
        Self::with_id(GraphId::new_random(), nodes)
    }

    /// Accepts `nodes` under a caller-supplied identity.
    ///
    /// Reusing an identity across compilation cycles lets partition plans be
    /// memoized for the same graph.
    ///
    /// # Errors
    ///
    /// See [`DependencyGraph::new`].
    pub fn with_id(id: GraphId, nodes: Vec<GraphNode>) -> Result<Self, GraphError> {
        let mut all = HashSet::with_capacity(nodes.len());
        for node in &nodes {
            if !all.insert(node.id) {
                return Err(GraphError::DuplicateNode { id: node.id });
            }
        }

        let mut seen = HashSet::with_capacity(nodes.len());
        for node in &nodes {
            for &input in &node.inputs {
                if !seen.contains(&input) {
                    return Err(if all.contains(&input) {
                        GraphError::ForwardInput {
                            node: node.id,
                            input,
                        }
                    } else {
                        GraphError::UnknownInput {
                            node: node.id,
                            input,
                        }
                    });
                }
            }
            seen.insert(node.id);
        }

        Ok(Self {
            id,
            nodes: nodes.into_iter().map(Arc::new).collect(),
        })
    }

    #[must_use]
    pub fn id(&self) -> GraphId {
        self.id
    }

    /// Nodes in topological order.
    #[must_use]
    pub fn nodes(&self) -> &[Arc<GraphNode>] {
        &self.nodes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Sum of all node costs, saturating.
    #[must_use]
    pub fn total_cost(&self) -> Cost {
        self.nodes
            .iter()
            .fold(0, |acc: Cost, n| acc.saturating_add(n.cost))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::StaticFunction;

    fn node(id: u32, cost: Cost) -> GraphNode {
        GraphNode::new(NodeId(id), StaticFunction::new(format!("f{id}")).into_ref(), cost)
    }

    #[test]
    fn accepts_topological_order() {
        let graph = DependencyGraph::new(vec![
            node(1, 10),
            node(2, 5).with_inputs([NodeId(1)]),
            node(3, 1).with_inputs([NodeId(1), NodeId(2)]),
        ])
        .unwrap();

        assert_eq!(graph.len(), 3);
        assert_eq!(graph.total_cost(), 16);
        assert_eq!(graph.nodes()[2].inputs(), &[NodeId(1), NodeId(2)]);
    }

    #[test]
    fn rejects_forward_input() {
        let err = DependencyGraph::new(vec![node(1, 1).with_inputs([NodeId(2)]), node(2, 1)])
            .unwrap_err();
        assert_eq!(
            err,
            GraphError::ForwardInput {
                node: NodeId(1),
                input: NodeId(2)
            }
        );
    }

    #[test]
    fn rejects_unknown_input() {
        let err = DependencyGraph::new(vec![node(1, 1).with_inputs([NodeId(9)])]).unwrap_err();
        assert!(matches!(err, GraphError::UnknownInput { .. }));
    }

    #[test]
    fn rejects_duplicate_node() {
        let err = DependencyGraph::new(vec![node(1, 1), node(1, 2)]).unwrap_err();
        assert_eq!(err, GraphError::DuplicateNode { id: NodeId(1) });
    }

    #[test]
    fn total_cost_saturates() {
        let graph = DependencyGraph::new(vec![node(1, Cost::MAX), node(2, 5)]).unwrap();
        assert_eq!(graph.total_cost(), Cost::MAX);
    }

    #[test]
    fn caller_supplied_identity_is_kept() {
        let id = GraphId::new_random();
        let graph = DependencyGraph::with_id(id, vec![node(1, 1)]).unwrap();
        assert_eq!(graph.id(), id);
        assert!(!graph.is_empty());
    }

    proptest::proptest! {
        #[test]
        fn backward_inputs_are_always_accepted(
            costs in proptest::collection::vec(0u64..1_000, 1..40),
            picks in proptest::collection::vec(proptest::prelude::any::<u32>(), 40),
        ) {
            let mut nodes = Vec::with_capacity(costs.len());
            for (i, cost) in costs.iter().enumerate() {
                let id = u32::try_from(i).unwrap();
                let mut n = node(id, *cost);
                if id > 0 {
                    n = n.with_inputs([NodeId(picks[i] % id)]);
                }
                nodes.push(n);
            }
            let graph = DependencyGraph::new(nodes).unwrap();
            proptest::prop_assert_eq!(graph.len(), costs.len());
        }
    }
}
