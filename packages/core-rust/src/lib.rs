//! `calcgrid` core: computation function handles, resolved dependency graphs, and jobs.

pub mod function;
pub mod graph;
pub mod job;

pub use function::{function_address, same_function, ComputationFunction, FunctionRef, StaticFunction};
pub use graph::{Cost, DependencyGraph, GraphError, GraphId, GraphNode, NodeId};
pub use job::{Job, JobId};
