//! Function exclusion groups.
//!
//! Graph construction can explode combinatorially when many interchangeable
//! "default" functions are allowed to chain through one another. Functions
//! sharing an exclusion key are placed in one [`ExclusionGroup`]; a
//! producer-to-consumer resolution chain may contain at most one function
//! from any group.
//!
//! - [`ExclusionGroups`]: memoizing registry mapping functions to groups
//! - [`ExclusionKeyExtractor`]: pluggable key derivation
//! - [`ExclusionPath`]: the set of groups already present on a resolution chain

pub mod group;
pub mod registry;

pub use group::{ExclusionGroup, ExclusionPath};
pub use registry::{CategoryExclusion, ExclusionGroups, ExclusionKeyExtractor, FnExclusion};
