//! Computation function handles.
//!
//! A function is an opaque unit of computation registered once in the
//! function catalog. Identity is the identity of the shared allocation: two
//! [`FunctionRef`]s denote the same function only if they point at the same
//! `Arc`, regardless of what `function_id` reports.

use std::fmt;
use std::sync::Arc;

/// A unit of computation referenced by dependency graph nodes.
///
/// Implementations are immutable once registered. The scheduling core never
/// invokes the computation itself; it only reads the static properties exposed
/// here.
pub trait ComputationFunction: Send + Sync + fmt::Debug {
    /// Catalog identifier, used for diagnostics only.
    fn function_id(&self) -> &str;

    /// Static category tag used by category-based exclusion.
    ///
    /// Functions returning `None` are unconstrained.
    fn exclusion_category(&self) -> Option<&str> {
        None
    }
}

/// Shared handle to a registered function.
pub type FunctionRef = Arc<dyn ComputationFunction>;

/// Returns `true` if both handles refer to the same function instance.
///
/// Compares data pointers only, so two handles created through different
/// trait-object coercions of one allocation still compare equal.
#[must_use]
pub fn same_function(a: &FunctionRef, b: &FunctionRef) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a).cast::<()>(),
        Arc::as_ptr(b).cast::<()>(),
    )
}

/// Address of the function allocation, stable while any strong handle lives.
#[must_use]
pub fn function_address(function: &FunctionRef) -> usize {
    Arc::as_ptr(function).cast::<()>() as usize
}

/// Plain catalog entry carrying an identifier and an optional category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticFunction {
    id: String,
    category: Option<String>,
}

impl StaticFunction {
    /// Creates an unconstrained function.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            category: None,
        }
    }

    /// Sets the exclusion category.
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Wraps this entry into a shared [`FunctionRef`].
    #[must_use]
    pub fn into_ref(self) -> FunctionRef {
        Arc::new(self)
    }
}

impl ComputationFunction for StaticFunction {
    fn function_id(&self) -> &str {
        &self.id
    }

    fn exclusion_category(&self) -> Option<&str> {
        self.category.as_deref()
    }
}
