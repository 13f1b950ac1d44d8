use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_GROUP_ID: AtomicU64 = AtomicU64::new(1);

/// A bucket of functions that must never both appear on one resolution chain.
///
/// Groups are only ever created by [`ExclusionGroups`](super::ExclusionGroups),
/// which guarantees a single instance per key. Equality is identity.
pub struct ExclusionGroup {
    id: u64,
    display_name: Option<String>,
}

impl ExclusionGroup {
    pub(crate) fn new(display_name: Option<String>) -> Self {
        Self {
            id: NEXT_GROUP_ID.fetch_add(1, Ordering::Relaxed),
            display_name,
        }
    }

    /// Process-unique synthetic identifier.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Diagnostic name, if the key extractor supplied one.
    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }
}

impl PartialEq for ExclusionGroup {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ExclusionGroup {}

impl fmt::Debug for ExclusionGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExclusionGroup")
            .field("id", &self.id)
            .field("display_name", &self.display_name)
            .finish()
    }
}

impl fmt::Display for ExclusionGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.display_name {
            Some(name) => write!(f, "{name}"),
            None => write!(f, "exclusion-group-{}", self.id),
        }
    }
}

/// Immutable set of exclusion groups present on a resolution chain.
///
/// Extending a path returns a new path; the parent is left untouched so that
/// sibling branches of the resolution tree can share it.
#[derive(Debug, Clone, Default)]
pub struct ExclusionPath {
    groups: Vec<Arc<ExclusionGroup>>,
}

impl ExclusionPath {
    /// The empty chain at a root requirement.
    #[must_use]
    pub fn root() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn contains(&self, group: &ExclusionGroup) -> bool {
        self.groups.iter().any(|g| g.id == group.id)
    }

    /// Returns the path extended by `group`, or `None` if it is already present.
    #[must_use]
    pub fn extended(&self, group: Arc<ExclusionGroup>) -> Option<Self> {
        if self.contains(&group) {
            return None;
        }
        let mut groups = Vec::with_capacity(self.groups.len() + 1);
        groups.extend(self.groups.iter().cloned());
        groups.push(group);
        Some(Self { groups })
    }

    /// Groups in the order they were entered.
    #[must_use]
    pub fn groups(&self) -> &[Arc<ExclusionGroup>] {
        &self.groups
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
