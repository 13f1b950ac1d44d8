use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use calcgrid_core::{function_address, same_function, ComputationFunction, FunctionRef};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use super::group::{ExclusionGroup, ExclusionPath};

// ---------------------------------------------------------------------------
// ExclusionKeyExtractor
// ---------------------------------------------------------------------------

/// Derives the exclusion key of a function from its static properties.
///
/// Returning `None` means the function takes part in no exclusion
/// constraint. Implementations must be total: a function whose key cannot be
/// derived is reported as `None`, never as a panic.
pub trait ExclusionKeyExtractor: Send + Sync {
    /// Grouping key. The key space is expected to be small and finite.
    type Key: Eq + Hash + Clone + Send + Sync + fmt::Debug + 'static;

    /// Derives the key of `function`.
    fn key_of(&self, function: &dyn ComputationFunction) -> Option<Self::Key>;

    /// Diagnostic name for the group created for `key`. Default is none.
    fn display_name(&self, _key: &Self::Key) -> Option<String> {
        None
    }
}

/// Groups functions by [`ComputationFunction::exclusion_category`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CategoryExclusion;

impl ExclusionKeyExtractor for CategoryExclusion {
    type Key = String;

    fn key_of(&self, function: &dyn ComputationFunction) -> Option<String> {
        function.exclusion_category().map(str::to_owned)
    }

    fn display_name(&self, key: &String) -> Option<String> {
        Some(key.clone())
    }
}

/// Adapts a closure into an [`ExclusionKeyExtractor`].
pub struct FnExclusion<F, K> {
    extract: F,
    _key: PhantomData<fn() -> K>,
}

impl<F, K> FnExclusion<F, K>
where
    F: Fn(&dyn ComputationFunction) -> Option<K> + Send + Sync,
{
    pub fn new(extract: F) -> Self {
        Self {
            extract,
            _key: PhantomData,
        }
    }
}

impl<F, K> ExclusionKeyExtractor for FnExclusion<F, K>
where
    F: Fn(&dyn ComputationFunction) -> Option<K> + Send + Sync,
    K: Eq + Hash + Clone + Send + Sync + fmt::Debug + 'static,
{
    type Key = K;

    fn key_of(&self, function: &dyn ComputationFunction) -> Option<K> {
        (self.extract)(function)
    }
}

// ---------------------------------------------------------------------------
// ExclusionGroups
// ---------------------------------------------------------------------------

/// Cache inserts between opportunistic purges of dead function entries.
const PURGE_INTERVAL: usize = 256;

/// Cached function -> group assignment.
///
/// Holds the function weakly: the entry never keeps a function alive, and
/// the allocation address it is keyed under cannot be reused while the weak
/// reference exists.
struct FunctionEntry {
    function: Weak<dyn ComputationFunction>,
    group: Option<Arc<ExclusionGroup>>,
}

impl FunctionEntry {
    fn is_for(&self, function: &FunctionRef) -> bool {
        self.function
            .upgrade()
            .is_some_and(|live| same_function(&live, function))
    }
}

/// Memoizing registry of exclusion groups.
///
/// Two caches back the lookup:
/// - **function -> group** (`DashMap` keyed by allocation address, weak on
///   the function): unconstrained functions record a `None` marker, so
///   repeated lookups cost one shard read and never touch the group table.
/// - **key -> group** (`DashMap`, strong): one group per key, created
///   first-writer-wins under the shard lock of the key's entry.
///
/// Lookups never fail. Entries of dropped functions are swept every
/// `PURGE_INTERVAL` cache inserts, so repeated catalog reloads do not grow
/// the function cache without bound; [`purge`](Self::purge) sweeps on demand.
pub struct ExclusionGroups<E: ExclusionKeyExtractor> {
    extractor: E,
    by_function: DashMap<usize, FunctionEntry>,
    by_key: DashMap<E::Key, Arc<ExclusionGroup>>,
    inserts: AtomicUsize,
}

impl<E: ExclusionKeyExtractor> ExclusionGroups<E> {
    /// Creates an empty registry using `extractor` to derive keys.
    #[must_use]
    pub fn new(extractor: E) -> Self {
        Self {
            extractor,
            by_function: DashMap::new(),
            by_key: DashMap::new(),
            inserts: AtomicUsize::new(0),
        }
    }

    /// Returns the exclusion group of `function`, or `None` if it has no key.
    ///
    /// Repeated calls for the same function return the same group instance
    /// for the lifetime of the function.
    pub fn exclusion_group_of(&self, function: &FunctionRef) -> Option<Arc<ExclusionGroup>> {
        let address = function_address(function);
        if let Some(entry) = self.by_function.get(&address) {
            if entry.is_for(function) {
                return entry.group.clone();
            }
        }

        let group = self.resolve(function);
        self.by_function.insert(
            address,
            FunctionEntry {
                function: Arc::downgrade(function),
                group: group.clone(),
            },
        );
        if (self.inserts.fetch_add(1, Ordering::Relaxed) + 1) % PURGE_INTERVAL == 0 {
            self.purge();
        }
        group
    }

    fn resolve(&self, function: &FunctionRef) -> Option<Arc<ExclusionGroup>> {
        let key = self.extractor.key_of(function.as_ref())?;
        if let Some(existing) = self.by_key.get(&key) {
            return Some(Arc::clone(existing.value()));
        }

        // Losers of a creation race land in the Occupied arm and adopt the winner.
        let group = match self.by_key.entry(key) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                let group = Arc::new(ExclusionGroup::new(self.extractor.display_name(entry.key())));
                debug!(
                    group_id = group.id(),
                    key = ?entry.key(),
                    function = function.function_id(),
                    "created exclusion group"
                );
                entry.insert(Arc::clone(&group));
                group
            }
        };
        Some(group)
    }

    /// Returns `true` if `function`'s group is already present on `path`.
    pub fn is_excluded(&self, path: &ExclusionPath, function: &FunctionRef) -> bool {
        self.exclusion_group_of(function)
            .is_some_and(|group| path.contains(&group))
    }

    /// Admits `function` onto the resolution chain described by `path`.
    ///
    /// Returns `None` when the edge must be rejected because the function's
    /// group already occurs on the chain. Otherwise returns the path the
    /// function's own inputs should be resolved under: `path` extended by the
    /// function's group, or `path` itself for unconstrained functions.
    pub fn admit(&self, path: &ExclusionPath, function: &FunctionRef) -> Option<ExclusionPath> {
        match self.exclusion_group_of(function) {
            Some(group) => path.extended(group),
            None => Some(path.clone()),
        }
    }

    /// Drops cached assignments for functions that are no longer reachable.
    ///
    /// Intended to run after a function catalog reload. Returns the number of
    /// entries removed. Groups are kept; they are owned by the key table.
    pub fn purge(&self) -> usize {
        let before = self.by_function.len();
        self.by_function
            .retain(|_, entry| entry.function.strong_count() > 0);
        let removed = before.saturating_sub(self.by_function.len());
        if removed > 0 {
            debug!(removed, "purged unreachable functions from exclusion cache");
        }
        removed
    }

    /// Number of cached function assignments (including unconstrained ones).
    #[must_use]
    pub fn len_functions(&self) -> usize {
        self.by_function.len()
    }

    /// Number of groups created so far.
    #[must_use]
    pub fn len_groups(&self) -> usize {
        self.by_key.len()
    }

    /// The key extractor in use.
    pub fn extractor(&self) -> &E {
        &self.extractor
    }
}

impl Default for ExclusionGroups<CategoryExclusion> {
    fn default() -> Self {
        Self::new(CategoryExclusion)
    }
}

impl<E: ExclusionKeyExtractor> fmt::Debug for ExclusionGroups<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExclusionGroups")
            .field("functions", &self.by_function.len())
            .field("groups", &self.by_key.len())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
