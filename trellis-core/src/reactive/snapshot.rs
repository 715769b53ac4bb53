//! Dependency snapshots.
//!
//! A snapshot freezes the revision of every pair in a [`DependencySet`].
//! Consumers take one when they disconnect; on reconnect, if no pair has been
//! written since, they can resubscribe the same set instead of re-running.

use super::registry::{DependencySet, Registry, Revision};

/// Revisions of a dependency set at capture time.
#[derive(Debug, Clone)]
pub struct Snapshot {
    deps: DependencySet,
    revisions: Vec<Revision>,
}

impl Snapshot {
    pub(crate) fn capture(registry: &Registry, deps: DependencySet) -> Self {
        let revisions = deps
            .iter()
            .map(|(source, key)| registry.revision(source.id(), key))
            .collect();
        Self { deps, revisions }
    }

    /// Whether nothing in the set has been written since capture.
    ///
    /// A source that no longer exists counts as changed.
    pub(crate) fn is_current_in(&self, registry: &Registry) -> bool {
        self.deps
            .iter()
            .zip(&self.revisions)
            .all(|((source, key), captured)| {
                source.is_alive() && registry.revision(source.id(), key) == *captured
            })
    }

    pub fn dependencies(&self) -> &DependencySet {
        &self.deps
    }

    pub fn into_dependencies(self) -> DependencySet {
        self.deps
    }

    pub fn len(&self) -> usize {
        self.revisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::callback::Callback;
    use crate::reactive::source::SourceRef;
    use std::rc::Rc;

    #[test]
    fn detects_writes_to_captured_pairs_only() {
        let object = Rc::new(0);
        let source = SourceRef::of(&object);
        let mut deps = DependencySet::new();
        deps.insert(source.clone(), "a".into());

        let mut registry = Registry::new();
        registry.commit(&Callback::new(|| {}), deps.clone());

        let snapshot = Snapshot::capture(&registry, deps);
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.is_current_in(&registry));

        registry.record_write(&source, &"unrelated".into());
        assert!(snapshot.is_current_in(&registry));

        registry.record_write(&source, &"a".into());
        assert!(!snapshot.is_current_in(&registry));
    }

    #[test]
    fn dead_source_counts_as_changed() {
        let object = Rc::new(0);
        let mut deps = DependencySet::new();
        deps.insert(SourceRef::of(&object), "a".into());

        let registry = Registry::new();
        let snapshot = Snapshot::capture(&registry, deps);
        assert!(snapshot.is_current_in(&registry));

        drop(object);
        assert!(!snapshot.is_current_in(&registry));
    }
}
