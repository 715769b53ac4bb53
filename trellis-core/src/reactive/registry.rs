//! Dependency Registry
//!
//! The registry is the only shared mutable state of the tracking side. It is
//! a bidirectional multimap:
//!
//! - per `(source, key)` pair, the ordered set of consumers reading it, and
//! - per consumer, the [`DependencySet`] of its most recent tracked run.
//!
//! Both directions are kept consistent on every commit. Removing a consumer
//! walks only that consumer's own dependency set, so the cost is
//! proportional to what it read, not to the size of the registry.
//!
//! # Revisions
//!
//! A write to a pair that some consumer has read stamps it with the next
//! value of a registry-wide counter. The engine never sees property values,
//! so snapshots compare these stamps instead: a pair whose revision moved
//! since the snapshot was taken has been written. Keys nobody ever read are
//! not stamped.
//!
//! # Reclaiming entries
//!
//! A source entry holds only a weak reference, but that still pins the
//! allocation. Entries of dropped sources are removed as soon as their last
//! reader unsubscribes, and commits sweep the rest whenever the number of
//! entries doubles.

use std::collections::HashMap;

use indexmap::{IndexMap, IndexSet};
use smallvec::SmallVec;
use tracing::trace;

use super::callback::{Callback, CallbackId};
use super::source::{PropertyKey, SourceId, SourceRef};

/// Write stamp of a `(source, key)` pair. Zero means "never written".
pub type Revision = u64;

/// Entry count below which commits never sweep dead sources.
const PRUNE_FLOOR: usize = 64;

/// Keys read from one source.
#[derive(Debug, Clone)]
struct SourceDeps {
    source: SourceRef,
    keys: IndexSet<PropertyKey>,
}

/// The `(source, key)` pairs read during one tracked run.
///
/// Insertion-ordered and deduplicated. Sources are held weakly.
#[derive(Debug, Clone, Default)]
pub struct DependencySet {
    sources: IndexMap<SourceId, SourceDeps>,
}

impl DependencySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a read. Returns `false` if the pair was already present.
    pub fn insert(&mut self, source: SourceRef, key: PropertyKey) -> bool {
        self.sources
            .entry(source.id())
            .or_insert_with(|| SourceDeps {
                source,
                keys: IndexSet::new(),
            })
            .keys
            .insert(key)
    }

    pub fn contains(&self, source: SourceId, key: &PropertyKey) -> bool {
        self.sources
            .get(&source)
            .is_some_and(|deps| deps.keys.contains(key))
    }

    /// Number of `(source, key)` pairs.
    pub fn len(&self) -> usize {
        self.sources.values().map(|deps| deps.keys.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Number of distinct sources.
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Iterate over every recorded pair in read order.
    pub fn iter(&self) -> impl Iterator<Item = (&SourceRef, &PropertyKey)> {
        self.sources
            .values()
            .flat_map(|deps| deps.keys.iter().map(move |key| (&deps.source, key)))
    }
}

impl PartialEq for DependencySet {
    fn eq(&self, other: &Self) -> bool {
        self.sources.len() == other.sources.len()
            && self.sources.iter().all(|(id, deps)| {
                other
                    .sources
                    .get(id)
                    .is_some_and(|theirs| theirs.keys == deps.keys)
            })
    }
}

impl Eq for DependencySet {}

/// Per-source bookkeeping.
struct SourceEntry {
    source: SourceRef,
    subscribers: HashMap<PropertyKey, IndexSet<CallbackId>>,
    revisions: HashMap<PropertyKey, Revision>,
}

impl SourceEntry {
    fn new(source: SourceRef) -> Self {
        Self {
            source,
            subscribers: HashMap::new(),
            revisions: HashMap::new(),
        }
    }
}

/// A registered consumer.
struct ConsumerEntry {
    callback: Callback,
    deps: DependencySet,
}

/// Bidirectional map between tracked pairs and their consumers.
pub struct Registry {
    sources: HashMap<SourceId, SourceEntry>,
    consumers: HashMap<CallbackId, ConsumerEntry>,
    last_revision: Revision,
    /// Entry count at which the next commit sweeps dead sources.
    prune_at: usize,
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            sources: HashMap::new(),
            consumers: HashMap::new(),
            last_revision: 0,
            prune_at: PRUNE_FLOOR,
        }
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `deps` the dependency set of `callback`, replacing any previous
    /// one. Subscriptions that are no longer read are dropped.
    pub fn commit(&mut self, callback: &Callback, deps: DependencySet) {
        let id = callback.id();
        if let Some(previous) = self.consumers.remove(&id) {
            self.unsubscribe_all(id, &previous.deps);
        }

        for (source, key) in deps.iter() {
            if !source.is_alive() {
                continue;
            }
            let entry = self
                .sources
                .entry(source.id())
                .or_insert_with(|| SourceEntry::new(source.clone()));
            entry.revisions.entry(key.clone()).or_insert(0);
            entry.subscribers.entry(key.clone()).or_default().insert(id);
        }

        trace!(consumer = id.raw(), deps = deps.len(), "committed dependencies");
        self.consumers.insert(
            id,
            ConsumerEntry {
                callback: callback.clone(),
                deps,
            },
        );

        if self.sources.len() >= self.prune_at {
            let removed = self.prune();
            self.prune_at = (self.sources.len() * 2).max(PRUNE_FLOOR);
            trace!(removed, next = self.prune_at, "swept dead sources");
        }
    }

    /// Remove a consumer and every subscription it holds.
    ///
    /// Returns the dependency set it had, if it was registered.
    pub fn remove(&mut self, id: CallbackId) -> Option<DependencySet> {
        let entry = self.consumers.remove(&id)?;
        self.unsubscribe_all(id, &entry.deps);
        trace!(consumer = id.raw(), "removed consumer");
        Some(entry.deps)
    }

    fn unsubscribe_all(&mut self, id: CallbackId, deps: &DependencySet) {
        for (source, key) in deps.iter() {
            let source_id = source.id();
            let Some(entry) = self.sources.get_mut(&source_id) else {
                continue;
            };
            if let Some(subscribers) = entry.subscribers.get_mut(key) {
                subscribers.shift_remove(&id);
                if subscribers.is_empty() {
                    entry.subscribers.remove(key);
                }
            }
            // Snapshots treat a dead source as changed, so nothing needs it.
            if !entry.source.is_alive() {
                self.sources.remove(&source_id);
            }
        }
    }

    /// Stamp a write and collect the consumers to notify.
    ///
    /// The callbacks are returned rather than invoked so the caller can
    /// release its borrow of the registry first.
    pub fn record_write(&mut self, source: &SourceRef, key: &PropertyKey) -> SmallVec<[Callback; 8]> {
        let Some(entry) = self.sources.get_mut(&source.id()) else {
            return SmallVec::new();
        };
        let Some(revision) = entry.revisions.get_mut(key) else {
            return SmallVec::new();
        };
        self.last_revision += 1;
        *revision = self.last_revision;

        let Some(subscribers) = entry.subscribers.get(key) else {
            return SmallVec::new();
        };
        subscribers
            .iter()
            .filter_map(|id| self.consumers.get(id))
            .map(|consumer| consumer.callback.clone())
            .collect()
    }

    /// Current revision of a pair.
    pub fn revision(&self, source: SourceId, key: &PropertyKey) -> Revision {
        self.sources
            .get(&source)
            .and_then(|entry| entry.revisions.get(key))
            .copied()
            .unwrap_or(0)
    }

    /// The dependency set currently registered for a consumer.
    pub fn dependencies(&self, id: CallbackId) -> Option<&DependencySet> {
        self.consumers.get(&id).map(|entry| &entry.deps)
    }

    pub fn subscriber_count(&self, source: SourceId, key: &PropertyKey) -> usize {
        self.sources
            .get(&source)
            .and_then(|entry| entry.subscribers.get(key))
            .map_or(0, IndexSet::len)
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Drop entries for sources that no longer exist.
    ///
    /// Returns how many entries were removed.
    pub fn prune(&mut self) -> usize {
        let before = self.sources.len();
        self.sources.retain(|_, entry| entry.source.is_alive());
        before - self.sources.len()
    }
}
