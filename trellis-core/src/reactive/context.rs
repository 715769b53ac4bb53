//! Tracking Context Stack
//!
//! The context stack records which consumer is currently running so that
//! reads reported through `track_get` can be attributed to it.
//!
//! # Implementation
//!
//! Each entry owns the pending [`DependencySet`] of one tracked run. Reads go
//! to the top entry only; nothing is visible to the registry until the entry
//! is popped and committed. Stack position doubles as the parent link: once
//! a nested run is popped, the outer entry is on top again and resumes
//! recording where it left off.
//!
//! An entry without an owner records nothing. It is used to run code (watch
//! handlers, for example) inside a tracked run without attributing its reads
//! to the surrounding consumer.

use smallvec::SmallVec;

use super::callback::{Callback, CallbackId};
use super::registry::DependencySet;
use super::source::{PropertyKey, SourceRef};
use super::tracker::Tracker;
use crate::error::TrackingStackError;

/// One tracked run in progress.
pub(crate) struct ContextEntry {
    pub(crate) owner: Option<Callback>,
    pub(crate) pending: DependencySet,
}

impl ContextEntry {
    pub(crate) fn owner_id(&self) -> Option<CallbackId> {
        self.owner.as_ref().map(Callback::id)
    }
}

/// The stack of tracked runs on this thread.
#[derive(Default)]
pub(crate) struct ContextStack {
    entries: SmallVec<[ContextEntry; 4]>,
}

impl ContextStack {
    /// Push a new entry and return its depth (1 for the outermost).
    pub(crate) fn push(&mut self, owner: Option<Callback>) -> usize {
        self.entries.push(ContextEntry {
            owner,
            pending: DependencySet::new(),
        });
        self.entries.len()
    }

    pub(crate) fn pop(&mut self) -> Option<ContextEntry> {
        self.entries.pop()
    }

    /// Record a read against the top entry, if it has an owner.
    pub(crate) fn record(&mut self, source: SourceRef, key: PropertyKey) -> bool {
        match self.entries.last_mut() {
            Some(entry) if entry.owner.is_some() => entry.pending.insert(source, key),
            _ => false,
        }
    }

    /// Whether reads are currently being recorded.
    pub(crate) fn is_recording(&self) -> bool {
        self.entries.last().is_some_and(|entry| entry.owner.is_some())
    }

    pub(crate) fn current_owner(&self) -> Option<CallbackId> {
        self.entries.last().and_then(ContextEntry::owner_id)
    }

    pub(crate) fn top(&self) -> Option<&ContextEntry> {
        self.entries.last()
    }

    pub(crate) fn depth(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Handle to a context opened with `begin_track`.
///
/// Closing through [`TrackingContext::end`] verifies that the context being
/// closed is the one on top of the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "a tracking context must be closed with `end` or `end_track`"]
pub struct TrackingContext {
    owner: CallbackId,
    depth: usize,
}

impl TrackingContext {
    pub(crate) fn new(owner: CallbackId, depth: usize) -> Self {
        Self { owner, depth }
    }

    /// The consumer this context records for.
    pub fn owner(&self) -> CallbackId {
        self.owner
    }

    /// Position on the stack; 1 is the outermost context.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Close this context and commit what it read.
    pub fn end(self) -> Result<(), TrackingStackError> {
        Tracker::end(self)
    }
}
