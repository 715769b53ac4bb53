//! Dependency Tracker
//!
//! The tracker connects whatever mechanism observes property access to the
//! consumers that care about it. It owns the context stack and the registry
//! of the current thread.
//!
//! # Contract
//!
//! The tracker never intercepts property access itself. Some external
//! mechanism (a proxy wrapper, generated accessors, [`Observed`], or plain
//! explicit calls) must report:
//!
//! - every read of a tracked property with [`Tracker::track_get`], and
//! - every write with [`Tracker::track_set`], after the new value is in
//!   place.
//!
//! A read outside any tracked run, or a write nobody depends on, is simply a
//! no-op. Neither call can fail.
//!
//! # Lifecycle
//!
//! State is thread-local and created lazily on first use. Each thread (and
//! so each test) gets its own independent tracker. [`Tracker::reset`] throws
//! the current thread's state away, which is handy between test cases.
//!
//! [`Observed`]: super::Observed

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use tracing::{error, trace};

use super::callback::{Callback, CallbackId};
use super::context::{ContextEntry, ContextStack, TrackingContext};
use super::registry::{DependencySet, Registry};
use super::snapshot::Snapshot;
use super::source::{PropertyKey, SourceId, SourceRef};
use crate::error::{panic_message, EvaluationError, TrackingStackError};

#[derive(Default)]
struct TrackerState {
    stack: RefCell<ContextStack>,
    registry: RefCell<Registry>,
}

thread_local! {
    static STATE: TrackerState = TrackerState::default();
}

/// Entry points of the dependency tracker.
pub struct Tracker;

impl Tracker {
    /// Open a tracked run owned by `callback`.
    ///
    /// `callback` is both the consumer identity and the function invoked when
    /// one of the recorded dependencies is written.
    pub fn begin_track(callback: &Callback) -> TrackingContext {
        let depth = STATE.with(|state| state.stack.borrow_mut().push(Some(callback.clone())));
        trace!(consumer = callback.id().raw(), depth, "begin track");
        TrackingContext::new(callback.id(), depth)
    }

    /// Close the innermost tracked run and commit what it read.
    ///
    /// The consumer's previous dependency set is replaced wholesale.
    pub fn end_track() -> Result<(), TrackingStackError> {
        STATE.with(|state| {
            let entry = state
                .stack
                .borrow_mut()
                .pop()
                .ok_or(TrackingStackError::Empty)?;
            if let Some(owner) = entry.owner {
                trace!(consumer = owner.id().raw(), deps = entry.pending.len(), "end track");
                state.registry.borrow_mut().commit(&owner, entry.pending);
            }
            Ok(())
        })
    }

    /// Close `context`, checking that it is the innermost one.
    ///
    /// If contexts opened inside it were never closed they are discarded
    /// without committing, `context` itself is still committed, and a
    /// [`TrackingStackError::Mismatch`] is returned so the caller can report
    /// the corruption.
    pub fn end(context: TrackingContext) -> Result<(), TrackingStackError> {
        STATE.with(|state| {
            let mut stack = state.stack.borrow_mut();
            let depth = stack.depth();
            if depth < context.depth() {
                return Err(TrackingStackError::Mismatch {
                    expected: Some(context.owner()),
                    found: stack.current_owner(),
                    depth: context.depth(),
                });
            }

            let mismatch = (depth > context.depth()).then(|| TrackingStackError::Mismatch {
                expected: Some(context.owner()),
                found: stack.current_owner(),
                depth: context.depth(),
            });
            while stack.depth() > context.depth() {
                stack.pop();
            }

            let owned = stack
                .top()
                .is_some_and(|entry| entry.owner_id() == Some(context.owner()));
            if !owned {
                // The entry at this depth belongs to someone else; discard it
                // so later reads are not credited to it.
                let found = stack.pop().and_then(|entry| entry.owner_id());
                return Err(TrackingStackError::Mismatch {
                    expected: Some(context.owner()),
                    found,
                    depth: context.depth(),
                });
            }

            if let Some(ContextEntry {
                owner: Some(owner),
                pending,
            }) = stack.pop()
            {
                state.registry.borrow_mut().commit(&owner, pending);
            }
            mismatch.map_or(Ok(()), Err)
        })
    }

    /// Report a read of `key` on `object`.
    pub fn track_get<T: 'static>(object: &Rc<T>, key: impl Into<PropertyKey>) {
        STATE.with(|state| {
            let mut stack = state.stack.borrow_mut();
            if stack.is_recording() {
                let key = key.into();
                trace!(source = ?SourceId::of(object), %key, "track get");
                stack.record(SourceRef::of(object), key);
            }
        });
    }

    /// Report a write of `key` on `object` and notify its consumers.
    ///
    /// Each subscribed consumer's invalidation callback is invoked once, after
    /// the tracker has released its own state.
    pub fn track_set<T: 'static>(object: &Rc<T>, key: impl Into<PropertyKey>) {
        let key = key.into();
        let source = SourceRef::of(object);
        let notify = STATE.with(|state| state.registry.borrow_mut().record_write(&source, &key));
        trace!(source = ?source.id(), %key, consumers = notify.len(), "track set");
        for callback in notify {
            callback.invoke();
        }
    }

    /// Remove a consumer and all of its subscriptions.
    ///
    /// Returns the dependency set it held so the caller can snapshot it.
    pub fn untrack(id: CallbackId) -> Option<DependencySet> {
        STATE.with(|state| state.registry.borrow_mut().remove(id))
    }

    /// Same as [`untrack`](Self::untrack), but safe to call from `Drop`
    /// while the thread is shutting down.
    pub(crate) fn untrack_on_drop(id: CallbackId) {
        let _ = STATE.try_with(|state| {
            if let Ok(mut registry) = state.registry.try_borrow_mut() {
                registry.remove(id);
            }
        });
    }

    /// Register `deps` for `callback` again without re-running it.
    pub fn resubscribe(callback: &Callback, deps: DependencySet) {
        STATE.with(|state| state.registry.borrow_mut().commit(callback, deps));
    }

    /// Run `f` without attributing its reads to the current consumer.
    pub fn without_tracking<R>(f: impl FnOnce() -> R) -> R {
        struct Restore;

        impl Drop for Restore {
            fn drop(&mut self) {
                let _ = STATE.try_with(|state| state.stack.borrow_mut().pop());
            }
        }

        STATE.with(|state| state.stack.borrow_mut().push(None));
        let _restore = Restore;
        f()
    }

    /// Capture the current revisions of `deps`.
    pub fn snapshot(deps: DependencySet) -> Snapshot {
        STATE.with(|state| Snapshot::capture(&state.registry.borrow(), deps))
    }

    /// Whether no dependency in `snapshot` has been written since capture.
    pub fn is_current(snapshot: &Snapshot) -> bool {
        STATE.with(|state| snapshot.is_current_in(&state.registry.borrow()))
    }

    /// Whether reads are currently being recorded.
    pub fn is_tracking() -> bool {
        STATE.with(|state| state.stack.borrow().is_recording())
    }

    /// The consumer whose run is currently recording, if any.
    pub fn current_consumer() -> Option<CallbackId> {
        STATE.with(|state| state.stack.borrow().current_owner())
    }

    /// Number of open contexts.
    pub fn depth() -> usize {
        STATE.with(|state| state.stack.borrow().depth())
    }

    /// Number of dependencies currently registered for a consumer.
    pub fn dependency_count(id: CallbackId) -> usize {
        STATE.with(|state| {
            state
                .registry
                .borrow()
                .dependencies(id)
                .map_or(0, DependencySet::len)
        })
    }

    /// A copy of the dependency set currently registered for a consumer.
    pub fn dependencies(id: CallbackId) -> Option<DependencySet> {
        STATE.with(|state| state.registry.borrow().dependencies(id).cloned())
    }

    /// Number of consumers subscribed to `key` on `object`.
    pub fn subscriber_count<T: 'static>(object: &Rc<T>, key: impl Into<PropertyKey>) -> usize {
        let key = key.into();
        STATE.with(|state| {
            state
                .registry
                .borrow()
                .subscriber_count(SourceId::of(object), &key)
        })
    }

    /// Number of registered consumers.
    pub fn consumer_count() -> usize {
        STATE.with(|state| state.registry.borrow().consumer_count())
    }

    /// Number of objects the registry holds entries for.
    pub fn source_count() -> usize {
        STATE.with(|state| state.registry.borrow().source_count())
    }

    /// Drop registry entries whose objects have been dropped.
    pub fn prune() -> usize {
        let removed = STATE.with(|state| state.registry.borrow_mut().prune());
        trace!(removed, "pruned dead sources");
        removed
    }

    /// Discard all tracking state of the current thread.
    pub fn reset() {
        STATE.with(|state| {
            state.stack.borrow_mut().clear();
            *state.registry.borrow_mut() = Registry::new();
        });
    }
}

/// Run `f` as a tracked run owned by `owner`.
///
/// Panics are contained: the context is always closed and committed, and
/// the panic comes back as an [`EvaluationError`]. Stack corruption caused by
/// `f` is repaired and reported.
pub(crate) fn run_tracked<R>(owner: &Callback, f: impl FnOnce() -> R) -> Result<R, EvaluationError> {
    let context = Tracker::begin_track(owner);
    let result = panic::catch_unwind(AssertUnwindSafe(f));

    if let Err(err) = Tracker::end(context) {
        error!(consumer = owner.id().raw(), %err, "tracking stack corrupted");
        debug_assert!(false, "tracking stack corrupted: {err}");
    }

    result.map_err(|payload| {
        let err = EvaluationError {
            consumer: owner.id(),
            message: panic_message(payload.as_ref()),
        };
        error!(consumer = owner.id().raw(), message = %err.message, "consumer evaluation panicked");
        err
    })
}

/// Shorthand for [`Tracker::begin_track`].
pub fn begin_track(callback: &Callback) -> TrackingContext {
    Tracker::begin_track(callback)
}

/// Shorthand for [`Tracker::end_track`].
pub fn end_track() -> Result<(), TrackingStackError> {
    Tracker::end_track()
}

/// Shorthand for [`Tracker::track_get`].
pub fn track_get<T: 'static>(object: &Rc<T>, key: impl Into<PropertyKey>) {
    Tracker::track_get(object, key)
}

/// Shorthand for [`Tracker::track_set`].
pub fn track_set<T: 'static>(object: &Rc<T>, key: impl Into<PropertyKey>) {
    Tracker::track_set(object, key)
}

/// Shorthand for [`Tracker::untrack`].
pub fn untrack(id: CallbackId) -> Option<DependencySet> {
    Tracker::untrack(id)
}
