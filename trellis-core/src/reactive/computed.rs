//! Computed Implementation
//!
//! A Computed is a cached derived value that re-evaluates only when one of
//! the properties it read last time has been written.
//!
//! # How Computeds Work
//!
//! 1. On first access, the getter runs inside a tracked run and the result
//!    is cached.
//!
//! 2. When accessed again with nothing written, the cache is returned and the
//!    getter is not called.
//!
//! 3. When a dependency is written, an invalidation task is enqueued at the
//!    computed's order. Several writes in one turn collapse into one task.
//!
//! 4. When that task runs, the computed turns `Stale` and reports a write of
//!    its own `value` property, so consumers that read it are invalidated in
//!    turn.
//!
//! 5. The next access recomputes.
//!
//! # Disconnecting
//!
//! While disconnected a computed holds no subscriptions. It keeps a
//! [`Snapshot`] of what it read instead, and on reconnect it only goes stale
//! if one of those properties was written in the meantime.

use std::cell::{Cell, RefCell};
use std::fmt::Debug;
use std::rc::Rc;

use tracing::{debug, warn};

use super::callback::Callback;
use super::snapshot::Snapshot;
use super::tracker::{run_tracked, Tracker};
use crate::scheduler::{Order, Scheduler};

/// Property a computed reports reads and writes of itself under.
pub const VALUE_KEY: &str = "value";

/// Cache state of a computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputedState {
    /// Never evaluated.
    Initial,

    /// A dependency changed; the next access recomputes.
    Stale,

    /// The cached value is up-to-date.
    Fresh,
}

struct ComputedInner<T> {
    getter: Box<dyn Fn() -> T>,
    value: RefCell<Option<T>>,
    state: Cell<ComputedState>,
    order: Order,
    connected: Cell<bool>,
    cleared: Cell<bool>,
    evaluating: Cell<bool>,
    /// An invalidation task is sitting in the scheduler.
    invalidation_pending: Cell<bool>,
    snapshot: RefCell<Option<Snapshot>>,
    /// Registered with the tracker; enqueues `mark_stale`.
    invalidate: Callback,
    /// Scheduled task that flips the state to `Stale`.
    mark_stale: Callback,
}

impl<T: Clone + 'static> ComputedInner<T> {
    fn on_dependency_changed(&self) {
        self.invalidation_pending.set(true);
        Scheduler::enqueue(&self.mark_stale, self.order);
    }

    fn mark_stale(self: &Rc<Self>) {
        self.invalidation_pending.set(false);
        if !self.connected.get() {
            debug!(order = %self.order, "skipping invalidation of disconnected computed");
            return;
        }
        if self.state.get() == ComputedState::Fresh {
            self.state.set(ComputedState::Stale);
        }
        // Reported even when already stale: after a failed run, readers hold
        // an old or missing value and must retry once a dependency changes.
        Tracker::track_set(self, VALUE_KEY);
    }

    fn go_stale(self: &Rc<Self>) {
        if self.state.get() == ComputedState::Fresh {
            self.state.set(ComputedState::Stale);
            Tracker::track_set(self, VALUE_KEY);
        }
    }

    fn evaluate(&self) {
        if self.evaluating.replace(true) {
            warn!(order = %self.order, "computed read itself while evaluating; returning cached value");
            return;
        }
        let result = run_tracked(&self.invalidate, || (self.getter)());
        self.evaluating.set(false);

        // A failed run keeps the previous value and stays stale.
        if let Ok(value) = result {
            *self.value.borrow_mut() = Some(value);
            self.state.set(ComputedState::Fresh);
        }

        if !self.connected.get() {
            let deps = Tracker::untrack(self.invalidate.id()).unwrap_or_default();
            *self.snapshot.borrow_mut() = Some(Tracker::snapshot(deps));
        }
    }
}

impl<T> Drop for ComputedInner<T> {
    fn drop(&mut self) {
        Tracker::untrack_on_drop(self.invalidate.id());
    }
}

/// A cached derived value.
///
/// Cloning shares the cache. Dropping the last clone untracks the computed.
///
/// # Example
///
/// ```rust
/// use std::cell::RefCell;
/// use std::rc::Rc;
/// use trellis_core::{track_get, Computed};
///
/// let a = Rc::new(RefCell::new(2));
/// let a_clone = a.clone();
/// let doubled = Computed::new(move || {
///     track_get(&a_clone, "value");
///     *a_clone.borrow() * 2
/// });
///
/// assert_eq!(doubled.get(), Some(4));
/// ```
pub struct Computed<T: Clone + 'static> {
    inner: Rc<ComputedInner<T>>,
}

impl<T: Clone + 'static> Computed<T> {
    /// Create a computed. The getter does not run until the first `get`.
    pub fn new<F>(getter: F) -> Self
    where
        F: Fn() -> T + 'static,
    {
        let inner = Rc::new_cyclic(|weak: &std::rc::Weak<ComputedInner<T>>| {
            let on_change = weak.clone();
            let on_task = weak.clone();
            ComputedInner {
                getter: Box::new(getter),
                value: RefCell::new(None),
                state: Cell::new(ComputedState::Initial),
                order: Order::next(),
                connected: Cell::new(true),
                cleared: Cell::new(false),
                evaluating: Cell::new(false),
                invalidation_pending: Cell::new(false),
                snapshot: RefCell::new(None),
                invalidate: Callback::new(move || {
                    if let Some(inner) = on_change.upgrade() {
                        inner.on_dependency_changed();
                    }
                }),
                mark_stale: Callback::new(move || {
                    if let Some(inner) = on_task.upgrade() {
                        inner.mark_stale();
                    }
                }),
            }
        });
        Self { inner }
    }

    /// Get the current value, recomputing if necessary.
    ///
    /// Returns `None` only if the getter has never completed successfully.
    /// Inside a tracked run this also records a read of the computed itself.
    pub fn get(&self) -> Option<T> {
        Tracker::track_get(&self.inner, VALUE_KEY);
        if self.inner.state.get() != ComputedState::Fresh {
            self.inner.evaluate();
        }
        self.peek()
    }

    /// The cached value, without recomputing or tracking.
    pub fn peek(&self) -> Option<T> {
        self.inner.value.borrow().clone()
    }

    /// Resume tracking.
    pub fn connect(&self) {
        let inner = &self.inner;
        if inner.cleared.get() {
            warn!(order = %inner.order, "connect called on a cleared computed");
            return;
        }
        if inner.connected.replace(true) {
            return;
        }

        let snapshot = inner.snapshot.borrow_mut().take();
        match snapshot {
            Some(snapshot)
                if inner.state.get() == ComputedState::Fresh && Tracker::is_current(&snapshot) =>
            {
                debug!(order = %inner.order, "reconnected without recompute");
                Tracker::resubscribe(&inner.invalidate, snapshot.into_dependencies());
            }
            _ => {
                debug!(order = %inner.order, "reconnected stale");
                inner.go_stale();
            }
        }
    }

    /// Pause tracking. Writes are not reported until `connect`, but are
    /// detected then.
    pub fn disconnect(&self) {
        let inner = &self.inner;
        if !inner.connected.replace(false) {
            return;
        }
        if inner.invalidation_pending.get() {
            inner.go_stale();
        }
        let deps = Tracker::untrack(inner.invalidate.id()).unwrap_or_default();
        if inner.state.get() == ComputedState::Fresh {
            *inner.snapshot.borrow_mut() = Some(Tracker::snapshot(deps));
        }
    }

    /// Stop tracking for good.
    pub fn clear(&self) {
        let inner = &self.inner;
        inner.cleared.set(true);
        inner.connected.set(false);
        inner.snapshot.borrow_mut().take();
        Tracker::untrack(inner.invalidate.id());
    }

    pub fn state(&self) -> ComputedState {
        self.inner.state.get()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.get()
    }

    pub fn is_cleared(&self) -> bool {
        self.inner.cleared.get()
    }

    pub fn order(&self) -> Order {
        self.inner.order
    }

    /// Number of dependencies currently subscribed.
    pub fn dependency_count(&self) -> usize {
        Tracker::dependency_count(self.inner.invalidate.id())
    }
}

impl<T: Clone + 'static> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Debug + 'static> Debug for Computed<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Computed")
            .field("order", &self.inner.order)
            .field("state", &self.state())
            .field("value", &self.peek())
            .field("connected", &self.is_connected())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
