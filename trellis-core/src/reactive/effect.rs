//! Effect Implementation
//!
//! An Effect is a side-effecting computation that re-runs whenever a
//! property it read during its last run is written.
//!
//! # How Effects Work
//!
//! 1. When connected for the first time, the effect runs immediately to
//!    establish its dependencies.
//!
//! 2. When any dependency is written, the effect is marked
//!    `PendingUpdate` and a re-run is enqueued at the effect's order. Effects
//!    therefore re-run in construction order, interleaved with computeds.
//!
//! 3. Each run replaces the dependency set of the previous one.
//!
//! # Differences from Computed
//!
//! - Computeds return a value; effects do not.
//! - Computeds are lazy (recompute on access); effects are eager.
//! - A computed that goes stale only flips a flag; an effect re-runs.
//!
//! # Cancellation
//!
//! `disconnect` and `clear` unsubscribe immediately. A re-run that was already
//! enqueued still reaches the effect, but is skipped because the effect is no
//! longer connected. The pending flag survives, so the next `connect` runs
//! the effect.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use tracing::{debug, warn};

use super::callback::Callback;
use super::snapshot::Snapshot;
use super::tracker::{run_tracked, Tracker};
use crate::scheduler::{Order, Scheduler};

/// Scheduling state of an effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectState {
    /// Up-to-date with its dependencies.
    Idle,

    /// A dependency changed and a re-run is due.
    PendingUpdate,
}

pub(crate) struct EffectInner {
    run: Box<dyn Fn()>,
    state: Cell<EffectState>,
    order: Order,
    connected: Cell<bool>,
    cleared: Cell<bool>,
    run_count: Cell<usize>,
    snapshot: RefCell<Option<Snapshot>>,
    /// Registered with the tracker; marks pending and enqueues `rerun`.
    invalidate: Callback,
    /// Scheduled task that re-runs the effect.
    rerun: Callback,
}

impl EffectInner {
    fn on_dependency_changed(&self) {
        self.state.set(EffectState::PendingUpdate);
        Scheduler::enqueue(&self.rerun, self.order);
    }

    fn on_rerun(&self) {
        if !self.connected.get() {
            debug!(order = %self.order, "skipping re-run of disconnected effect");
            return;
        }
        if self.state.get() == EffectState::PendingUpdate {
            self.execute();
        }
    }

    fn execute(&self) {
        if self.cleared.get() {
            return;
        }
        self.state.set(EffectState::Idle);
        // Failures are logged by `run_tracked`; the effect stays subscribed
        // to whatever it read before panicking.
        let _ = run_tracked(&self.invalidate, || (self.run)());
        self.run_count.set(self.run_count.get() + 1);

        // Disconnected from inside its own run: keep what it just read for
        // the next `connect`, but do not stay subscribed.
        if !self.connected.get() {
            let deps = Tracker::untrack(self.invalidate.id()).unwrap_or_default();
            if !self.cleared.get() {
                *self.snapshot.borrow_mut() = Some(Tracker::snapshot(deps));
            }
        }
    }

    pub(crate) fn connect(&self) {
        if self.cleared.get() {
            warn!(order = %self.order, "connect called on a cleared effect");
            return;
        }
        if self.connected.replace(true) {
            return;
        }

        let snapshot = self.snapshot.borrow_mut().take();
        match snapshot {
            Some(snapshot)
                if self.state.get() == EffectState::Idle && Tracker::is_current(&snapshot) =>
            {
                debug!(order = %self.order, "reconnected without re-run");
                Tracker::resubscribe(&self.invalidate, snapshot.into_dependencies());
            }
            _ => self.execute(),
        }
    }

    pub(crate) fn disconnect(&self) {
        if !self.connected.replace(false) {
            return;
        }
        let deps = Tracker::untrack(self.invalidate.id()).unwrap_or_default();
        if self.run_count.get() > 0 {
            *self.snapshot.borrow_mut() = Some(Tracker::snapshot(deps));
        }
    }

    pub(crate) fn clear(&self) {
        self.cleared.set(true);
        self.connected.set(false);
        self.snapshot.borrow_mut().take();
        Tracker::untrack(self.invalidate.id());
    }
}

impl Drop for EffectInner {
    fn drop(&mut self) {
        Tracker::untrack_on_drop(self.invalidate.id());
    }
}

/// A side-effecting computation that re-runs when its dependencies change.
///
/// Cloning shares the effect. Dropping the last clone untracks it, so keep
/// a handle for as long as the effect should stay alive.
///
/// # Example
///
/// ```rust
/// use std::cell::RefCell;
/// use std::rc::Rc;
/// use trellis_core::{track_get, track_set, Effect, Scheduler};
///
/// let a = Rc::new(RefCell::new(1));
/// let seen = Rc::new(RefCell::new(Vec::new()));
///
/// let (a_clone, seen_clone) = (a.clone(), seen.clone());
/// let _effect = Effect::new(move || {
///     track_get(&a_clone, "b");
///     seen_clone.borrow_mut().push(*a_clone.borrow());
/// });
///
/// *a.borrow_mut() = 2;
/// track_set(&a, "b");
/// Scheduler::flush();
///
/// assert_eq!(*seen.borrow(), vec![1, 2]);
/// ```
pub struct Effect {
    inner: Rc<EffectInner>,
}

impl Effect {
    /// Create an effect and run it immediately.
    #[must_use = "dropping an effect untracks it"]
    pub fn new<F>(run: F) -> Self
    where
        F: Fn() + 'static,
    {
        let effect = Self::new_lazy(run);
        effect.connect();
        effect
    }

    /// Create an effect without running it. The first `connect` runs it.
    #[must_use = "dropping an effect untracks it"]
    pub fn new_lazy<F>(run: F) -> Self
    where
        F: Fn() + 'static,
    {
        let inner = Rc::new_cyclic(|weak: &Weak<EffectInner>| {
            let on_change = weak.clone();
            let on_task = weak.clone();
            EffectInner {
                run: Box::new(run),
                state: Cell::new(EffectState::Idle),
                order: Order::next(),
                connected: Cell::new(false),
                cleared: Cell::new(false),
                run_count: Cell::new(0),
                snapshot: RefCell::new(None),
                invalidate: Callback::new(move || {
                    if let Some(inner) = on_change.upgrade() {
                        inner.on_dependency_changed();
                    }
                }),
                rerun: Callback::new(move || {
                    if let Some(inner) = on_task.upgrade() {
                        inner.on_rerun();
                    }
                }),
            }
        });
        Self { inner }
    }

    /// Resume tracking, running the effect if it is due.
    pub fn connect(&self) {
        self.inner.connect();
    }

    /// Pause tracking. Writes made while paused are detected on `connect`.
    pub fn disconnect(&self) {
        self.inner.disconnect();
    }

    /// Stop the effect for good.
    pub fn clear(&self) {
        self.inner.clear();
    }

    pub fn state(&self) -> EffectState {
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

    /// Get the number of times the effect has run.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.get()
    }

    /// Number of dependencies currently subscribed.
    pub fn dependency_count(&self) -> usize {
        Tracker::dependency_count(self.inner.invalidate.id())
    }

    pub(crate) fn downgrade(&self) -> Weak<EffectInner> {
        Rc::downgrade(&self.inner)
    }
}

impl Clone for Effect {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl std::fmt::Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("order", &self.inner.order)
            .field("state", &self.state())
            .field("run_count", &self.run_count())
            .field("connected", &self.is_connected())
            .field("cleared", &self.is_cleared())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn new_source() -> Rc<RefCell<i32>> {
        Rc::new(RefCell::new(0))
    }

    fn write(source: &Rc<RefCell<i32>>, value: i32) {
        *source.borrow_mut() = value;
        Tracker::track_set(source, "b");
    }

    fn reading(source: &Rc<RefCell<i32>>, log: &Rc<RefCell<Vec<i32>>>) -> Effect {
        let (source, log) = (source.clone(), log.clone());
        Effect::new(move || {
            Tracker::track_get(&source, "b");
            log.borrow_mut().push(*source.borrow());
        })
    }

    #[test]
    fn effect_runs_on_creation() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let effect = reading(&new_source(), &log);

        assert_eq!(*log.borrow(), vec![0]);
        assert_eq!(effect.run_count(), 1);
        assert_eq!(effect.dependency_count(), 1);
    }

    #[test]
    fn effect_lazy_does_not_run_on_creation() {
        let run_count = Rc::new(Cell::new(0));
        let run_count_clone = run_count.clone();

        let effect = Effect::new_lazy(move || {
            run_count_clone.set(run_count_clone.get() + 1);
        });
        assert_eq!(run_count.get(), 0);
        assert!(!effect.is_connected());

        effect.connect();
        assert_eq!(run_count.get(), 1);
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn reruns_after_flush() {
        let source = new_source();
        let log = Rc::new(RefCell::new(Vec::new()));
        let effect = reading(&source, &log);

        write(&source, 4);
        assert_eq!(effect.state(), EffectState::PendingUpdate);
        assert_eq!(*log.borrow(), vec![0]);

        Scheduler::flush();
        assert_eq!(*log.borrow(), vec![0, 4]);
        assert_eq!(effect.state(), EffectState::Idle);
    }

    #[test]
    fn effects_rerun_in_construction_order() {
        let source = new_source();
        let order = Rc::new(RefCell::new(Vec::new()));

        let make = |name: &'static str| {
            let (source, order) = (source.clone(), order.clone());
            Effect::new(move || {
                Tracker::track_get(&source, "b");
                order.borrow_mut().push(name);
            })
        };
        let _e1 = make("e1");
        let _e2 = make("e2");
        order.borrow_mut().clear();

        write(&source, 1);
        Scheduler::flush();
        assert_eq!(*order.borrow(), vec!["e1", "e2"]);
    }

    #[test]
    fn panicking_run_is_contained() {
        let source = new_source();
        let source_clone = source.clone();
        let effect = Effect::new(move || {
            Tracker::track_get(&source_clone, "b");
            assert_ne!(*source_clone.borrow(), 13, "unlucky");
        });

        write(&source, 13);
        let report = Scheduler::flush();
        assert!(report.failures.is_empty());
        assert_eq!(effect.run_count(), 2);
        assert_eq!(Tracker::depth(), 0);

        write(&source, 14);
        Scheduler::flush();
        assert_eq!(effect.run_count(), 3);
    }

    #[test]
    fn disconnected_effect_skips_queued_rerun() {
        let source = new_source();
        let log = Rc::new(RefCell::new(Vec::new()));
        let effect = reading(&source, &log);

        write(&source, 1);
        effect.disconnect();
        Scheduler::flush();
        assert_eq!(*log.borrow(), vec![0]);
        assert_eq!(effect.state(), EffectState::PendingUpdate);

        effect.connect();
        assert_eq!(*log.borrow(), vec![0, 1]);
    }

    #[test]
    fn reconnect_without_changes_does_not_rerun() {
        let source = new_source();
        let other = new_source();
        let log = Rc::new(RefCell::new(Vec::new()));
        let effect = reading(&source, &log);

        effect.disconnect();
        write(&other, 5);
        effect.connect();
        assert_eq!(effect.run_count(), 1);
        assert_eq!(effect.dependency_count(), 1);

        write(&source, 2);
        Scheduler::flush();
        assert_eq!(*log.borrow(), vec![0, 2]);
    }

    #[test]
    fn reconnect_after_change_reruns_immediately() {
        let source = new_source();
        let log = Rc::new(RefCell::new(Vec::new()));
        let effect = reading(&source, &log);

        effect.disconnect();
        write(&source, 8);
        assert_eq!(Scheduler::pending_len(), 0);

        effect.connect();
        assert_eq!(*log.borrow(), vec![0, 8]);
    }

    #[test]
    fn effect_does_not_run_after_clear() {
        let source = new_source();
        let log = Rc::new(RefCell::new(Vec::new()));
        let effect = reading(&source, &log);

        effect.clear();
        assert!(effect.is_cleared());

        write(&source, 1);
        Scheduler::flush();
        effect.connect();
        assert_eq!(*log.borrow(), vec![0]);
    }

    #[test]
    fn effect_clone_shares_state() {
        let effect1 = Effect::new(|| {});
        let effect2 = effect1.clone();

        assert_eq!(effect1.order(), effect2.order());
        assert_eq!(effect2.run_count(), 1);

        effect1.clear();
        assert!(effect2.is_cleared());
    }

    #[test]
    fn dropped_effect_stops_running() {
        let source = new_source();
        let log = Rc::new(RefCell::new(Vec::new()));
        let effect = reading(&source, &log);

        drop(effect);
        assert_eq!(Tracker::subscriber_count(&source, "b"), 0);
        write(&source, 1);
        Scheduler::flush();
        assert_eq!(*log.borrow(), vec![0]);
    }
}
