//! Watchers
//!
//! A watch runs a producer under tracking and hands changes of the produced
//! value to a handler as `(new, old)`. It is a thin layer over one [`Effect`]:
//! the effect re-runs the producer, the watch compares and dispatches.
//!
//! | constructor | handler fires | afterwards |
//! |---|---|---|
//! | [`watch`] | on every change, never on the first run | keeps watching |
//! | [`watch_immediate`] | on the first run and every change | keeps watching |
//! | [`watch_once`] | on the first change | disconnects |
//! | [`watch_until`] | when the value satisfies a target, first run included | disconnects |
//!
//! Handlers run without tracking, so reads inside a handler never become
//! dependencies of the watch.

use std::cell::{Cell, OnceCell, RefCell};
use std::rc::{Rc, Weak};

use super::effect::{Effect, EffectInner};
use super::tracker::Tracker;

enum Trigger<T> {
    Change,
    Immediate,
    Once,
    Until(Box<dyn Fn(&T) -> bool>),
}

impl<T> Trigger<T> {
    fn is_one_shot(&self) -> bool {
        matches!(self, Self::Once | Self::Until(_))
    }
}

struct WatchState<T> {
    last: RefCell<Option<T>>,
    fired: Cell<bool>,
}

/// Handle to a running watch.
///
/// Dropping the handle stops the watch.
pub struct Watch<T> {
    effect: Effect,
    state: Rc<WatchState<T>>,
}

impl<T: Clone + 'static> Watch<T> {
    fn build<P, H, E>(producer: P, handler: H, equals: E, trigger: Trigger<T>) -> Self
    where
        P: Fn() -> T + 'static,
        H: Fn(&T, Option<&T>) + 'static,
        E: Fn(&T, &T) -> bool + 'static,
    {
        let state = Rc::new(WatchState {
            last: RefCell::new(None),
            fired: Cell::new(false),
        });
        let slot: Rc<OnceCell<Weak<EffectInner>>> = Rc::new(OnceCell::new());

        let run_state = state.clone();
        let run_slot = slot.clone();
        let effect = Effect::new_lazy(move || {
            let value = producer();
            let previous = run_state.last.replace(Some(value.clone()));
            if trigger.is_one_shot() && run_state.fired.get() {
                return;
            }

            let changed = previous.as_ref().map_or(true, |old| !equals(old, &value));
            let fire = match &trigger {
                Trigger::Change | Trigger::Once => previous.is_some() && changed,
                Trigger::Immediate => changed,
                Trigger::Until(target) => changed && target(&value),
            };
            if !fire {
                return;
            }

            run_state.fired.set(true);
            Tracker::without_tracking(|| handler(&value, previous.as_ref()));
            if trigger.is_one_shot() {
                if let Some(effect) = run_slot.get().and_then(Weak::upgrade) {
                    effect.disconnect();
                }
            }
        });
        let _ = slot.set(effect.downgrade());
        effect.connect();

        Self { effect, state }
    }

    /// Resume watching.
    pub fn connect(&self) {
        self.effect.connect();
    }

    /// Pause watching.
    pub fn disconnect(&self) {
        self.effect.disconnect();
    }

    /// Stop watching for good.
    pub fn clear(&self) {
        self.effect.clear();
    }

    /// The most recently produced value.
    pub fn value(&self) -> Option<T> {
        self.state.last.borrow().clone()
    }

    /// Whether the handler has been invoked at least once.
    pub fn has_fired(&self) -> bool {
        self.state.fired.get()
    }

    pub fn is_connected(&self) -> bool {
        self.effect.is_connected()
    }

    /// The effect driving this watch.
    pub fn effect(&self) -> &Effect {
        &self.effect
    }
}

/// Call `handler(new, old)` whenever the produced value changes.
#[must_use = "dropping a watch stops it"]
pub fn watch<T, P, H>(producer: P, handler: H) -> Watch<T>
where
    T: Clone + PartialEq + 'static,
    P: Fn() -> T + 'static,
    H: Fn(&T, Option<&T>) + 'static,
{
    watch_with(producer, handler, T::eq)
}

/// [`watch`] with a custom equality.
#[must_use = "dropping a watch stops it"]
pub fn watch_with<T, P, H, E>(producer: P, handler: H, equals: E) -> Watch<T>
where
    T: Clone + 'static,
    P: Fn() -> T + 'static,
    H: Fn(&T, Option<&T>) + 'static,
    E: Fn(&T, &T) -> bool + 'static,
{
    Watch::build(producer, handler, equals, Trigger::Change)
}

/// Like [`watch`], but the handler also runs on construction with
/// `old = None`.
#[must_use = "dropping a watch stops it"]
pub fn watch_immediate<T, P, H>(producer: P, handler: H) -> Watch<T>
where
    T: Clone + PartialEq + 'static,
    P: Fn() -> T + 'static,
    H: Fn(&T, Option<&T>) + 'static,
{
    watch_immediate_with(producer, handler, T::eq)
}

/// [`watch_immediate`] with a custom equality.
#[must_use = "dropping a watch stops it"]
pub fn watch_immediate_with<T, P, H, E>(producer: P, handler: H, equals: E) -> Watch<T>
where
    T: Clone + 'static,
    P: Fn() -> T + 'static,
    H: Fn(&T, Option<&T>) + 'static,
    E: Fn(&T, &T) -> bool + 'static,
{
    Watch::build(producer, handler, equals, Trigger::Immediate)
}

/// Call `handler` on the first change only, then disconnect.
#[must_use = "dropping a watch stops it"]
pub fn watch_once<T, P, H>(producer: P, handler: H) -> Watch<T>
where
    T: Clone + PartialEq + 'static,
    P: Fn() -> T + 'static,
    H: Fn(&T, Option<&T>) + 'static,
{
    watch_once_with(producer, handler, T::eq)
}

/// [`watch_once`] with a custom equality.
#[must_use = "dropping a watch stops it"]
pub fn watch_once_with<T, P, H, E>(producer: P, handler: H, equals: E) -> Watch<T>
where
    T: Clone + 'static,
    P: Fn() -> T + 'static,
    H: Fn(&T, Option<&T>) + 'static,
    E: Fn(&T, &T) -> bool + 'static,
{
    Watch::build(producer, handler, equals, Trigger::Once)
}

/// Call `handler` as soon as the produced value satisfies `target`, then
/// disconnect. The first run counts.
#[must_use = "dropping a watch stops it"]
pub fn watch_until<T, P, U, H>(producer: P, target: U, handler: H) -> Watch<T>
where
    T: Clone + PartialEq + 'static,
    P: Fn() -> T + 'static,
    U: Fn(&T) -> bool + 'static,
    H: Fn(&T, Option<&T>) + 'static,
{
    watch_until_with(producer, target, handler, T::eq)
}

/// [`watch_until`] with a custom equality.
#[must_use = "dropping a watch stops it"]
pub fn watch_until_with<T, P, U, H, E>(producer: P, target: U, handler: H, equals: E) -> Watch<T>
where
    T: Clone + 'static,
    P: Fn() -> T + 'static,
    U: Fn(&T) -> bool + 'static,
    H: Fn(&T, Option<&T>) + 'static,
    E: Fn(&T, &T) -> bool + 'static,
{
    Watch::build(producer, handler, equals, Trigger::Until(Box::new(target)))
}
