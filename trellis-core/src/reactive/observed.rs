//! Observed values
//!
//! The tracker only defines the reporting contract. `Observed` is one small
//! mechanism that honours it: a shared cell whose accessors name the
//! property they touch and report it to the tracker.
//!
//! ```rust
//! use trellis_core::{Effect, Observed, Scheduler};
//!
//! struct Point { x: i32, y: i32 }
//!
//! let point = Observed::new(Point { x: 0, y: 0 });
//! let reader = point.clone();
//! let effect = Effect::new(move || {
//!     reader.read("x", |p| p.x);
//! });
//!
//! point.write("y", |p| p.y = 1);
//! assert_eq!(Scheduler::pending_len(), 0);
//!
//! point.write("x", |p| p.x = 1);
//! Scheduler::flush();
//! assert_eq!(effect.run_count(), 2);
//! ```

use std::cell::RefCell;
use std::fmt::Debug;
use std::rc::Rc;

use super::source::PropertyKey;
use super::tracker::Tracker;

/// A shared value whose property accesses are reported to the tracker.
pub struct Observed<T: 'static> {
    inner: Rc<RefCell<T>>,
}

impl<T: 'static> Observed<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Rc::new(RefCell::new(value)),
        }
    }

    /// Read through `f`, reporting a read of `key`.
    pub fn read<R>(&self, key: impl Into<PropertyKey>, f: impl FnOnce(&T) -> R) -> R {
        Tracker::track_get(&self.inner, key);
        f(&*self.inner.borrow())
    }

    /// Mutate through `f`, then report a write of `key`.
    ///
    /// The borrow is released before consumers are notified.
    pub fn write<R>(&self, key: impl Into<PropertyKey>, f: impl FnOnce(&mut T) -> R) -> R {
        let result = f(&mut *self.inner.borrow_mut());
        Tracker::track_set(&self.inner, key);
        result
    }

    /// Read without reporting anything.
    pub fn peek<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&*self.inner.borrow())
    }

    /// The underlying shared cell, for callers that report accesses
    /// themselves.
    pub fn source(&self) -> &Rc<RefCell<T>> {
        &self.inner
    }
}

impl<T: Clone + 'static> Observed<T> {
    /// Clone the whole value, reporting a read of `key`.
    pub fn get(&self, key: impl Into<PropertyKey>) -> T {
        self.read(key, T::clone)
    }
}

impl<T: 'static> Clone for Observed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Debug + 'static> Debug for Observed<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observed")
            .field("value", &*self.inner.borrow())
            .finish()
    }
}
