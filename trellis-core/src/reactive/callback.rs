//! Consumer identity.
//!
//! A [`Callback`] is the identity under which a consumer (computed, effect or
//! watch) is registered with the tracker and the scheduler. It pairs a unique
//! [`CallbackId`] with the function to invoke: for the tracker that is the
//! invalidation callback, for the scheduler it is the task body.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a callback.
///
/// Ids are handed out from a global counter and never reused, so they
/// can double as a stable dedup key for the pending batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackId(u64);

impl CallbackId {
    /// Generate a new unique callback ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for CallbackId {
    fn default() -> Self {
        Self::new()
    }
}

/// A shared, identity-carrying callback.
///
/// Cloning shares both the function and the id. Equality and hashing only
/// look at the id.
#[derive(Clone)]
pub struct Callback {
    id: CallbackId,
    f: Rc<dyn Fn()>,
}

impl Callback {
    /// Create a new callback with a fresh identity.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn() + 'static,
    {
        Self {
            id: CallbackId::new(),
            f: Rc::new(f),
        }
    }

    /// Get the callback's unique ID.
    pub fn id(&self) -> CallbackId {
        self.id
    }

    /// Invoke the callback.
    pub fn invoke(&self) {
        (self.f)();
    }
}

impl PartialEq for Callback {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Callback {}

impl Hash for Callback {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Callback").field(&self.id.0).finish()
    }
}
