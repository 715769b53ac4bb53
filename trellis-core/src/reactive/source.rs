//! Tracked objects and property keys.
//!
//! The engine never looks inside the objects it tracks. A source is any
//! `Rc<T>`; its identity is the allocation address, and the engine only ever
//! stores a `Weak<dyn Any>` next to that address. Holding the weak reference
//! keeps the allocation (not the value) reserved, so the address cannot be
//! handed to a different object while the engine still refers to it.

use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::rc::{Rc, Weak};

/// Identity of a tracked object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(usize);

impl SourceId {
    /// Identity of the object behind `object`.
    pub fn of<T: 'static>(object: &Rc<T>) -> Self {
        Self(Rc::as_ptr(object) as *const () as usize)
    }
}

/// A weak handle to a tracked object.
#[derive(Clone)]
pub struct SourceRef {
    id: SourceId,
    object: Weak<dyn Any>,
}

impl SourceRef {
    /// Create a handle without extending the object's lifetime.
    pub fn of<T: 'static>(object: &Rc<T>) -> Self {
        let weak: Weak<T> = Rc::downgrade(object);
        Self {
            id: SourceId::of(object),
            object: weak,
        }
    }

    pub fn id(&self) -> SourceId {
        self.id
    }

    /// Whether the tracked object still exists.
    pub fn is_alive(&self) -> bool {
        self.object.strong_count() > 0
    }
}

impl PartialEq for SourceRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for SourceRef {}

impl fmt::Debug for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceRef")
            .field("id", &self.id)
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// The name of a property on a tracked object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    Name(Cow<'static, str>),
    Index(usize),
}

impl From<&'static str> for PropertyKey {
    fn from(name: &'static str) -> Self {
        Self::Name(Cow::Borrowed(name))
    }
}

impl From<String> for PropertyKey {
    fn from(name: String) -> Self {
        Self::Name(Cow::Owned(name))
    }
}

impl From<usize> for PropertyKey {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Index(index) => write!(f, "[{index}]"),
        }
    }
}
