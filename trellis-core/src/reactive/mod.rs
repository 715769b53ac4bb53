//! Reactive Primitives
//!
//! This module implements dependency tracking and the consumers built on it:
//! computeds, effects and watches.
//!
//! # Concepts
//!
//! ## Tracking
//!
//! A consumer runs inside a tracked run. Every property read reported with
//! `track_get` during that run becomes one of its dependencies. When the run
//! ends, the reads are committed to the registry, replacing whatever the
//! consumer read the time before.
//!
//! ## Computeds
//!
//! A Computed caches a derived value. A write to one of its dependencies
//! schedules it to go stale; the next read recomputes.
//!
//! ## Effects
//!
//! An Effect re-runs a side-effecting function whenever a dependency is
//! written. Re-runs go through the scheduler, so they happen in construction
//! order at the next flush.
//!
//! ## Watches
//!
//! A Watch runs a producer under an effect and calls a handler with the new
//! and old value when the result changes.
//!
//! # Implementation Notes
//!
//! All state (the context stack, the registry and the scheduler queue) is
//! thread-local. The engine is single-threaded and cooperative: exactly one
//! tracked run records at any instant, and no locking is needed.

mod callback;
mod computed;
mod context;
mod effect;
mod observed;
mod registry;
mod snapshot;
mod source;
mod tracker;
mod watch;

pub use callback::{Callback, CallbackId};
pub use computed::{Computed, ComputedState, VALUE_KEY};
pub use context::TrackingContext;
pub use effect::{Effect, EffectState};
pub use observed::Observed;
pub use registry::{DependencySet, Revision};
pub use snapshot::Snapshot;
pub use source::{PropertyKey, SourceId, SourceRef};
pub use tracker::{begin_track, end_track, track_get, track_set, untrack, Tracker};
pub use watch::{
    watch, watch_immediate, watch_immediate_with, watch_once, watch_once_with, watch_until,
    watch_until_with, watch_with, Watch,
};
