//! Trellis Core
//!
//! This crate provides fine-grained dependency tracking and ordered update
//! scheduling. It implements:
//!
//! - A tracker that records which object properties a computation reads
//! - A registry mapping those properties back to their readers
//! - An ordered, deduplicated, batched update queue
//! - Computeds, effects and watches built on the two
//!
//! The crate does not intercept property access. Whatever owns the data
//! reports reads with [`track_get`] and writes with [`track_set`]; see the
//! [`reactive::Tracker`] documentation for the exact contract.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: dependency tracking, computeds, effects and watches
//! - `scheduler`: the update queue
//! - `config`: scheduler tunables
//! - `error`: error types
//!
//! # Flushing
//!
//! Writes never re-run consumers on the spot. They enqueue work with the
//! [`Scheduler`], and nothing drains that queue automatically: the host
//! calls [`Scheduler::flush`], awaits [`until_complete`], or spawns
//! [`Scheduler::drive`] on a `tokio::task::LocalSet` to flush after every
//! turn that scheduled work.
//!
//! # Example
//!
//! ```rust
//! use std::cell::{Cell, RefCell};
//! use std::rc::Rc;
//! use trellis_core::{track_get, track_set, Effect, Scheduler};
//!
//! let a = Rc::new(RefCell::new(1));
//! let calls = Rc::new(Cell::new(0));
//!
//! let (a_clone, calls_clone) = (a.clone(), calls.clone());
//! let _effect = Effect::new(move || {
//!     track_get(&a_clone, "b");
//!     calls_clone.set(calls_clone.get() + 1);
//! });
//! assert_eq!(calls.get(), 1);
//!
//! *a.borrow_mut() = 2;
//! track_set(&a, "b");
//! assert_eq!(calls.get(), 1); // queued, not run yet
//!
//! Scheduler::flush();
//! assert_eq!(calls.get(), 2);
//! ```

pub mod config;
pub mod error;
pub mod reactive;
pub mod scheduler;

pub use config::SchedulerConfig;
pub use error::{EvaluationError, SchedulerError, TaskError, TrackingStackError};
pub use reactive::{
    begin_track, end_track, track_get, track_set, untrack, watch, watch_immediate, watch_once,
    watch_until, Callback, CallbackId, Computed, ComputedState, DependencySet, Effect,
    EffectState, Observed, PropertyKey, Tracker, TrackingContext, Watch,
};
pub use scheduler::{enqueue, until_complete, FlushReport, Order, Scheduler};

/// Discard all tracking and scheduling state of the current thread.
///
/// Consumers created before the reset keep their handles but are no longer
/// registered anywhere.
pub fn reset() {
    Tracker::reset();
    Scheduler::reset();
}
