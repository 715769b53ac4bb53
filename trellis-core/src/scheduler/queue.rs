//! Update Queue
//!
//! The queue collects tasks from invalidated consumers and runs them in
//! batches.
//!
//! # Algorithm
//!
//! 1. The first `enqueue` of an idle period opens a new generation and wakes
//!    the flush driver, if one is running.
//! 2. Further enqueues join the pending batch. A task whose callback is
//!    already pending is dropped, whatever order it was given.
//! 3. A flush takes the whole batch at once, sorts it by ascending order and
//!    runs it. Panics are caught and recorded; the rest of the batch still
//!    runs.
//! 4. Tasks enqueued while flushing form the next pass of the same drain,
//!    unless they are still waiting to run in the current pass.
//! 5. The drain ends when a pass leaves nothing pending.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use indexmap::IndexMap;
use tokio::sync::Notify;
use tracing::{debug, error, trace};

use super::task::{Order, ScheduledTask};
use crate::config::SchedulerConfig;
use crate::error::{panic_message, SchedulerError, TaskError};
use crate::reactive::{Callback, CallbackId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Scheduled,
    Flushing,
}

struct SchedulerState {
    pending: RefCell<IndexMap<CallbackId, ScheduledTask>>,
    /// Tasks of the current pass that have not run yet.
    in_pass: RefCell<HashSet<CallbackId>>,
    phase: Cell<Phase>,
    generation: Cell<u64>,
    config: RefCell<SchedulerConfig>,
    wake: Rc<Notify>,
}

impl Default for SchedulerState {
    fn default() -> Self {
        Self {
            pending: RefCell::new(IndexMap::new()),
            in_pass: RefCell::new(HashSet::new()),
            phase: Cell::new(Phase::Idle),
            generation: Cell::new(0),
            config: RefCell::new(SchedulerConfig::default()),
            wake: Rc::new(Notify::new()),
        }
    }
}

thread_local! {
    static STATE: SchedulerState = SchedulerState::default();
}

/// Outcome of one drain.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FlushReport {
    /// Number of sorted passes it took to settle.
    pub passes: usize,
    /// Number of tasks invoked, including the ones that panicked.
    pub tasks_run: usize,
    /// Tasks that panicked.
    pub failures: Vec<TaskError>,
    /// Set when the drain was cut short.
    pub aborted: Option<SchedulerError>,
}

impl FlushReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.aborted.is_none()
    }

    fn merge(&mut self, other: FlushReport) {
        self.passes += other.passes;
        self.tasks_run += other.tasks_run;
        self.failures.extend(other.failures);
        if self.aborted.is_none() {
            self.aborted = other.aborted;
        }
    }
}

/// Resets the phase even if a task unwinds out of the flush.
struct FlushGuard;

impl Drop for FlushGuard {
    fn drop(&mut self) {
        let _ = STATE.try_with(|state| {
            state.in_pass.borrow_mut().clear();
            let next = if state.pending.borrow().is_empty() {
                Phase::Idle
            } else {
                Phase::Scheduled
            };
            state.phase.set(next);
        });
    }
}

/// Entry points of the update queue.
///
/// Enqueueing never runs anything by itself. Pending tasks run when the host
/// drains the queue, in one of three ways:
///
/// - call [`Scheduler::flush`] synchronously,
/// - await [`Scheduler::until_complete`], or
/// - spawn [`Scheduler::drive`] on a `tokio::task::LocalSet`, which flushes
///   at the executor's next turn after work is scheduled.
///
/// Without one of these, invalidated consumers stay pending.
pub struct Scheduler;

impl Scheduler {
    /// Add a task to the pending batch.
    ///
    /// A no-op if a task with the same callback identity is already waiting.
    pub fn enqueue(callback: &Callback, order: Order) {
        STATE.with(|state| {
            let id = callback.id();
            if state.in_pass.borrow().contains(&id) {
                trace!(task = id.raw(), "already queued in the running pass");
                return;
            }

            let mut pending = state.pending.borrow_mut();
            if pending.contains_key(&id) {
                trace!(task = id.raw(), "already pending");
                return;
            }

            if state.phase.get() == Phase::Idle {
                state.phase.set(Phase::Scheduled);
                state.generation.set(state.generation.get() + 1);
                debug!(generation = state.generation.get(), "flush scheduled");
                state.wake.notify_one();
            }

            trace!(task = id.raw(), %order, "enqueued");
            pending.insert(
                id,
                ScheduledTask {
                    callback: callback.clone(),
                    order,
                    generation: state.generation.get(),
                },
            );
        });
    }

    /// Drain the queue now.
    ///
    /// Calling this from inside a running task does nothing: the outer drain
    /// already picks up whatever the task enqueues.
    pub fn flush() -> FlushReport {
        let config = STATE.with(|state| {
            if state.phase.get() == Phase::Flushing {
                return None;
            }
            state.phase.set(Phase::Flushing);
            Some(state.config.borrow().clone())
        });
        let Some(config) = config else {
            trace!("flush requested while flushing");
            return FlushReport::default();
        };
        let _guard = FlushGuard;

        let mut report = FlushReport::default();
        loop {
            let mut batch: Vec<ScheduledTask> = STATE.with(|state| {
                let batch: Vec<_> = std::mem::take(&mut *state.pending.borrow_mut())
                    .into_values()
                    .collect();
                state
                    .in_pass
                    .borrow_mut()
                    .extend(batch.iter().map(|task| task.callback.id()));
                batch
            });
            if batch.is_empty() {
                break;
            }

            if report.passes >= config.max_passes {
                let err = SchedulerError::FlushLoop {
                    passes: report.passes,
                    dropped: batch.len(),
                };
                error!(%err, "aborting flush");
                report.aborted = Some(err);
                break;
            }
            report.passes += 1;

            batch.sort_by_key(ScheduledTask::order);
            debug!(pass = report.passes, tasks = batch.len(), "flushing");
            for task in batch {
                STATE.with(|state| state.in_pass.borrow_mut().remove(&task.callback.id()));
                report.tasks_run += 1;
                if !config.catch_panics {
                    task.callback.invoke();
                    continue;
                }
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| task.callback.invoke())) {
                    let err = TaskError {
                        task: task.callback.id(),
                        order: task.order,
                        message: panic_message(payload.as_ref()),
                    };
                    error!(task = err.task.raw(), order = %err.order, message = %err.message, "scheduled task panicked");
                    report.failures.push(err);
                }
            }
        }

        debug!(passes = report.passes, tasks = report.tasks_run, "flush complete");
        report
    }

    /// Wait until every pending task, and everything they enqueue in turn,
    /// has run.
    pub async fn until_complete() -> FlushReport {
        let mut report = FlushReport::default();
        loop {
            report.merge(Self::flush());
            tokio::task::yield_now().await;
            if Self::is_idle() {
                return report;
            }
        }
    }

    /// Flush automatically whenever work is scheduled.
    ///
    /// Spawn this on a `tokio::task::LocalSet` running on the same thread as
    /// the tracked code; each idle-to-scheduled transition then flushes at
    /// the executor's next turn. The future never completes.
    pub async fn drive() {
        let wake = STATE.with(|state| state.wake.clone());
        loop {
            wake.notified().await;
            let report = Self::flush();
            if !report.is_clean() {
                debug!(failures = report.failures.len(), "driven flush reported failures");
            }
        }
    }

    /// Install a new configuration for this thread.
    pub fn configure(config: SchedulerConfig) {
        STATE.with(|state| *state.config.borrow_mut() = config);
    }

    pub fn config() -> SchedulerConfig {
        STATE.with(|state| state.config.borrow().clone())
    }

    /// Number of tasks waiting for the next pass.
    pub fn pending_len() -> usize {
        STATE.with(|state| state.pending.borrow().len())
    }

    /// Whether nothing is pending and no flush is running.
    pub fn is_idle() -> bool {
        STATE.with(|state| state.phase.get() == Phase::Idle && state.pending.borrow().is_empty())
    }

    /// Whether a flush is currently running.
    pub fn is_flushing() -> bool {
        STATE.with(|state| state.phase.get() == Phase::Flushing)
    }

    /// Id of the most recent flush cycle.
    pub fn generation() -> u64 {
        STATE.with(|state| state.generation.get())
    }

    /// Drop all pending work and restore the default configuration.
    pub fn reset() {
        STATE.with(|state| {
            state.pending.borrow_mut().clear();
            state.in_pass.borrow_mut().clear();
            state.phase.set(Phase::Idle);
            *state.config.borrow_mut() = SchedulerConfig::default();
        });
    }
}

/// Shorthand for [`Scheduler::enqueue`].
pub fn enqueue(callback: &Callback, order: Order) {
    Scheduler::enqueue(callback, order)
}

/// Shorthand for [`Scheduler::until_complete`].
pub async fn until_complete() -> FlushReport {
    Scheduler::until_complete().await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> Rc<RefCell<Vec<&'static str>>> {
        Rc::new(RefCell::new(Vec::new()))
    }

    fn push(log: &Rc<RefCell<Vec<&'static str>>>, name: &'static str) -> Callback {
        let log = log.clone();
        Callback::new(move || log.borrow_mut().push(name))
    }

    #[test]
    fn runs_in_ascending_order() {
        let log = recorder();
        let f1 = push(&log, "f1");
        let f2 = push(&log, "f2");

        Scheduler::enqueue(&f1, Order::from(1));
        Scheduler::enqueue(&f2, Order::from(0));
        let report = Scheduler::flush();

        assert_eq!(*log.borrow(), vec!["f2", "f1"]);
        assert_eq!(report.passes, 1);
        assert_eq!(report.tasks_run, 2);
        assert!(Scheduler::is_idle());
    }

    #[test]
    fn dedups_by_identity() {
        let log = recorder();
        let task = push(&log, "task");

        Scheduler::enqueue(&task, Order::from(5));
        Scheduler::enqueue(&task, Order::from(1));
        Scheduler::enqueue(&task.clone(), Order::from(9));
        assert_eq!(Scheduler::pending_len(), 1);

        Scheduler::flush();
        assert_eq!(*log.borrow(), vec!["task"]);
    }

    #[test]
    fn first_enqueue_opens_a_generation() {
        let task = Callback::new(|| {});
        let other = Callback::new(|| {});
        let before = Scheduler::generation();

        Scheduler::enqueue(&task, Order::from(0));
        Scheduler::enqueue(&other, Order::from(1));
        assert_eq!(Scheduler::generation(), before + 1);
        assert!(!Scheduler::is_idle());

        Scheduler::flush();
        Scheduler::enqueue(&task, Order::from(0));
        assert_eq!(Scheduler::generation(), before + 2);
        Scheduler::flush();
    }

    #[test]
    fn panicking_task_does_not_stop_the_batch() {
        let log = recorder();
        let bad = Callback::new(|| panic!("task exploded"));
        let good = push(&log, "good");

        Scheduler::enqueue(&bad, Order::from(0));
        Scheduler::enqueue(&good, Order::from(1));
        let report = Scheduler::flush();

        assert_eq!(*log.borrow(), vec!["good"]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].task, bad.id());
        assert_eq!(report.failures[0].message, "task exploded");
        assert!(Scheduler::is_idle());
    }

    #[test]
    fn tasks_enqueued_during_flush_join_the_drain() {
        let log = recorder();
        let second = push(&log, "second");
        let second_clone = second.clone();
        let log_clone = log.clone();
        let first = Callback::new(move || {
            log_clone.borrow_mut().push("first");
            Scheduler::enqueue(&second_clone, Order::from(0));
        });

        Scheduler::enqueue(&first, Order::from(10));
        let report = Scheduler::flush();

        assert_eq!(*log.borrow(), vec!["first", "second"]);
        assert_eq!(report.passes, 2);
    }

    #[test]
    fn enqueue_of_a_task_later_in_the_pass_is_dropped() {
        let log = recorder();
        let later = push(&log, "later");
        let later_clone = later.clone();
        let log_clone = log.clone();
        let earlier = Callback::new(move || {
            log_clone.borrow_mut().push("earlier");
            Scheduler::enqueue(&later_clone, Order::from(2));
        });

        Scheduler::enqueue(&earlier, Order::from(1));
        Scheduler::enqueue(&later, Order::from(2));
        let report = Scheduler::flush();

        assert_eq!(*log.borrow(), vec!["earlier", "later"]);
        assert_eq!(report.passes, 1);
    }

    #[test]
    fn runaway_drain_is_cut_short() {
        Scheduler::configure(SchedulerConfig {
            max_passes: 3,
            ..SchedulerConfig::default()
        });
        let count = Rc::new(Cell::new(0));
        let count_clone = count.clone();
        let slot: Rc<RefCell<Option<Callback>>> = Rc::new(RefCell::new(None));
        let slot_clone = slot.clone();
        let looping = Callback::new(move || {
            count_clone.set(count_clone.get() + 1);
            if let Some(me) = slot_clone.borrow().as_ref() {
                Scheduler::enqueue(me, Order::from(0));
            }
        });
        *slot.borrow_mut() = Some(looping.clone());

        Scheduler::enqueue(&looping, Order::from(0));
        let report = Scheduler::flush();

        assert_eq!(count.get(), 3);
        assert_eq!(
            report.aborted,
            Some(SchedulerError::FlushLoop { passes: 3, dropped: 1 })
        );
        assert!(Scheduler::is_idle());
        slot.borrow_mut().take();
    }

    #[test]
    fn nested_flush_is_a_no_op() {
        let inner_report = Rc::new(RefCell::new(None));
        let inner_clone = inner_report.clone();
        let task = Callback::new(move || {
            *inner_clone.borrow_mut() = Some(Scheduler::flush());
        });

        Scheduler::enqueue(&task, Order::from(0));
        Scheduler::flush();

        assert_eq!(inner_report.borrow().clone(), Some(FlushReport::default()));
    }

    #[tokio::test]
    async fn nothing_runs_without_a_drain() {
        let log = recorder();
        let task = push(&log, "task");

        Scheduler::enqueue(&task, Order::next());
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        assert!(log.borrow().is_empty());
        assert_eq!(Scheduler::pending_len(), 1);

        Scheduler::flush();
        assert_eq!(*log.borrow(), vec!["task"]);
        assert!(Scheduler::is_idle());
    }

    #[tokio::test]
    async fn until_complete_drains_chains() {
        let log = recorder();
        let third = push(&log, "third");
        let log_clone = log.clone();
        let second = Callback::new(move || {
            log_clone.borrow_mut().push("second");
            Scheduler::enqueue(&third, Order::from(3));
        });
        let log_clone = log.clone();
        let first = Callback::new(move || {
            log_clone.borrow_mut().push("first");
            Scheduler::enqueue(&second, Order::from(2));
        });

        Scheduler::enqueue(&first, Order::from(1));
        let report = Scheduler::until_complete().await;

        assert_eq!(*log.borrow(), vec!["first", "second", "third"]);
        assert_eq!(report.tasks_run, 3);
        assert!(Scheduler::is_idle());
    }

    #[tokio::test]
    async fn driver_flushes_on_its_own() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let log = recorder();
                tokio::task::spawn_local(Scheduler::drive());

                Scheduler::enqueue(&push(&log, "driven"), Order::next());
                assert!(log.borrow().is_empty());

                for _ in 0..4 {
                    tokio::task::yield_now().await;
                }
                assert_eq!(*log.borrow(), vec!["driven"]);
            })
            .await;
    }
}
