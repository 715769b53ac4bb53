//! Error types.
//!
//! Only stack corruption is a hard error. Everything that user code can
//! cause (a panicking getter, effect or scheduled task) is contained where it
//! happens, logged, and recorded in one of the types below so callers can
//! inspect it after the fact.

use std::any::Any;

use thiserror::Error;

use crate::reactive::CallbackId;
use crate::scheduler::Order;

/// The tracking-context stack is out of balance.
///
/// This always indicates a bug in the caller: every `begin_track` must be
/// paired with exactly one `end_track`, innermost first.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackingStackError {
    /// `end_track` was called with no active context.
    #[error("end_track called with no active tracking context")]
    Empty,

    /// The context on top of the stack is not the one being closed.
    #[error("tracking context mismatch: expected {expected:?} at depth {depth}, found {found:?}")]
    Mismatch {
        expected: Option<CallbackId>,
        found: Option<CallbackId>,
        depth: usize,
    },
}

/// A getter, effect body or watch producer panicked.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("consumer {consumer:?} panicked during evaluation: {message}")]
pub struct EvaluationError {
    pub consumer: CallbackId,
    pub message: String,
}

/// A task panicked while the scheduler was flushing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("scheduled task {task:?} (order {order}) panicked: {message}")]
pub struct TaskError {
    pub task: CallbackId,
    pub order: Order,
    pub message: String,
}

/// Scheduler-level failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// Tasks kept re-enqueueing each other past the configured limit.
    #[error("flush did not settle after {passes} passes; {dropped} pending tasks dropped")]
    FlushLoop { passes: usize, dropped: usize },
}

/// Extract a readable message from a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_message_handles_common_payloads() {
        let payload = std::panic::catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "boom");

        let payload = std::panic::catch_unwind(|| panic!("{} {}", "formatted", 1)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "formatted 1");

        let payload = std::panic::catch_unwind(|| std::panic::panic_any(7u8)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }

    #[test]
    fn errors_render_readably() {
        let err = TrackingStackError::Empty;
        assert_eq!(
            err.to_string(),
            "end_track called with no active tracking context"
        );

        let err = SchedulerError::FlushLoop { passes: 3, dropped: 1 };
        assert!(err.to_string().contains("3 passes"));
    }
}
