//! Update Scheduler
//!
//! Invalidated consumers do not re-run on the spot. They enqueue a task
//! here, and the queue runs everything that accumulated in one ordered batch
//! at the next flush.
//!
//! # Guarantees
//!
//! 1. A callback is pending at most once per flush cycle, however many of
//!    its dependencies were written.
//!
//! 2. Within a pass, tasks run by ascending [`Order`]. Orders are assigned
//!    at construction, so consumers run in the order they were created.
//!
//! 3. Work enqueued during a flush is drained before the flush returns.
//!
//! 4. A panicking task is contained and reported; the rest of the batch
//!    still runs.

mod queue;
mod task;

pub use queue::{enqueue, until_complete, FlushReport, Scheduler};
pub use task::{Order, ScheduledTask};
