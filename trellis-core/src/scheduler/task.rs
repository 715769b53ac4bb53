//! Scheduled tasks and their ordering keys.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::reactive::Callback;

/// Processing position of a consumer within a flush.
///
/// Assigned once per consumer at construction from a strictly increasing
/// counter, so consumers created earlier always run earlier in a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Order(u64);

impl Order {
    /// Take the next order from the global sequence.
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw order value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl From<u64> for Order {
    fn from(order: u64) -> Self {
        Self(order)
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A task waiting in the pending batch.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    pub(crate) callback: Callback,
    pub(crate) order: Order,
    pub(crate) generation: u64,
}

impl ScheduledTask {
    pub fn callback(&self) -> &Callback {
        &self.callback
    }

    pub fn order(&self) -> Order {
        self.order
    }

    /// Flush cycle the task was enqueued for.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_strictly_increase() {
        let a = Order::next();
        let b = Order::next();
        let c = Order::next();

        assert!(a < b && b < c);
    }

    #[test]
    fn explicit_orders_compare_numerically() {
        assert!(Order::from(0) < Order::from(1));
        assert_eq!(Order::from(7).raw(), 7);
        assert_eq!(Order::from(7).to_string(), "7");
    }
}
