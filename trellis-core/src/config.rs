//! Scheduler configuration.
//!
//! The engine has very few knobs. They are grouped here so a host can load
//! them from its own configuration file through serde and install them with
//! [`Scheduler::configure`](crate::scheduler::Scheduler::configure).

use serde::{Deserialize, Serialize};

/// Default upper bound on drain passes before a flush is considered looping.
pub const DEFAULT_MAX_PASSES: usize = 1000;

/// Tunables for the update queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum number of passes a single drain may take. Tasks that enqueue
    /// more work during a flush each cost one pass.
    pub max_passes: usize,

    /// Catch panics from scheduled tasks and keep flushing. When disabled a
    /// panicking task unwinds out of `flush`.
    pub catch_panics: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_passes: DEFAULT_MAX_PASSES,
            catch_panics: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.max_passes, DEFAULT_MAX_PASSES);
        assert!(config.catch_panics);
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let config: SchedulerConfig = serde_json::from_str(r#"{"max_passes": 8}"#).unwrap();
        assert_eq!(config.max_passes, 8);
        assert!(config.catch_panics);

        let config: SchedulerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, SchedulerConfig::default());
    }
}
