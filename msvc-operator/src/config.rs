//! Controller configuration.

use std::time::Duration;

/// How often objects are looked at when nothing fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Intervals {
    /// Delay between passes while the remote side is transitioning.
    pub poll: Duration,
    /// Delay between passes for settled objects, and between full relists.
    pub resync: Duration,
}

impl Default for Intervals {
    fn default() -> Self {
        Self {
            poll: Duration::from_secs(10),
            resync: Duration::from_secs(300),
        }
    }
}

/// Requeue delays after failed passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay after the first failure; doubled on each consecutive failure.
    pub base: Duration,
    /// Upper bound for transient failures.
    pub cap: Duration,
    /// Fixed delay for unrecoverable failures.
    pub unrecoverable: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(300),
            unrecoverable: Duration::from_secs(3600),
        }
    }
}

/// Controller settings.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Number of concurrent reconcile workers.
    pub workers: usize,
    pub intervals: Intervals,
    pub backoff: BackoffConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            intervals: Intervals::default(),
            backoff: BackoffConfig::default(),
        }
    }
}
