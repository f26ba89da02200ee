//! Per-key capped exponential backoff.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use crate::config::BackoffConfig;

/// Tracks consecutive failures per key.
pub struct Backoff<K> {
    config: BackoffConfig,
    failures: HashMap<K, u32>,
}

impl<K: Hash + Eq + Clone> Backoff<K> {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            failures: HashMap::new(),
        }
    }

    /// Record a failure and return the delay before the next attempt.
    pub fn next_delay(&mut self, key: &K) -> Duration {
        let failures = self.failures.entry(key.clone()).or_insert(0);
        let exp = (*failures).min(31);
        *failures = failures.saturating_add(1);
        self.config
            .base
            .checked_mul(1u32 << exp)
            .unwrap_or(self.config.cap)
            .min(self.config.cap)
    }

    /// Delay for failures that need a human.
    pub fn unrecoverable_delay(&self) -> Duration {
        self.config.unrecoverable
    }

    /// Forget failures after a successful pass.
    pub fn reset(&mut self, key: &K) {
        self.failures.remove(key);
    }

    pub fn failures(&self, key: &K) -> u32 {
        self.failures.get(key).copied().unwrap_or(0)
    }
}
