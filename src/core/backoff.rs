// src/core/backoff.rs

//! Exponential backoff with jitter, shared by the outbound replicators.

use rand::Rng;
use std::time::Duration;

/// The initial delay before the first replication retry.
pub const INITIAL_REPLICATION_DELAY: Duration = Duration::from_secs(1);
/// The initial delay before the first drop-database retry.
pub const INITIAL_DROP_DATABASE_DELAY: Duration = Duration::from_millis(1);
/// The maximum delay for any retry strategy.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Retry timing parameters for one replicator kind.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl BackoffPolicy {
    /// Policy for the commit-hook and blob replicators.
    pub const fn replication() -> Self {
        Self {
            initial: INITIAL_REPLICATION_DELAY,
            max: MAX_RETRY_DELAY,
        }
    }

    /// Policy for outbound drop-database replication.
    pub const fn drop_database() -> Self {
        Self {
            initial: INITIAL_DROP_DATABASE_DELAY,
            max: MAX_RETRY_DELAY,
        }
    }
}

/// An exponential backoff state machine. Delays double on each call to
/// [`Backoff::next_delay`] up to the policy's maximum; jitter is added to
/// avoid thundering-herd retries against a recovering peer. Total elapsed
/// time is unbounded.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    current: Duration,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            current: policy.initial,
        }
    }

    /// Returns the next delay to wait and advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.policy.max);

        let jitter_ms = (delay.as_millis() as u64 / 4).min(500);
        let jitter = if jitter_ms > 0 {
            Duration::from_millis(rand::thread_rng().gen_range(0..jitter_ms))
        } else {
            Duration::ZERO
        };
        delay + jitter
    }

    /// Resets the schedule to the initial delay after a success.
    pub fn reset(&mut self) {
        self.current = self.policy.initial;
    }

    /// The delay the next call to [`Backoff::next_delay`] will start from,
    /// before jitter.
    pub fn current(&self) -> Duration {
        self.current
    }
}
