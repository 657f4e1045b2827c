//! At-least-once, no-progress-on-failure retry policy.
//!
//! A failed tick leaves the processor's cursor where it was, so the next tick
//! re-reads the same range. This module decides *when* that next tick happens
//! and when repeated failures are escalated.

use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Upper bound on the delay between retries.
    pub max_backoff: Duration,
    /// Consecutive failures after which the task is reported as stalled.
    pub failure_threshold: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_backoff: Duration::from_secs(300),
            failure_threshold: 5,
        }
    }
}

/// What the scheduler should do after recording a tick outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Wait this long before the next tick.
    Wait(Duration),
    /// Same as `Wait`, and the failure threshold was just reached.
    Stalled(Duration),
    /// First success after a stall.
    Recovered(Duration),
}

impl Outcome {
    pub fn delay(&self) -> Duration {
        match *self {
            Outcome::Wait(d) | Outcome::Stalled(d) | Outcome::Recovered(d) => d,
        }
    }
}

/// Per-task consecutive failure counter.
#[derive(Debug)]
pub struct FailureTracker {
    policy: RetryPolicy,
    interval: Duration,
    consecutive: u32,
}

impl FailureTracker {
    pub fn new(policy: RetryPolicy, interval: Duration) -> Self {
        Self {
            policy,
            interval,
            consecutive: 0,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive
    }

    pub fn record_success(&mut self) -> Outcome {
        let was_stalled = self.consecutive >= self.policy.failure_threshold;
        self.consecutive = 0;
        if was_stalled {
            Outcome::Recovered(self.interval)
        } else {
            Outcome::Wait(self.interval)
        }
    }

    /// `min(interval * 2^(n-1), max_backoff)` after the n-th consecutive failure.
    pub fn record_failure(&mut self) -> Outcome {
        self.consecutive = self.consecutive.saturating_add(1);
        let factor = 1u32 << (self.consecutive - 1).min(16);
        let delay = self
            .interval
            .saturating_mul(factor)
            .min(self.policy.max_backoff.max(self.interval));

        if self.consecutive == self.policy.failure_threshold {
            Outcome::Stalled(delay)
        } else {
            Outcome::Wait(delay)
        }
    }
}
