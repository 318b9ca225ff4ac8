//! Retry policy with exponential backoff and jitter
//!
//! The job queue does not sleep between attempts; failed jobs are re-enqueued
//! with a delayed-delivery gate computed here. Delays grow exponentially per
//! attempt, capped, with ±20% jitter to avoid synchronized retry storms.

use std::time::Duration;

use rand::Rng;

use crate::models::{FailureKind, RetryClass};

/// Fraction of the computed delay used as the jitter band
const JITTER_FRACTION: f64 = 0.2;

/// What the queue should do with a failed job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-enqueue with the given delivery delay
    Requeue(Duration),
    /// Attempts exhausted or failure is non-retryable
    DeadLetter,
}

/// Backoff configuration shared by the worker pool and the scheduler
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Base delay for the first retry
    pub base: Duration,

    /// Cap for transient (soft) failures
    pub max_backoff: Duration,

    /// Smaller cap for likely-permanent failures that get one more attempt
    pub hard_max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(2),
            max_backoff: Duration::from_secs(300),
            hard_max_backoff: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn new(base: Duration, max_backoff: Duration) -> Self {
        let hard_max_backoff = std::cmp::max(base, max_backoff / 5);
        Self {
            base,
            max_backoff,
            hard_max_backoff,
        }
    }

    /// Decide what happens to a job that failed with `kind` on `attempt`
    /// (1-based) out of `max_attempts`.
    ///
    /// Soft failures retry until attempts are exhausted. Hard retryable
    /// failures get exactly one more attempt; a blocked site waits the full
    /// backoff cap before that attempt. Terminal failures never retry.
    pub fn decide(&self, kind: FailureKind, attempt: u32, max_attempts: u32) -> RetryDecision {
        match kind.retry_class() {
            RetryClass::Soft => {
                if attempt < max_attempts {
                    RetryDecision::Requeue(self.soft_delay(attempt))
                } else {
                    RetryDecision::DeadLetter
                }
            }
            RetryClass::HardRetryable => {
                if attempt == 1 && max_attempts > 1 {
                    let delay = if kind == FailureKind::Blocked {
                        // Blocked sites get one retry after a long cool-down
                        jitter(self.max_backoff)
                    } else {
                        self.hard_delay(attempt)
                    };
                    RetryDecision::Requeue(delay)
                } else {
                    RetryDecision::DeadLetter
                }
            }
            RetryClass::Terminal => RetryDecision::DeadLetter,
        }
    }

    /// `min(max_backoff, base * 2^(attempt-1))` with jitter
    fn soft_delay(&self, attempt: u32) -> Duration {
        jitter(self.exponential(attempt, self.max_backoff))
    }

    fn hard_delay(&self, attempt: u32) -> Duration {
        jitter(self.exponential(attempt, self.hard_max_backoff))
    }

    fn exponential(&self, attempt: u32, cap: Duration) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let raw = self.base.saturating_mul(2u32.saturating_pow(exp));
        std::cmp::min(raw, cap)
    }

    /// Undelayed bounds of the delay for a given attempt, used by tests and
    /// by callers that report expected retry windows.
    pub fn soft_delay_bounds(&self, attempt: u32) -> (Duration, Duration) {
        let nominal = self.exponential(attempt, self.max_backoff);
        (
            nominal.mul_f64(1.0 - JITTER_FRACTION),
            nominal.mul_f64(1.0 + JITTER_FRACTION),
        )
    }
}

/// Apply ±20% uniform jitter to a duration
fn jitter(d: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let factor = rng.gen_range(1.0 - JITTER_FRACTION..=1.0 + JITTER_FRACTION);
    d.mul_f64(factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(Duration::from_secs(2), Duration::from_secs(300))
    }

    #[test]
    fn test_soft_failure_retries_until_exhausted() {
        let p = policy();

        match p.decide(FailureKind::Timeout, 1, 3) {
            RetryDecision::Requeue(delay) => {
                let (lo, hi) = p.soft_delay_bounds(1);
                assert!(delay >= lo && delay <= hi, "delay {delay:?} out of bounds");
            }
            other => panic!("expected requeue, got {other:?}"),
        }

        match p.decide(FailureKind::Timeout, 2, 3) {
            RetryDecision::Requeue(delay) => {
                let (lo, hi) = p.soft_delay_bounds(2);
                assert!(delay >= lo && delay <= hi);
            }
            other => panic!("expected requeue, got {other:?}"),
        }

        assert_eq!(p.decide(FailureKind::Timeout, 3, 3), RetryDecision::DeadLetter);
    }

    #[test]
    fn test_delays_double_per_attempt() {
        let p = policy();
        let (lo1, hi1) = p.soft_delay_bounds(1);
        let (lo2, hi2) = p.soft_delay_bounds(2);
        let (lo3, hi3) = p.soft_delay_bounds(3);

        assert_eq!(lo1, Duration::from_secs(2).mul_f64(0.8));
        assert_eq!(hi1, Duration::from_secs(2).mul_f64(1.2));
        assert_eq!(lo2, Duration::from_secs(4).mul_f64(0.8));
        assert_eq!(hi2, Duration::from_secs(4).mul_f64(1.2));
        assert_eq!(lo3, Duration::from_secs(8).mul_f64(0.8));
        assert_eq!(hi3, Duration::from_secs(8).mul_f64(1.2));
    }

    #[test]
    fn test_soft_delay_is_capped() {
        let p = RetryPolicy::new(Duration::from_secs(2), Duration::from_secs(10));
        // 2 * 2^9 far exceeds the cap
        match p.decide(FailureKind::NetworkError, 10, 20) {
            RetryDecision::Requeue(delay) => {
                assert!(delay <= Duration::from_secs(10).mul_f64(1.2));
            }
            other => panic!("expected requeue, got {other:?}"),
        }
    }

    #[test]
    fn test_hard_failure_retries_exactly_once() {
        let p = policy();

        assert!(matches!(
            p.decide(FailureKind::ParseMiss, 1, 3),
            RetryDecision::Requeue(_)
        ));
        assert_eq!(p.decide(FailureKind::ParseMiss, 2, 3), RetryDecision::DeadLetter);
        assert_eq!(p.decide(FailureKind::HttpStatus, 2, 3), RetryDecision::DeadLetter);
    }

    #[test]
    fn test_hard_failure_respects_single_attempt_budget() {
        let p = policy();
        assert_eq!(p.decide(FailureKind::ParseMiss, 1, 1), RetryDecision::DeadLetter);
    }

    #[test]
    fn test_blocked_waits_long_before_single_retry() {
        let p = policy();
        match p.decide(FailureKind::Blocked, 1, 3) {
            RetryDecision::Requeue(delay) => {
                // Full cap with jitter, not the hard cap
                assert!(delay >= p.max_backoff.mul_f64(0.8));
            }
            other => panic!("expected requeue, got {other:?}"),
        }
        assert_eq!(p.decide(FailureKind::Blocked, 2, 3), RetryDecision::DeadLetter);
    }

    #[test]
    fn test_terminal_failures_never_retry() {
        let p = policy();
        assert_eq!(p.decide(FailureKind::DomainBlocked, 1, 5), RetryDecision::DeadLetter);
        assert_eq!(p.decide(FailureKind::InvalidUrl, 1, 5), RetryDecision::DeadLetter);
        assert_eq!(p.decide(FailureKind::Internal, 1, 5), RetryDecision::DeadLetter);
    }
}
