//! The "work-queue fabric" component (§2, §5): a rate limiter shared by every
//! `error_policy`, plus the keyed-dedup discipline reconcilers rely on.
//!
//! `kube::runtime::Controller` already supplies the per-key scheduling and
//! watch-stream plumbing; this module supplies the one piece spec.md calls
//! out explicitly — exponential backoff floored at `wakeupInterval` — so
//! every controller's `error_policy` computes requeue delays the same way
//! instead of hard-coding a duration per call site.

use std::time::Duration;

/// Exponential backoff clamped to `[floor, ceiling]`. One instance is shared
/// (read-only; it carries no per-key state) across every reconciler's
/// `error_policy`.
#[derive(Clone, Copy, Debug)]
pub struct RateLimiter {
    floor: Duration,
    ceiling: Duration,
    multiplier: u32,
}

impl RateLimiter {
    pub fn new(floor: Duration, ceiling: Duration) -> Self {
        Self {
            floor,
            ceiling,
            multiplier: 2,
        }
    }

    /// Delay before the `attempt`-th retry (0-indexed: the first retry after
    /// the initial failure is `attempt == 0`).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let scaled = self
            .floor
            .checked_mul(self.multiplier.saturating_pow(attempt))
            .unwrap_or(self.ceiling);
        scaled.min(self.ceiling)
    }

    /// The floor duration, used for self-loop requeues that are not retries
    /// (e.g. Pending -> Pending with requirements still missing).
    pub fn floor(&self) -> Duration {
        self.floor
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(5 * 60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_then_clamps_at_ceiling() {
        let limiter = RateLimiter::new(Duration::from_secs(5), Duration::from_secs(60));
        assert_eq!(limiter.backoff(0), Duration::from_secs(5));
        assert_eq!(limiter.backoff(1), Duration::from_secs(10));
        assert_eq!(limiter.backoff(2), Duration::from_secs(20));
        assert_eq!(limiter.backoff(10), Duration::from_secs(60));
    }

    #[test]
    fn floor_matches_wakeup_interval() {
        let limiter = RateLimiter::new(Duration::from_secs(30), Duration::from_secs(300));
        assert_eq!(limiter.floor(), Duration::from_secs(30));
    }
}
