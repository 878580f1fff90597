//! Admission limiting for queues and HTTP routes.

use governor::{Quota, RateLimiter, clock::{Clock, DefaultClock}, DefaultDirectRateLimiter};
use std::num::NonZeroU32;
use std::time::Duration;

/// `max` events per `period`, with the whole allowance available as a burst.
pub fn quota(max: u32, period: Duration) -> Quota {
    let max = NonZeroU32::new(max).unwrap_or(NonZeroU32::MIN);
    let replenish = (period / max.get()).max(Duration::from_nanos(1));

    Quota::with_period(replenish)
        .unwrap_or_else(|| Quota::per_second(max))
        .allow_burst(max)
}

/// Fixed-quota limiter that rejects instead of buffering.
pub struct AdmissionLimiter {
    limiter: DefaultDirectRateLimiter,
}

impl AdmissionLimiter {
    pub fn new(max: u32, period: Duration) -> Self {
        Self {
            limiter: RateLimiter::direct(quota(max, period)),
        }
    }

    /// Takes one unit of quota, or returns the whole seconds until one frees up.
    pub fn check(&self) -> Result<(), u64> {
        self.limiter
            .check()
            .map_err(|not_until| retry_after_secs(not_until.wait_time_from(DefaultClock::default().now())))
    }
}

/// Rounds a wait up to whole seconds, never below one.
pub fn retry_after_secs(wait: Duration) -> u64 {
    let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
    secs.max(1)
}
