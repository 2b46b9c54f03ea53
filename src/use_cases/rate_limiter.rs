// Per-connection message rate limiter: a token bucket with violation escalation.
// Owned by the read pump; consulted once per inbound frame.

use std::time::{Duration, Instant};

const CAPACITY: f64 = 10.0;
const REFILL_PER_SEC: f64 = 30.0 / 10.0;
const WINDOW: Duration = Duration::from_secs(10);
const MAX_VIOLATIONS: u32 = 3;
const BLOCK_DURATION: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Within budget; frame may proceed.
    Allowed,
    /// Over budget but not yet escalated; caller sends a warning and continues.
    Denied,
    /// Escalated past the violation threshold; caller sends a warning and
    /// terminates the connection.
    Blocked,
}

pub struct RateLimiter {
    tokens: f64,
    last_refill: Instant,
    violations: u32,
    window_start: Instant,
    blocked_until: Option<Instant>,
}

impl RateLimiter {
    pub fn new(now: Instant) -> Self {
        Self {
            tokens: CAPACITY,
            last_refill: now,
            violations: 0,
            window_start: now,
            blocked_until: None,
        }
    }

    pub fn check(&mut self, now: Instant) -> Decision {
        if let Some(until) = self.blocked_until {
            if now < until {
                return Decision::Blocked;
            }
            // Block expired: start clean, as if freshly constructed.
            self.blocked_until = None;
            self.violations = 0;
            self.window_start = now;
            self.tokens = CAPACITY;
            self.last_refill = now;
        }

        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * REFILL_PER_SEC).min(CAPACITY);
        self.last_refill = now;

        if now.saturating_duration_since(self.window_start) >= WINDOW {
            if self.tokens >= CAPACITY {
                self.violations = 0;
            }
            self.window_start = now;
        }

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return Decision::Allowed;
        }

        self.violations += 1;
        if self.violations >= MAX_VIOLATIONS {
            self.blocked_until = Some(now + BLOCK_DURATION);
            Decision::Blocked
        } else {
            Decision::Denied
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_burst_up_to_capacity() {
        let mut limiter = RateLimiter::new(Instant::now());
        let now = Instant::now();
        for _ in 0..10 {
            assert_eq!(limiter.check(now), Decision::Allowed);
        }
        assert_eq!(limiter.check(now), Decision::Denied);
    }

    #[test]
    fn escalates_to_blocked_after_three_violations() {
        let mut limiter = RateLimiter::new(Instant::now());
        let now = Instant::now();
        for _ in 0..10 {
            limiter.check(now);
        }
        assert_eq!(limiter.check(now), Decision::Denied);
        assert_eq!(limiter.check(now), Decision::Denied);
        assert_eq!(limiter.check(now), Decision::Blocked);
        // Still blocked immediately after.
        assert_eq!(limiter.check(now), Decision::Blocked);
    }

    #[test]
    fn block_expires_and_resets_state() {
        let mut limiter = RateLimiter::new(Instant::now());
        let now = Instant::now();
        for _ in 0..13 {
            limiter.check(now);
        }
        let later = now + BLOCK_DURATION + Duration::from_millis(1);
        assert_eq!(limiter.check(later), Decision::Allowed);
    }

    #[test]
    fn full_refill_window_clears_violations() {
        let mut limiter = RateLimiter::new(Instant::now());
        let now = Instant::now();
        for _ in 0..11 {
            limiter.check(now);
        }
        // Let the bucket fully refill and the window roll over without blocking.
        let later = now + WINDOW + Duration::from_millis(1);
        assert_eq!(limiter.check(later), Decision::Allowed);
        // Violations cleared: driving the bucket back to empty takes another
        // full burst before the next denial.
        for _ in 0..9 {
            limiter.check(later);
        }
        assert_eq!(limiter.check(later), Decision::Denied);
    }
}
