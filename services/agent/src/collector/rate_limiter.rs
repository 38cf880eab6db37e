//! A hand-rolled token bucket: no rate-limiter crate appears anywhere in
//! this codebase's dependency stack, and the algorithm is small enough
//! that reaching for one would just add a dependency to hide five lines
//! of arithmetic.

pub struct RateLimiter {
    capacity: f64,
    tokens: f64,
    refill_per_ms: f64,
    last_refill_ms: Option<i64>,
}

impl RateLimiter {
    pub fn new(rate_per_sec: f64) -> Self {
        RateLimiter {
            capacity: rate_per_sec.max(1.0),
            tokens: rate_per_sec.max(1.0),
            refill_per_ms: rate_per_sec.max(1.0) / 1000.0,
            last_refill_ms: None,
        }
    }

    pub fn try_acquire(&mut self, now_ms: i64) -> bool {
        self.refill(now_ms);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn refill(&mut self, now_ms: i64) {
        if let Some(last) = self.last_refill_ms {
            let elapsed = (now_ms - last).max(0) as f64;
            self.tokens = (self.tokens + elapsed * self.refill_per_ms).min(self.capacity);
        }
        self.last_refill_ms = Some(now_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_bursts_up_to_capacity_then_throttles() {
        let mut rl = RateLimiter::new(2.0);
        assert!(rl.try_acquire(0));
        assert!(rl.try_acquire(0));
        assert!(!rl.try_acquire(0));
    }

    #[test]
    fn refills_over_time() {
        let mut rl = RateLimiter::new(10.0);
        for _ in 0..10 {
            assert!(rl.try_acquire(0));
        }
        assert!(!rl.try_acquire(0));
        assert!(rl.try_acquire(1_000));
    }
}
