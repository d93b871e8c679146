//! Pacing for outbound requests.

use std::time::{Duration, Instant};

use crate::shutdown::Shutdown;

/// Token bucket: holds up to `capacity` tokens and refills at `rate` tokens per
/// second. Each request spends one token and waits when none is left.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    rate: f64,
    last: Instant,
}

impl TokenBucket {
    /// `rate` must be positive; `capacity` is clamped to at least one token.
    pub fn new(rate: f64, capacity: u32) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self {
            capacity,
            tokens: capacity,
            rate,
            last: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last = now;
    }

    /// Takes a token as of `now`, returning how long the caller must wait
    /// before the request is allowed. The token is spent either way.
    pub fn reserve(&mut self, now: Instant) -> Duration {
        self.refill(now);
        self.tokens -= 1.0;
        if self.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-self.tokens / self.rate)
        }
    }
}

/// Optional token bucket; an absent bucket never waits.
#[derive(Debug, Clone, Default)]
pub struct RateLimiter {
    bucket: Option<TokenBucket>,
}

impl RateLimiter {
    pub fn unlimited() -> Self {
        Self { bucket: None }
    }

    pub fn per_second(rate: f64, burst: u32) -> Self {
        if rate.is_finite() && rate > 0.0 {
            Self {
                bucket: Some(TokenBucket::new(rate, burst)),
            }
        } else {
            Self::unlimited()
        }
    }

    pub fn per_minute(rate: f64, burst: u32) -> Self {
        Self::per_second(rate / 60.0, burst)
    }

    /// Blocks until the next request may go out. Returns `false` if the wait
    /// was cut short by cancellation.
    pub fn acquire(&mut self, shutdown: &Shutdown) -> bool {
        let Some(bucket) = self.bucket.as_mut() else {
            return !shutdown.is_cancelled();
        };
        let wait = bucket.reserve(Instant::now());
        if wait.is_zero() {
            return !shutdown.is_cancelled();
        }
        tracing::trace!(wait_ms = wait.as_millis() as u64, "rate limited");
        !shutdown.sleep(wait)
    }
}
