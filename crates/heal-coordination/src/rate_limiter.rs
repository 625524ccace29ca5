//! Token-bucket rate limiter bounding LLM/consult calls per policy's
//! `rate_limit_per_min`. Shareable across concurrent attempts behind a
//! `tokio::sync::Mutex` at the orchestrator layer; this type itself holds no
//! async runtime dependency so it stays testable without `#[tokio::test]`.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity_per_min: u32) -> Self {
        let capacity = capacity_per_min.max(1) as f64;
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec: capacity / 60.0,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// Attempt to consume one token. Returns `false` (and leaves the bucket
    /// untouched otherwise) if none are available.
    pub fn try_acquire(&mut self) -> bool {
        self.refill(Instant::now());
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// How long the caller should wait before a token is likely available.
    pub fn time_to_next_token(&mut self) -> Duration {
        self.refill(Instant::now());
        if self.tokens >= 1.0 {
            Duration::ZERO
        } else {
            let deficit = 1.0 - self.tokens;
            Duration::from_secs_f64(deficit / self.refill_per_sec)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausts_after_capacity_acquisitions() {
        let mut bucket = TokenBucket::new(3);
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
    }

    #[test]
    fn time_to_next_token_is_zero_with_tokens_available() {
        let mut bucket = TokenBucket::new(10);
        assert_eq!(bucket.time_to_next_token(), Duration::ZERO);
    }

    #[test]
    fn time_to_next_token_positive_once_exhausted() {
        let mut bucket = TokenBucket::new(1);
        assert!(bucket.try_acquire());
        assert!(bucket.time_to_next_token() > Duration::ZERO);
    }
}
