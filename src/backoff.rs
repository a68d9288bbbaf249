//! Exponential backoff used between reconnection attempts.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff with symmetric jitter.
///
/// The delay before attempt `n` (counting from zero) is `base * factor^n`, clamped into
/// `[base, max]`, then scaled by a random factor in `[1 - jitter, 1 + jitter]`. A delay never goes
/// below zero, and never exceeds `max * (1 + jitter)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
    pub factor: f64,
    pub jitter: f64,
}

impl Backoff {
    #[must_use]
    pub const fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            factor: 1.6,
            jitter: 0.2,
        }
    }

    /// Set the growth factor applied per attempt.
    #[must_use]
    pub const fn factor(mut self, factor: f64) -> Self {
        self.factor = factor;
        self
    }

    /// Set the jitter ratio; `0.0` disables jitter.
    #[must_use]
    pub const fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// The jittered delay before attempt `attempt`.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with(attempt, rand::thread_rng().gen_range(-1.0..=1.0))
    }

    /// The delay before attempt `attempt`, using `spread` (in `[-1, 1]`) as the random sample.
    #[must_use]
    pub fn delay_with(&self, attempt: u32, spread: f64) -> Duration {
        let base = self.base.as_secs_f64();
        let max = self.max.as_secs_f64().max(base);
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);

        let raw = base * self.factor.powi(exponent);
        // NaN (a zero base with an infinite power) falls back to the lower bound.
        let clamped = if raw.is_nan() { base } else { raw.clamp(base, max) };

        let jittered = clamped * (1.0 + self.jitter * spread.clamp(-1.0, 1.0));

        Duration::from_secs_f64(jittered.max(0.0))
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(120))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let backoff = Backoff::default();

        assert_eq!(backoff.base, Duration::from_secs(1));
        assert_eq!(backoff.max, Duration::from_secs(120));
        assert!((backoff.factor - 1.6).abs() < f64::EPSILON);
        assert!((backoff.jitter - 0.2).abs() < f64::EPSILON);
    }

    #[test]
    fn grows_then_saturates() {
        let backoff = Backoff::default();

        assert_eq!(backoff.delay_with(0, 0.0), Duration::from_secs(1));
        assert_eq!(backoff.delay_with(1, 0.0), Duration::from_secs_f64(1.6));

        let mut last = Duration::ZERO;
        for attempt in 0..40 {
            let delay = backoff.delay_with(attempt, 0.0);
            assert!(delay >= last);
            last = delay;
        }

        assert_eq!(last, Duration::from_secs(120));
        assert_eq!(backoff.delay_with(u32::MAX, 0.0), Duration::from_secs(120));
    }

    #[test]
    fn always_within_bounds() {
        let backoff = Backoff::default();
        let upper = Duration::from_secs_f64(120.0 * 1.2);

        for attempt in 0..64 {
            for _ in 0..32 {
                let delay = backoff.delay(attempt);
                assert!(delay <= upper, "attempt {attempt}: {delay:?}");
            }

            assert!(backoff.delay_with(attempt, -1.0) <= upper);
            assert!(backoff.delay_with(attempt, 1.0) <= upper);
        }
    }

    #[test]
    fn extreme_jitter_clamps_to_zero() {
        let backoff = Backoff::default().jitter(3.0);

        assert_eq!(backoff.delay_with(0, -1.0), Duration::ZERO);
    }

    #[test]
    fn jitter_spreads_symmetrically() {
        let backoff = Backoff::default();

        assert_eq!(backoff.delay_with(0, -1.0), Duration::from_secs_f64(0.8));
        assert_eq!(backoff.delay_with(0, 1.0), Duration::from_secs_f64(1.2));
    }
}
