//! Capped exponential backoff for fetch retries.

use std::time::Duration;

use rand::Rng;

use paperbot_core::defaults;

/// Delay policy between fetch attempts of one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Delay after the first failure.
    pub initial: Duration,
    /// Upper bound on any single delay, jitter included.
    pub max: Duration,
    /// Growth factor per failed attempt.
    pub multiplier: u32,
    /// Upper bound of the random delay added on top.
    pub jitter: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(defaults::BACKOFF_INITIAL_MS),
            max: Duration::from_millis(defaults::BACKOFF_MAX_MS),
            multiplier: defaults::BACKOFF_MULTIPLIER,
            jitter: Duration::from_millis(defaults::BACKOFF_JITTER_MS),
        }
    }
}

impl BackoffPolicy {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            ..Self::default()
        }
    }

    pub fn with_multiplier(mut self, multiplier: u32) -> Self {
        self.multiplier = multiplier.max(1);
        self
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Deterministic delay after failed attempt `attempt` (1-based).
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = self.multiplier.max(1).saturating_pow(exponent);
        self.initial.saturating_mul(factor).min(self.max)
    }

    /// Delay with jitter, still capped at `max`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return base;
        }
        let extra = rand::thread_rng().gen_range(0..=jitter_ms);
        (base + Duration::from_millis(extra)).min(self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_delay_doubles() {
        let policy = BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(60));
        assert_eq!(policy.base_delay(1), Duration::from_secs(1));
        assert_eq!(policy.base_delay(2), Duration::from_secs(2));
        assert_eq!(policy.base_delay(3), Duration::from_secs(4));
        assert_eq!(policy.base_delay(4), Duration::from_secs(8));
    }

    #[test]
    fn test_base_delay_capped() {
        let policy = BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(10));
        assert_eq!(policy.base_delay(5), Duration::from_secs(10));
        assert_eq!(policy.base_delay(64), Duration::from_secs(10));
        assert_eq!(policy.base_delay(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn test_jitter_bounded_and_capped() {
        let policy = BackoffPolicy::new(Duration::from_millis(100), Duration::from_millis(300))
            .with_jitter(Duration::from_millis(50));
        for _ in 0..50 {
            let d = policy.delay_for(1);
            assert!(d >= Duration::from_millis(100) && d <= Duration::from_millis(150));
            assert!(policy.delay_for(10) <= Duration::from_millis(300));
        }
    }

    #[test]
    fn test_no_jitter_is_deterministic() {
        let policy = BackoffPolicy::default().with_jitter(Duration::ZERO);
        assert_eq!(policy.delay_for(2), policy.base_delay(2));
    }

    #[test]
    fn test_multiplier_floor() {
        let policy = BackoffPolicy::new(Duration::from_secs(3), Duration::from_secs(60))
            .with_multiplier(0);
        assert_eq!(policy.base_delay(4), Duration::from_secs(3));
    }
}
