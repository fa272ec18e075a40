//! ---
//! ingest_section: "06-publish-pipeline"
//! ingest_subsection: "module"
//! ingest_type: "source"
//! ingest_scope: "code"
//! ingest_description: "Queue transports, retry policy, and dead-letter routing."
//! ingest_version: "v0.0.0-prealpha"
//! ingest_owner: "tbd"
//! ---
use std::time::Duration;

use crm_ingest_common::PublisherConfig;
use rand::rngs::StdRng;
use rand::Rng;

/// Policy parameters controlling delivery attempts and backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of delivery attempts, including the first one.
    pub max_attempts: u32,
    /// Delay applied after the first failed attempt (exponential backoff).
    pub base_delay: Duration,
    /// Upper bound for the exponential part of the delay.
    pub max_delay: Duration,
    /// Maximum jitter added to each delay to avoid thundering herds.
    pub jitter: Duration,
}

impl RetryPolicy {
    /// Construct a policy; `max_attempts` is clamped to at least one.
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration, jitter: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
            jitter,
        }
    }

    /// Delay before the attempt that follows failed attempt `attempt` (1-indexed).
    pub fn backoff_delay(&self, attempt: u32, rng: &mut StdRng) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let base = self
            .base_delay
            .saturating_mul(2u32.pow(exponent))
            .min(self.max_delay);
        if self.jitter.is_zero() {
            base
        } else {
            let jitter_ms = rng.gen_range(0..=self.jitter.as_millis().max(1)) as u64;
            base + Duration::from_millis(jitter_ms)
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&PublisherConfig::default())
    }
}

impl From<&PublisherConfig> for RetryPolicy {
    fn from(config: &PublisherConfig) -> Self {
        Self::new(
            config.max_attempts,
            config.base_delay,
            config.max_delay,
            config.jitter,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn delays_double_and_cap() {
        let policy = RetryPolicy::new(
            6,
            Duration::from_millis(100),
            Duration::from_millis(500),
            Duration::ZERO,
        );
        let mut rng = StdRng::seed_from_u64(7);
        let delays: Vec<_> = (1..=5)
            .map(|attempt| policy.backoff_delay(attempt, &mut rng).as_millis())
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 500, 500]);
    }

    #[test]
    fn jitter_stays_within_bound() {
        let policy = RetryPolicy::new(
            3,
            Duration::from_millis(10),
            Duration::from_millis(10),
            Duration::from_millis(5),
        );
        let mut rng = StdRng::seed_from_u64(99);
        for _ in 0..100 {
            let delay = policy.backoff_delay(1, &mut rng);
            assert!(delay >= Duration::from_millis(10));
            assert!(delay <= Duration::from_millis(15));
        }
    }

    #[test]
    fn zero_attempts_clamped_to_one() {
        let policy = RetryPolicy::new(0, Duration::ZERO, Duration::ZERO, Duration::ZERO);
        assert_eq!(policy.max_attempts, 1);
    }
}
