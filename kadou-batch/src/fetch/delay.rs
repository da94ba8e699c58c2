//! Randomized inter-request delay

use kadou_common::config::TransportConfig;
use rand::Rng;
use std::time::Duration;

/// Uniform delay in `[base - variance, base + variance]`, never negative
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DelayPolicy {
    base_secs: f64,
    variance_secs: f64,
    disabled: bool,
}

impl DelayPolicy {
    pub fn from_config(config: &TransportConfig) -> Self {
        Self {
            base_secs: config.base_delay_minutes * 60.0,
            variance_secs: config.delay_variance_minutes * 60.0,
            disabled: config.no_delay,
        }
    }

    /// No delay at all
    pub fn disabled() -> Self {
        Self {
            base_secs: 0.0,
            variance_secs: 0.0,
            disabled: true,
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        if self.disabled {
            return Duration::ZERO;
        }
        let low = (self.base_secs - self.variance_secs).max(0.0);
        let high = (self.base_secs + self.variance_secs).max(low);
        let secs = if high > low { rng.gen_range(low..=high) } else { low };
        Duration::from_secs_f64(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_default_delay_bounds() {
        // 0.02 ± 0.0125 minutes = 0.45s .. 1.95s
        let policy = DelayPolicy::from_config(&TransportConfig::default());
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let d = policy.sample(&mut rng).as_secs_f64();
            assert!((0.45 - 1e-9..=1.95 + 1e-9).contains(&d), "delay {} out of range", d);
        }
    }

    #[test]
    fn test_no_delay_override() {
        let config = TransportConfig {
            no_delay: true,
            ..TransportConfig::default()
        };
        let policy = DelayPolicy::from_config(&config);
        assert!(policy.is_disabled());
        assert_eq!(policy.sample(&mut rand::thread_rng()), Duration::ZERO);
    }

    #[test]
    fn test_variance_larger_than_base_clamps_at_zero() {
        let config = TransportConfig {
            base_delay_minutes: 0.01,
            delay_variance_minutes: 0.05,
            ..TransportConfig::default()
        };
        let policy = DelayPolicy::from_config(&config);
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..50 {
            assert!(policy.sample(&mut rng).as_secs_f64() <= 3.6 + 1e-9);
        }
    }
}
