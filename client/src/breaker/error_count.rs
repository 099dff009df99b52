//! Consecutive-error trip strategy

use std::sync::atomic::{AtomicU32, Ordering};

use polaris_core::{CallStats, CircuitBreaker, Config, PolarisResult};

const DEFAULT_THRESHOLD: u32 = 10;

/// Trips when an instance fails `continuousErrorThreshold` times in a row
pub struct ErrorCountBreaker {
    threshold: AtomicU32,
}

impl ErrorCountBreaker {
    pub fn new() -> Self {
        Self {
            threshold: AtomicU32::new(DEFAULT_THRESHOLD),
        }
    }
}

impl Default for ErrorCountBreaker {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreaker for ErrorCountBreaker {
    fn name(&self) -> &str {
        "errorCount"
    }

    fn init(&self, config: &Config) -> PolarisResult<()> {
        self.threshold.store(
            config
                .consumer
                .circuit_breaker
                .error_count
                .continuous_error_threshold
                .max(1),
            Ordering::Relaxed,
        );
        Ok(())
    }

    fn should_trip(&self, stats: &CallStats) -> bool {
        stats.consecutive_errors >= self.threshold.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn stats(consecutive: u32) -> CallStats {
        CallStats {
            consecutive_errors: consecutive,
            window_total: consecutive,
            window_errors: consecutive,
        }
    }

    #[test]
    fn trips_at_default_threshold() {
        let breaker = ErrorCountBreaker::new();
        assert!(!breaker.should_trip(&stats(9)));
        assert!(breaker.should_trip(&stats(10)));
    }

    #[test]
    fn init_overrides_threshold() {
        let breaker = ErrorCountBreaker::new();
        let config = Config::from_yaml(
            "consumer:\n  circuitBreaker:\n    errorCount:\n      continuousErrorThreshold: 3\n",
        )
        .unwrap();
        breaker.init(&config).unwrap();
        assert!(!breaker.should_trip(&stats(2)));
        assert!(breaker.should_trip(&stats(3)));
    }

    #[test]
    fn zero_threshold_is_clamped_to_one() {
        let breaker = ErrorCountBreaker::new();
        let config = Config::from_yaml(
            "consumer:\n  circuitBreaker:\n    errorCount:\n      continuousErrorThreshold: 0\n",
        )
        .unwrap();
        breaker.init(&config).unwrap();
        assert!(!breaker.should_trip(&stats(0)));
        assert!(breaker.should_trip(&stats(1)));
    }
}
