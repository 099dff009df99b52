//! Error-rate trip strategy

use parking_lot::RwLock;

use polaris_core::{CallStats, CircuitBreaker, Config, PolarisResult};

struct RateParams {
    min_volume: u32,
    threshold: f64,
}

/// Trips when the failure share of the rolling request window reaches the
/// configured threshold, once the window holds enough samples to mean
/// anything
pub struct ErrorRateBreaker {
    params: RwLock<RateParams>,
}

impl ErrorRateBreaker {
    pub fn new() -> Self {
        Self {
            params: RwLock::new(RateParams {
                min_volume: 10,
                threshold: 0.5,
            }),
        }
    }
}

impl Default for ErrorRateBreaker {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreaker for ErrorRateBreaker {
    fn name(&self) -> &str {
        "errorRate"
    }

    fn init(&self, config: &Config) -> PolarisResult<()> {
        let rate = &config.consumer.circuit_breaker.error_rate;
        let mut params = self.params.write();
        params.min_volume = rate.request_volume_threshold.max(1);
        params.threshold = rate.error_rate_threshold.clamp(0.0, 1.0);
        Ok(())
    }

    fn should_trip(&self, stats: &CallStats) -> bool {
        let params = self.params.read();
        if stats.window_total < params.min_volume {
            return false;
        }
        let rate = f64::from(stats.window_errors) / f64::from(stats.window_total);
        rate >= params.threshold
    }
}
