//! Outlier detection
//!
//! The detection executor walks every live service context on a timer and
//! hands the cached instance list to that service's chain. The chain asks
//! the circuit breaker which instances are probe candidates: suspects
//! always, and — when the sweep is configured `always` — a sampled share
//! of the healthy instances, each drawn per sweep against the configured
//! sample ratio. The chain then tries its detectors in declared order
//! until one reports success. One aggregated verdict per instance per
//! sweep goes back into the breaker, so probes for the same instance
//! never overlap.

mod http;
mod tcp;
mod udp;

pub use http::HttpDetector;
pub use tcp::TcpDetector;
pub use udp::UdpDetector;

use std::sync::Arc;

use tracing::debug;

use polaris_core::{DetectWhen, Instance, OutlierDetector, ProbeOutcome};

use crate::balancer::Xorshift64;
use crate::breaker::CircuitBreakerChain;

/// Per-service probe orchestrator
pub struct OutlierDetectorChain {
    detectors: Vec<Arc<dyn OutlierDetector>>,
    when: DetectWhen,
    /// Share of healthy instances sampled into an `always` sweep
    sample_ratio: f64,
    rng: Xorshift64,
}

impl OutlierDetectorChain {
    pub fn new(
        detectors: Vec<Arc<dyn OutlierDetector>>,
        when: DetectWhen,
        sample_ratio: f64,
    ) -> Self {
        Self {
            detectors,
            when,
            sample_ratio: sample_ratio.clamp(0.0, 1.0),
            rng: Xorshift64::new(),
        }
    }

    /// An empty chain never probes
    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty() || self.when == DetectWhen::Never
    }

    /// Whether this sweep takes a given healthy instance
    fn sample_healthy(&self) -> bool {
        self.when == DetectWhen::Always && self.rng.next_f64() < self.sample_ratio
    }

    /// Probe one sweep's worth of instances, feeding verdicts to `breaker`
    pub fn detect_instances(&self, instances: &[Instance], breaker: &CircuitBreakerChain) {
        if self.is_empty() {
            return;
        }
        for instance in instances {
            if instance.id.is_empty() || instance.isolate {
                continue;
            }
            if !breaker.probe_candidate(&instance.id, self.sample_healthy()) {
                continue;
            }
            let mut verdict = None;
            for detector in &self.detectors {
                let result = detector.detect_instance(&instance.host, instance.port);
                debug!(
                    detector = detector.name(),
                    instance = %instance.id,
                    host = %instance.host,
                    port = instance.port,
                    outcome = ?result.outcome,
                    latency_ms = result.latency.as_millis() as u64,
                    "probe finished"
                );
                let succeeded = result.outcome == ProbeOutcome::Success;
                verdict = Some(result);
                if succeeded {
                    break;
                }
            }
            if let Some(result) = verdict {
                breaker.on_probe_result(&instance.id, &result);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::breaker::{CircuitState, ErrorCountBreaker};
    use parking_lot::Mutex;
    use polaris_core::config::CircuitBreakerConfig;
    use polaris_core::{CircuitBreaker, Config, DetectResult, ServiceKey};
    use std::collections::HashMap;
    use std::time::Duration;

    /// Scripted detector: outcome per host, counts probes
    struct ScriptedDetector {
        outcomes: Mutex<HashMap<String, ProbeOutcome>>,
        probes: Mutex<Vec<String>>,
    }

    impl ScriptedDetector {
        fn new(outcomes: &[(&str, ProbeOutcome)]) -> Self {
            Self {
                outcomes: Mutex::new(
                    outcomes
                        .iter()
                        .map(|(host, outcome)| (host.to_string(), *outcome))
                        .collect(),
                ),
                probes: Mutex::new(Vec::new()),
            }
        }

        fn probed_hosts(&self) -> Vec<String> {
            self.probes.lock().clone()
        }
    }

    impl OutlierDetector for ScriptedDetector {
        fn name(&self) -> &str {
            "scripted"
        }

        fn detect_instance(&self, host: &str, _port: u16) -> DetectResult {
            self.probes.lock().push(host.to_string());
            let outcome = self
                .outcomes
                .lock()
                .get(host)
                .copied()
                .unwrap_or(ProbeOutcome::Fail);
            DetectResult {
                outcome,
                latency: Duration::from_millis(1),
            }
        }
    }

    fn breaker_sleep_elapsed() -> CircuitBreakerChain {
        let config = Config::from_yaml(
            r#"
consumer:
  circuitBreaker:
    sleepWindow: 5
    successCountAfterHalfOpen: 2
    errorCount:
      continuousErrorThreshold: 1
"#,
        )
        .unwrap();
        let strategy = Arc::new(ErrorCountBreaker::new());
        strategy.init(&config).unwrap();
        CircuitBreakerChain::new(
            ServiceKey::new("Test", "echo"),
            vec![strategy],
            &config.consumer.circuit_breaker,
        )
    }

    fn instances() -> Vec<Instance> {
        vec![
            Instance::new("i-1", "10.0.0.1", 80),
            Instance::new("i-2", "10.0.0.2", 80),
        ]
    }

    #[test]
    fn suspects_only_sweep_skips_closed_instances() {
        // S4 shape: i-1 open with sleep window elapsed, i-2 closed.
        let breaker = breaker_sleep_elapsed();
        breaker.on_call_result("i-1", false);
        assert_eq!(breaker.state("i-1"), CircuitState::Open);
        std::thread::sleep(Duration::from_millis(10));

        let detector = Arc::new(ScriptedDetector::new(&[("10.0.0.1", ProbeOutcome::Success)]));
        let chain =
            OutlierDetectorChain::new(vec![detector.clone()], DetectWhen::OnRecover, 1.0);

        chain.detect_instances(&instances(), &breaker);
        assert_eq!(detector.probed_hosts(), vec!["10.0.0.1"]);
        assert_eq!(breaker.state("i-1"), CircuitState::HalfOpen);
        assert_eq!(breaker.state("i-2"), CircuitState::Closed);

        // Second sweep's success closes the circuit
        chain.detect_instances(&instances(), &breaker);
        assert_eq!(breaker.state("i-1"), CircuitState::Closed);
    }

    #[test]
    fn always_sweep_probes_healthy_instances_too() {
        let breaker = breaker_sleep_elapsed();
        let detector = Arc::new(ScriptedDetector::new(&[
            ("10.0.0.1", ProbeOutcome::Success),
            ("10.0.0.2", ProbeOutcome::Success),
        ]));
        let chain = OutlierDetectorChain::new(vec![detector.clone()], DetectWhen::Always, 1.0);
        chain.detect_instances(&instances(), &breaker);
        assert_eq!(detector.probed_hosts(), vec!["10.0.0.1", "10.0.0.2"]);
    }

    #[test]
    fn zero_sample_ratio_probes_suspects_only() {
        // i-1 open with the window elapsed stays a probe candidate even
        // though no healthy instance is sampled in.
        let breaker = breaker_sleep_elapsed();
        breaker.on_call_result("i-1", false);
        std::thread::sleep(Duration::from_millis(10));

        let detector = Arc::new(ScriptedDetector::new(&[("10.0.0.1", ProbeOutcome::Success)]));
        let chain = OutlierDetectorChain::new(vec![detector.clone()], DetectWhen::Always, 0.0);
        chain.detect_instances(&instances(), &breaker);
        assert_eq!(detector.probed_hosts(), vec!["10.0.0.1"]);
    }

    #[test]
    fn fractional_sample_ratio_takes_a_share_of_healthy_instances() {
        let breaker = breaker_sleep_elapsed();
        let detector = Arc::new(ScriptedDetector::new(&[("10.0.0.1", ProbeOutcome::Success)]));
        let chain = OutlierDetectorChain::new(vec![detector.clone()], DetectWhen::Always, 0.5);
        let list = vec![Instance::new("i-1", "10.0.0.1", 80)];
        for _ in 0..200 {
            chain.detect_instances(&list, &breaker);
        }
        let probed = detector.probed_hosts().len();
        // A fair coin over 200 sweeps; the band is wide enough to never flake
        assert!((40..=160).contains(&probed), "sampled {probed} of 200 sweeps");
    }

    #[test]
    fn never_sweep_is_inert() {
        let breaker = breaker_sleep_elapsed();
        let detector = Arc::new(ScriptedDetector::new(&[]));
        let chain = OutlierDetectorChain::new(vec![detector.clone()], DetectWhen::Never, 1.0);
        chain.detect_instances(&instances(), &breaker);
        assert!(detector.probed_hosts().is_empty());
    }

    #[test]
    fn later_detector_consulted_only_after_failure() {
        let breaker = breaker_sleep_elapsed();
        let first = Arc::new(ScriptedDetector::new(&[("10.0.0.1", ProbeOutcome::Fail)]));
        let second = Arc::new(ScriptedDetector::new(&[("10.0.0.1", ProbeOutcome::Success)]));
        let chain = OutlierDetectorChain::new(
            vec![first.clone(), second.clone()],
            DetectWhen::Always,
            1.0,
        );
        chain.detect_instances(&[Instance::new("i-1", "10.0.0.1", 80)], &breaker);
        assert_eq!(first.probed_hosts().len(), 1);
        assert_eq!(second.probed_hosts().len(), 1);
        // Aggregated verdict was the success
        assert_eq!(breaker.state("i-1"), CircuitState::Closed);
    }

    #[test]
    fn isolated_instances_are_never_probed() {
        let breaker = breaker_sleep_elapsed();
        let detector = Arc::new(ScriptedDetector::new(&[]));
        let chain = OutlierDetectorChain::new(vec![detector.clone()], DetectWhen::Always, 1.0);
        let mut instance = Instance::new("i-1", "10.0.0.1", 80);
        instance.isolate = true;
        chain.detect_instances(&[instance], &breaker);
        assert!(detector.probed_hosts().is_empty());
    }

    #[test]
    fn failed_probe_feeds_the_breaker() {
        let config = Config::from_yaml(
            "consumer:\n  circuitBreaker:\n    errorCount:\n      continuousErrorThreshold: 2\n",
        )
        .unwrap();
        let strategy = Arc::new(ErrorCountBreaker::new());
        strategy.init(&config).unwrap();
        let breaker = CircuitBreakerChain::new(
            ServiceKey::new("Test", "echo"),
            vec![strategy],
            &CircuitBreakerConfig::default(),
        );

        let detector = Arc::new(ScriptedDetector::new(&[("10.0.0.1", ProbeOutcome::Fail)]));
        let chain = OutlierDetectorChain::new(vec![detector], DetectWhen::Always, 1.0);
        let list = vec![Instance::new("i-1", "10.0.0.1", 80)];
        chain.detect_instances(&list, &breaker);
        chain.detect_instances(&list, &breaker);
        assert_eq!(breaker.state("i-1"), CircuitState::Open);
    }
}
