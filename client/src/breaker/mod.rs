//! Circuit breaking
//!
//! One [`BreakerEntry`] per `(service, instance)` holds the shared state
//! machine; trip strategies ([`crate::breaker::ErrorCountBreaker`],
//! [`crate::breaker::ErrorRateBreaker`]) only decide when a closed entry
//! opens. The legal cycle is
//!
//! ```text
//! closed --(strategy trips)--> open
//! open   --(sleep window elapsed, first caller)--> half-open
//! half-open --(N consecutive successes)--> closed
//! half-open --(any failure)--> open (sleep window re-armed)
//! ```
//!
//! Anything else is a logged no-op. At most one probe is in flight while an
//! entry is half-open; the caller that wins the flip is the anointed probe.

mod error_count;
mod error_rate;

pub use error_count::ErrorCountBreaker;
pub use error_rate::ErrorRateBreaker;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use polaris_core::config::CircuitBreakerConfig;
use polaris_core::{
    AlertReporter, CallStats, CircuitBreaker, DetectResult, ProbeOutcome, ServiceKey,
};

/// Circuit state of one instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        })
    }
}

struct BreakerEntry {
    state: CircuitState,
    consecutive_errors: u32,
    window: VecDeque<bool>,
    opened_at: Option<Instant>,
    half_open_successes: u32,
    probe_in_flight: bool,
    last_half_open_probe_at: Option<Instant>,
}

impl BreakerEntry {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_errors: 0,
            window: VecDeque::new(),
            opened_at: None,
            half_open_successes: 0,
            probe_in_flight: false,
            last_half_open_probe_at: None,
        }
    }

    fn push_window(&mut self, failed: bool, window_size: usize) {
        self.window.push_back(failed);
        while self.window.len() > window_size {
            self.window.pop_front();
        }
    }

    fn stats(&self) -> CallStats {
        CallStats {
            consecutive_errors: self.consecutive_errors,
            window_total: self.window.len() as u32,
            window_errors: self.window.iter().filter(|failed| **failed).count() as u32,
        }
    }
}

/// Per-service breaker: strategies plus the instance state table
///
/// Lifetime matches the surrounding service context.
pub struct CircuitBreakerChain {
    service: ServiceKey,
    strategies: Vec<Arc<dyn CircuitBreaker>>,
    entries: Mutex<HashMap<String, BreakerEntry>>,
    enabled: bool,
    sleep_window: Duration,
    success_threshold: u32,
    window_size: usize,
    alert_reporter: Option<Arc<dyn AlertReporter>>,
}

impl CircuitBreakerChain {
    pub fn new(
        service: ServiceKey,
        strategies: Vec<Arc<dyn CircuitBreaker>>,
        config: &CircuitBreakerConfig,
    ) -> Self {
        Self {
            service,
            strategies,
            entries: Mutex::new(HashMap::new()),
            enabled: config.set_enable,
            sleep_window: config.sleep_window(),
            success_threshold: config.success_count_after_half_open.max(1),
            window_size: config.error_rate.metric_window_size.max(1) as usize,
            alert_reporter: None,
        }
    }

    /// Route circuit transitions to an alert reporter as well as the log
    pub fn with_alert_reporter(mut self, reporter: Arc<dyn AlertReporter>) -> Self {
        self.alert_reporter = Some(reporter);
        self
    }

    /// Current state; unknown instances are closed
    pub fn state(&self, instance_id: &str) -> CircuitState {
        self.entries
            .lock()
            .get(instance_id)
            .map(|entry| entry.state)
            .unwrap_or(CircuitState::Closed)
    }

    /// Gate for selection. Open entries whose sleep window has elapsed flip
    /// to half-open here — the caller asking is the first caller — and the
    /// winner holds the single half-open probe slot.
    pub fn acquire_selectable(&self, instance_id: &str) -> bool {
        if !self.enabled {
            return true;
        }
        let mut entries = self.entries.lock();
        let entry = entries
            .entry(instance_id.to_string())
            .or_insert_with(BreakerEntry::new);
        match entry.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                if self.sleep_window_elapsed(entry) {
                    self.to_half_open(instance_id, entry);
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if entry.probe_in_flight {
                    false
                } else {
                    entry.probe_in_flight = true;
                    entry.last_half_open_probe_at = Some(Instant::now());
                    true
                }
            }
        }
    }

    /// Gate for the outlier-detection sweep. Suspects (open or half-open
    /// with a free slot) are always candidates; closed instances only when
    /// the sweep includes healthy ones.
    pub fn probe_candidate(&self, instance_id: &str, include_healthy: bool) -> bool {
        if !self.enabled {
            return include_healthy;
        }
        let mut entries = self.entries.lock();
        let entry = entries
            .entry(instance_id.to_string())
            .or_insert_with(BreakerEntry::new);
        match entry.state {
            CircuitState::Closed => include_healthy,
            CircuitState::Open => {
                if self.sleep_window_elapsed(entry) {
                    self.to_half_open(instance_id, entry);
                }
                true
            }
            CircuitState::HalfOpen => {
                if entry.probe_in_flight {
                    false
                } else {
                    entry.probe_in_flight = true;
                    entry.last_half_open_probe_at = Some(Instant::now());
                    true
                }
            }
        }
    }

    /// Feed one probe verdict; timeouts count as failures
    pub fn on_probe_result(&self, instance_id: &str, result: &DetectResult) {
        self.apply_result(instance_id, result.outcome == ProbeOutcome::Success);
    }

    /// Feed one consumer call outcome
    pub fn on_call_result(&self, instance_id: &str, success: bool) {
        self.apply_result(instance_id, success);
    }

    fn apply_result(&self, instance_id: &str, success: bool) {
        // Transitions happen under the table lock; the alert fires after
        // release so reporters may safely look back into the chain.
        let transition = {
            let mut entries = self.entries.lock();
            let entry = entries
                .entry(instance_id.to_string())
                .or_insert_with(BreakerEntry::new);
            match entry.state {
                CircuitState::Closed => {
                    entry.push_window(!success, self.window_size);
                    if success {
                        entry.consecutive_errors = 0;
                        None
                    } else {
                        entry.consecutive_errors += 1;
                        let stats = entry.stats();
                        let tripped = if self.enabled {
                            self.strategies
                                .iter()
                                .find(|strategy| strategy.should_trip(&stats))
                                .map(|strategy| strategy.name().to_string())
                        } else {
                            None
                        };
                        match tripped {
                            Some(strategy) => {
                                entry.state = CircuitState::Open;
                                entry.opened_at = Some(Instant::now());
                                entry.half_open_successes = 0;
                                warn!(
                                    service = %self.service,
                                    instance = instance_id,
                                    strategy = %strategy,
                                    consecutive_errors = stats.consecutive_errors,
                                    "circuit opened"
                                );
                                Some("circuit opened")
                            }
                            None => None,
                        }
                    }
                }
                CircuitState::HalfOpen => {
                    entry.probe_in_flight = false;
                    if success {
                        entry.half_open_successes += 1;
                        if entry.half_open_successes >= self.success_threshold {
                            entry.state = CircuitState::Closed;
                            entry.consecutive_errors = 0;
                            entry.half_open_successes = 0;
                            entry.opened_at = None;
                            entry.window.clear();
                            info!(
                                service = %self.service,
                                instance = instance_id,
                                "circuit closed, instance recovered"
                            );
                            Some("circuit closed")
                        } else {
                            None
                        }
                    } else {
                        entry.state = CircuitState::Open;
                        entry.opened_at = Some(Instant::now());
                        entry.half_open_successes = 0;
                        warn!(
                            service = %self.service,
                            instance = instance_id,
                            "half-open probe failed, circuit re-opened"
                        );
                        Some("circuit re-opened")
                    }
                }
                CircuitState::Open => {
                    // Result arrived while the entry sleeps; not a legal
                    // transition, so record nothing.
                    debug!(
                        service = %self.service,
                        instance = instance_id,
                        success,
                        "result ignored for open circuit"
                    );
                    None
                }
            }
        };
        if let Some(what) = transition {
            self.alert(instance_id, what);
        }
    }

    fn sleep_window_elapsed(&self, entry: &BreakerEntry) -> bool {
        entry
            .opened_at
            .is_some_and(|opened_at| opened_at.elapsed() >= self.sleep_window)
    }

    fn to_half_open(&self, instance_id: &str, entry: &mut BreakerEntry) {
        entry.state = CircuitState::HalfOpen;
        entry.half_open_successes = 0;
        entry.probe_in_flight = true;
        entry.last_half_open_probe_at = Some(Instant::now());
        info!(
            service = %self.service,
            instance = instance_id,
            "circuit half-open, probing"
        );
    }

    fn alert(&self, instance_id: &str, what: &str) {
        if let Some(reporter) = &self.alert_reporter {
            reporter.alert(&self.service, &format!("instance {instance_id}: {what}"));
        }
    }
}
