//! API statistics and alerting
//!
//! Every facade call opens an [`ApiStat`] span; the span records latency
//! and the final return code into the context's stat reporter. The
//! `monitor` reporter aggregates per `(api, code)` and the cache executor
//! flushes it on a timer. `logAlert` turns circuit transitions into
//! structured warnings.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{info, warn};

use polaris_core::{
    AlertReporter, ApiCallRecord, ApiKind, PolarisResult, ReturnCode, ServiceKey, StatReporter,
};

/// Scoped latency/return-code record for one API call
pub struct ApiStat {
    reporter: Arc<dyn StatReporter>,
    api: ApiKind,
    start: Instant,
}

impl ApiStat {
    pub fn new(reporter: Arc<dyn StatReporter>, api: ApiKind) -> Self {
        Self {
            reporter,
            api,
            start: Instant::now(),
        }
    }

    /// Record the outcome and hand the result back unchanged
    pub fn finish<T>(self, result: PolarisResult<T>) -> PolarisResult<T> {
        self.record(polaris_core::result_code(&result));
        result
    }

    fn record(self, code: ReturnCode) {
        self.reporter.report(ApiCallRecord {
            api: self.api,
            code,
            latency: self.start.elapsed(),
        });
    }
}

#[derive(Default, Clone, Copy)]
struct Aggregate {
    count: u64,
    total_latency: Duration,
    max_latency: Duration,
}

/// Built-in `monitor` stat reporter
///
/// Aggregates call records in memory and logs one line per `(api, code)`
/// pair on flush. The upstream monitor service shipping that the original
/// plugin performs is out of scope here; the log line carries the same
/// fields.
pub struct MonitorStatReporter {
    aggregates: Mutex<HashMap<(ApiKind, ReturnCode), Aggregate>>,
}

impl MonitorStatReporter {
    pub fn new() -> Self {
        Self {
            aggregates: Mutex::new(HashMap::new()),
        }
    }

    #[cfg(test)]
    fn count(&self, api: ApiKind, code: ReturnCode) -> u64 {
        self.aggregates
            .lock()
            .get(&(api, code))
            .map(|aggregate| aggregate.count)
            .unwrap_or(0)
    }
}

impl Default for MonitorStatReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl StatReporter for MonitorStatReporter {
    fn name(&self) -> &str {
        "monitor"
    }

    fn report(&self, record: ApiCallRecord) {
        let mut aggregates = self.aggregates.lock();
        let aggregate = aggregates.entry((record.api, record.code)).or_default();
        aggregate.count += 1;
        aggregate.total_latency += record.latency;
        aggregate.max_latency = aggregate.max_latency.max(record.latency);
    }

    fn flush(&self) {
        let drained: Vec<_> = {
            let mut aggregates = self.aggregates.lock();
            aggregates.drain().collect()
        };
        for ((api, code), aggregate) in drained {
            let avg_us = aggregate.total_latency.as_micros() as u64 / aggregate.count.max(1);
            info!(
                target: "polaris::stat",
                api = %api,
                code = %code,
                count = aggregate.count,
                avg_latency_us = avg_us,
                max_latency_us = aggregate.max_latency.as_micros() as u64,
                "api stat window"
            );
        }
    }
}

/// Built-in `logAlert` reporter: alerts land in the log
pub struct LogAlertReporter;

impl AlertReporter for LogAlertReporter {
    fn name(&self) -> &str {
        "logAlert"
    }

    fn alert(&self, service: &ServiceKey, message: &str) {
        warn!(target: "polaris::alert", service = %service, message, "alert");
    }
}
