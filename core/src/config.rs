//! Layered configuration
//!
//! YAML with camelCase keys, every section optional: absent keys fall back
//! to the built-in defaults, so an empty string is a valid configuration.
//! Durations are expressed in milliseconds on the wire and surfaced as
//! [`Duration`] through accessor methods.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::code::{PolarisError, PolarisResult};

/// Default configuration file looked up by `with_default_file`
pub const DEFAULT_CONFIG_FILE: &str = "./polaris.yaml";

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub consumer: ConsumerConfig,
}

impl Config {
    /// Parse from a YAML string
    pub fn from_yaml(content: &str) -> PolarisResult<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| PolarisError::InvalidArgument(format!("bad configuration: {e}")))
    }

    /// Parse from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> PolarisResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            PolarisError::InvalidArgument(format!("read {}: {e}", path.display()))
        })?;
        Self::from_yaml(&content)
    }

    /// Load [`DEFAULT_CONFIG_FILE`] when present, defaults otherwise
    pub fn with_default_file() -> PolarisResult<Self> {
        if Path::new(DEFAULT_CONFIG_FILE).exists() {
            Self::from_file(DEFAULT_CONFIG_FILE)
        } else {
            Ok(Self::default())
        }
    }
}

/// `global.*`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GlobalConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub system: SystemConfig,
    #[serde(default)]
    pub server_connector: ServerConnectorConfig,
    #[serde(default)]
    pub stat_reporter: StatReporterConfig,
    #[serde(default)]
    pub alert_reporter: AlertReporterConfig,
    /// Idle window after which an untouched service context is unloaded (ms)
    #[serde(default = "defaults::service_expire_time")]
    pub service_expire_time: u64,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            system: SystemConfig::default(),
            server_connector: ServerConnectorConfig::default(),
            stat_reporter: StatReporterConfig::default(),
            alert_reporter: AlertReporterConfig::default(),
            service_expire_time: defaults::service_expire_time(),
        }
    }
}

impl GlobalConfig {
    pub fn service_expire_window(&self) -> Duration {
        Duration::from_millis(self.service_expire_time)
    }
}

/// `global.api.*`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ApiConfig {
    /// Default budget for one API call (ms)
    #[serde(default = "defaults::api_timeout")]
    pub timeout: u64,
    /// Attempts per API call, first try included
    #[serde(default = "defaults::api_max_retry_times")]
    pub max_retry_times: u32,
    /// Pause between retries, capped by the remaining budget (ms)
    #[serde(default = "defaults::api_retry_interval")]
    pub retry_interval: u64,
    /// Caller location consulted by the nearby router
    #[serde(default)]
    pub location: LocationConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            timeout: defaults::api_timeout(),
            max_retry_times: defaults::api_max_retry_times(),
            retry_interval: defaults::api_retry_interval(),
            location: LocationConfig::default(),
        }
    }
}

impl ApiConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval)
    }
}

/// `global.api.location.*`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LocationConfig {
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default)]
    pub campus: Option<String>,
}

/// `global.system.*`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SystemConfig {
    /// Control-plane discover endpoint
    #[serde(default = "defaults::discover_cluster")]
    pub discover_cluster: String,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            discover_cluster: defaults::discover_cluster(),
        }
    }
}

/// `global.serverConnector.*`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ServerConnectorConfig {
    /// Plugin name of the connector implementation
    #[serde(default = "defaults::connector_protocol")]
    pub protocol: String,
    /// Connect timeout towards the control plane (ms)
    #[serde(default = "defaults::connect_timeout")]
    pub connect_timeout: u64,
}

impl Default for ServerConnectorConfig {
    fn default() -> Self {
        Self {
            protocol: defaults::connector_protocol(),
            connect_timeout: defaults::connect_timeout(),
        }
    }
}

impl ServerConnectorConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout)
    }
}

/// `global.statReporter.*`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StatReporterConfig {
    #[serde(default = "defaults::stat_reporter_name")]
    pub name: String,
    /// Aggregation window between flushes (ms)
    #[serde(default = "defaults::stat_report_interval")]
    pub report_interval: u64,
}

impl Default for StatReporterConfig {
    fn default() -> Self {
        Self {
            name: defaults::stat_reporter_name(),
            report_interval: defaults::stat_report_interval(),
        }
    }
}

impl StatReporterConfig {
    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval)
    }
}

/// `global.alertReporter.*`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AlertReporterConfig {
    #[serde(default = "defaults::alert_reporter_name")]
    pub name: String,
}

impl Default for AlertReporterConfig {
    fn default() -> Self {
        Self {
            name: defaults::alert_reporter_name(),
        }
    }
}

/// `consumer.*`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConsumerConfig {
    #[serde(default)]
    pub local_cache: LocalCacheConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub outlier_detection: OutlierDetectionConfig,
    #[serde(default)]
    pub load_balancer: LoadBalancerConfig,
    #[serde(default)]
    pub service_router: ServiceRouterConfig,
    /// What selection does when every candidate is gated off
    #[serde(default)]
    pub all_isolated_fallback: AllIsolatedFallback,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            local_cache: LocalCacheConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            outlier_detection: OutlierDetectionConfig::default(),
            load_balancer: LoadBalancerConfig::default(),
            service_router: ServiceRouterConfig::default(),
            all_isolated_fallback: AllIsolatedFallback::default(),
        }
    }
}

/// `consumer.localCache.*`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LocalCacheConfig {
    /// Plugin name of the local registry implementation
    #[serde(default = "defaults::local_cache_type", rename = "type")]
    pub cache_type: String,
}

impl Default for LocalCacheConfig {
    fn default() -> Self {
        Self {
            cache_type: defaults::local_cache_type(),
        }
    }
}

/// `consumer.circuitBreaker.*`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CircuitBreakerConfig {
    #[serde(default = "defaults::yes")]
    pub set_enable: bool,
    /// Strategy plugin names, applied in order
    #[serde(default = "defaults::breaker_chain")]
    pub chain: Vec<String>,
    /// How long an open instance sleeps before a probe may flip it (ms)
    #[serde(default = "defaults::sleep_window")]
    pub sleep_window: u64,
    /// Consecutive half-open successes required to close
    #[serde(default = "defaults::success_count_after_half_open")]
    pub success_count_after_half_open: u32,
    #[serde(default)]
    pub error_count: ErrorCountConfig,
    #[serde(default)]
    pub error_rate: ErrorRateConfig,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            set_enable: true,
            chain: defaults::breaker_chain(),
            sleep_window: defaults::sleep_window(),
            success_count_after_half_open: defaults::success_count_after_half_open(),
            error_count: ErrorCountConfig::default(),
            error_rate: ErrorRateConfig::default(),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn sleep_window(&self) -> Duration {
        Duration::from_millis(self.sleep_window)
    }
}

/// `consumer.circuitBreaker.errorCount.*`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ErrorCountConfig {
    #[serde(default = "defaults::continuous_error_threshold")]
    pub continuous_error_threshold: u32,
}

impl Default for ErrorCountConfig {
    fn default() -> Self {
        Self {
            continuous_error_threshold: defaults::continuous_error_threshold(),
        }
    }
}

/// `consumer.circuitBreaker.errorRate.*`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ErrorRateConfig {
    /// Minimum samples in the window before the rate is meaningful
    #[serde(default = "defaults::request_volume_threshold")]
    pub request_volume_threshold: u32,
    #[serde(default = "defaults::error_rate_threshold")]
    pub error_rate_threshold: f64,
    /// Rolling window size in requests
    #[serde(default = "defaults::metric_window_size")]
    pub metric_window_size: u32,
}

impl Default for ErrorRateConfig {
    fn default() -> Self {
        Self {
            request_volume_threshold: defaults::request_volume_threshold(),
            error_rate_threshold: defaults::error_rate_threshold(),
            metric_window_size: defaults::metric_window_size(),
        }
    }
}

/// When the outlier-detection sweep probes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectWhen {
    /// Sweep disabled
    #[default]
    Never,
    /// Probe only suspects (open or half-open instances)
    OnRecover,
    /// Probe suspects and healthy instances alike
    Always,
}

/// `consumer.outlierDetection.*`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OutlierDetectionConfig {
    #[serde(default)]
    pub when: DetectWhen,
    /// Sweep period (ms)
    #[serde(default = "defaults::check_period")]
    pub check_period: u64,
    /// Share of healthy instances probed per sweep when `when` is
    /// `always`; suspects are always probed
    #[serde(default = "defaults::sample_ratio")]
    pub sample_ratio: f64,
    /// Detector plugin names, tried in order until one succeeds
    #[serde(default = "defaults::detector_chain")]
    pub chain: Vec<String>,
    #[serde(default)]
    pub http: HttpDetectorConfig,
    #[serde(default)]
    pub tcp: TcpDetectorConfig,
    #[serde(default)]
    pub udp: UdpDetectorConfig,
}

impl Default for OutlierDetectionConfig {
    fn default() -> Self {
        Self {
            when: DetectWhen::Never,
            check_period: defaults::check_period(),
            sample_ratio: defaults::sample_ratio(),
            chain: defaults::detector_chain(),
            http: HttpDetectorConfig::default(),
            tcp: TcpDetectorConfig::default(),
            udp: UdpDetectorConfig::default(),
        }
    }
}

impl OutlierDetectionConfig {
    pub fn check_period(&self) -> Duration {
        Duration::from_millis(self.check_period)
    }
}

/// `consumer.outlierDetection.http.*`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HttpDetectorConfig {
    #[serde(default = "defaults::probe_timeout")]
    pub timeout: u64,
    #[serde(default = "defaults::http_probe_path")]
    pub path: String,
}

impl Default for HttpDetectorConfig {
    fn default() -> Self {
        Self {
            timeout: defaults::probe_timeout(),
            path: defaults::http_probe_path(),
        }
    }
}

/// `consumer.outlierDetection.tcp.*`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TcpDetectorConfig {
    #[serde(default = "defaults::probe_timeout")]
    pub timeout: u64,
}

impl Default for TcpDetectorConfig {
    fn default() -> Self {
        Self {
            timeout: defaults::probe_timeout(),
        }
    }
}

/// `consumer.outlierDetection.udp.*`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UdpDetectorConfig {
    #[serde(default = "defaults::probe_timeout")]
    pub timeout: u64,
    /// Count a silent peer as a failure rather than a distinct timeout
    #[serde(default = "defaults::yes")]
    pub timeout_as_fail: bool,
}

impl Default for UdpDetectorConfig {
    fn default() -> Self {
        Self {
            timeout: defaults::probe_timeout(),
            timeout_as_fail: true,
        }
    }
}

/// `consumer.loadBalancer.*`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LoadBalancerConfig {
    /// Plugin name of the balancer used when a service sets none
    #[serde(default = "defaults::load_balancer_type", rename = "type")]
    pub balancer_type: String,
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            balancer_type: defaults::load_balancer_type(),
        }
    }
}

/// `consumer.serviceRouter.*`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ServiceRouterConfig {
    /// Router plugin names, applied in order
    #[serde(default = "defaults::router_chain")]
    pub chain: Vec<String>,
}

impl Default for ServiceRouterConfig {
    fn default() -> Self {
        Self {
            chain: defaults::router_chain(),
        }
    }
}

/// `consumer.allIsolatedFallback`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AllIsolatedFallback {
    /// Ignore the gate and select among every routed instance
    #[default]
    PickAnyway,
    /// Fail the selection
    Fail,
}

mod defaults {
    pub fn yes() -> bool {
        true
    }
    pub fn api_timeout() -> u64 {
        1000
    }
    pub fn api_max_retry_times() -> u32 {
        5
    }
    pub fn api_retry_interval() -> u64 {
        100
    }
    pub fn service_expire_time() -> u64 {
        600_000
    }
    pub fn discover_cluster() -> String {
        "http://127.0.0.1:8091".to_string()
    }
    pub fn connector_protocol() -> String {
        "grpc".to_string()
    }
    pub fn connect_timeout() -> u64 {
        500
    }
    pub fn stat_reporter_name() -> String {
        "monitor".to_string()
    }
    pub fn stat_report_interval() -> u64 {
        60_000
    }
    pub fn alert_reporter_name() -> String {
        "logAlert".to_string()
    }
    pub fn local_cache_type() -> String {
        "inmemory".to_string()
    }
    pub fn breaker_chain() -> Vec<String> {
        vec!["errorCount".to_string(), "errorRate".to_string()]
    }
    pub fn sleep_window() -> u64 {
        30_000
    }
    pub fn success_count_after_half_open() -> u32 {
        2
    }
    pub fn continuous_error_threshold() -> u32 {
        10
    }
    pub fn request_volume_threshold() -> u32 {
        10
    }
    pub fn error_rate_threshold() -> f64 {
        0.5
    }
    pub fn metric_window_size() -> u32 {
        100
    }
    pub fn check_period() -> u64 {
        1000
    }
    pub fn sample_ratio() -> f64 {
        0.25
    }
    pub fn detector_chain() -> Vec<String> {
        vec!["tcp".to_string()]
    }
    pub fn probe_timeout() -> u64 {
        500
    }
    pub fn http_probe_path() -> String {
        "/".to_string()
    }
    pub fn load_balancer_type() -> String {
        "weightedRandom".to_string()
    }
    pub fn router_chain() -> Vec<String> {
        vec!["ruleRouter".to_string(), "nearbyRouter".to_string()]
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_yields_defaults() {
        let config = Config::from_yaml("{}").unwrap();
        assert_eq!(config.global.api.timeout, 1000);
        assert_eq!(config.global.api.max_retry_times, 5);
        assert_eq!(config.global.api.retry_interval, 100);
        assert_eq!(config.global.system.discover_cluster, "http://127.0.0.1:8091");
        assert!(config.consumer.circuit_breaker.set_enable);
        assert_eq!(config.consumer.outlier_detection.when, DetectWhen::Never);
        assert_eq!(config.consumer.outlier_detection.check_period, 1000);
        assert_eq!(config.consumer.outlier_detection.sample_ratio, 0.25);
        assert_eq!(config.consumer.load_balancer.balancer_type, "weightedRandom");
        assert_eq!(
            config.consumer.all_isolated_fallback,
            AllIsolatedFallback::PickAnyway
        );
    }

    #[test]
    fn overrides_layer_over_defaults() {
        let yaml = r#"
global:
  api:
    timeout: 700
    maxRetryTimes: 10
  system:
    discoverCluster: "http://polaris.local:8091"
consumer:
  circuitBreaker:
    errorCount:
      continuousErrorThreshold: 3
  outlierDetection:
    when: on_recover
    checkPeriod: 2000
    sampleRatio: 0.5
    chain: [tcp, http]
    http:
      path: /health
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.global.api.timeout, 700);
        assert_eq!(config.global.api.max_retry_times, 10);
        // Untouched siblings keep their defaults
        assert_eq!(config.global.api.retry_interval, 100);
        assert_eq!(config.global.system.discover_cluster, "http://polaris.local:8091");
        assert_eq!(
            config.consumer.circuit_breaker.error_count.continuous_error_threshold,
            3
        );
        assert_eq!(config.consumer.outlier_detection.when, DetectWhen::OnRecover);
        assert_eq!(config.consumer.outlier_detection.sample_ratio, 0.5);
        assert_eq!(config.consumer.outlier_detection.chain, vec!["tcp", "http"]);
        assert_eq!(config.consumer.outlier_detection.http.path, "/health");
        assert_eq!(config.consumer.outlier_detection.http.timeout, 500);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let result = Config::from_yaml("global:\n  api:\n    tiemout: 700\n");
        assert!(result.is_err());
    }

    #[test]
    fn duration_accessors() {
        let config = Config::default();
        assert_eq!(config.global.api.default_timeout(), Duration::from_secs(1));
        assert_eq!(
            config.consumer.circuit_breaker.sleep_window(),
            Duration::from_secs(30)
        );
        assert_eq!(
            config.consumer.outlier_detection.check_period(),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn fallback_policy_parses_both_values() {
        let config = Config::from_yaml("consumer:\n  allIsolatedFallback: fail\n").unwrap();
        assert_eq!(config.consumer.all_isolated_fallback, AllIsolatedFallback::Fail);
    }
}
