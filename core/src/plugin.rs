//! Plugin contracts
//!
//! One trait per extension point. The `PluginInstance` enum is the only
//! place where "any plugin" erasure exists — it lives at the registry
//! boundary and is taken apart immediately by the chain builders.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::code::{PolarisError, PolarisResult, ReturnCode};
use crate::config::Config;
use crate::model::{Instance, ServiceDataHandler, ServiceDataKind, ServiceKey};
use crate::request::{
    InstanceDeregisterRequest, InstanceHeartbeatRequest, InstanceRegisterRequest,
};

/// The extension points a plugin may bind to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginKind {
    ServerConnector,
    LocalRegistry,
    ServiceRouter,
    LoadBalancer,
    OutlierDetector,
    CircuitBreaker,
    WeightAdjuster,
    StatReporter,
    AlertReporter,
}

impl std::fmt::Display for PluginKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            PluginKind::ServerConnector => "ServerConnector",
            PluginKind::LocalRegistry => "LocalRegistry",
            PluginKind::ServiceRouter => "ServiceRouter",
            PluginKind::LoadBalancer => "LoadBalancer",
            PluginKind::OutlierDetector => "OutlierDetector",
            PluginKind::CircuitBreaker => "CircuitBreaker",
            PluginKind::WeightAdjuster => "WeightAdjuster",
            PluginKind::StatReporter => "StatReporter",
            PluginKind::AlertReporter => "AlertReporter",
        })
    }
}

/// Algorithmic identity of a load balancer, declared statically at
/// registration so the registry never has to build a throwaway instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadBalanceType {
    WeightedRandom,
    RingHash,
    Maglev,
    L5CstHash,
    SimpleHash,
    CMurmurHash,
}

/// Talks to the control plane
///
/// Register/deregister/heartbeat take the remaining call budget as their
/// deadline; the retry envelope shrinks it on every attempt. Only
/// `NetworkFailed` and `ServerError` results may be retried.
#[async_trait]
pub trait ServerConnector: Send + Sync {
    fn name(&self) -> &str;

    /// Bind the connector to its cluster endpoint and tunables
    fn init(&self, config: &Config) -> PolarisResult<()> {
        let _ = config;
        Ok(())
    }

    /// Returns the instance id minted by the control plane
    async fn register_instance(
        &self,
        req: &InstanceRegisterRequest,
        timeout: Duration,
    ) -> PolarisResult<String>;

    async fn deregister_instance(
        &self,
        req: &InstanceDeregisterRequest,
        timeout: Duration,
    ) -> PolarisResult<()>;

    async fn instance_heartbeat(
        &self,
        req: &InstanceHeartbeatRequest,
        timeout: Duration,
    ) -> PolarisResult<()>;

    /// Start pushing `(key, kind)` snapshots to `handler` until unsubscribed.
    /// A second subscription for the same pair returns `ExistedResource`.
    fn subscribe_service_data(
        &self,
        key: ServiceKey,
        kind: ServiceDataKind,
        handler: ServiceDataHandler,
    ) -> PolarisResult<()>;

    fn unsubscribe(&self, key: &ServiceKey, kind: ServiceDataKind) -> PolarisResult<()>;
}

/// Invoked with `(old, new)` snapshots right before a publish
pub type PreUpdateDispatcher =
    Arc<dyn Fn(&crate::model::ServiceData, &crate::model::ServiceData) + Send + Sync>;

/// In-process cache of service data
#[async_trait]
pub trait LocalRegistry: Send + Sync {
    fn name(&self) -> &str;

    /// Wire the cache to its upstream connector and the pre-update dispatch
    fn init(
        &self,
        config: &Config,
        connector: Arc<dyn ServerConnector>,
        pre_update: PreUpdateDispatcher,
    ) -> PolarisResult<()>;

    /// Current snapshot, subscribing and waiting up to `timeout` on a miss
    async fn get_service_data(
        &self,
        key: &ServiceKey,
        kind: ServiceDataKind,
        timeout: Duration,
    ) -> PolarisResult<Arc<crate::model::ServiceData>>;

    /// Current snapshot without triggering a fetch
    fn peek_service_data(
        &self,
        key: &ServiceKey,
        kind: ServiceDataKind,
    ) -> Option<Arc<crate::model::ServiceData>>;

    /// Accept a pushed snapshot (stale revisions are dropped)
    fn update_service_data(&self, data: crate::model::ServiceData);
}

/// Inputs a router may consult when filtering candidates
#[derive(Debug, Clone, Default)]
pub struct RouteCriteria {
    /// Metadata the caller wants destination instances to carry
    pub source_metadata: HashMap<String, String>,
    pub caller_region: Option<String>,
    pub caller_zone: Option<String>,
    /// Set name for set-division routing
    pub set_name: Option<String>,
    /// Canary label the caller belongs to, if any
    pub canary: Option<String>,
}

/// Filters an instance list; routers run in configured order
pub trait ServiceRouter: Send + Sync {
    fn name(&self) -> &str;

    fn init(&self, config: &Config) -> PolarisResult<()> {
        let _ = config;
        Ok(())
    }

    /// Returns the surviving candidates. An empty result makes the chain
    /// keep the previous list, so routers may filter aggressively.
    fn route(&self, criteria: &RouteCriteria, instances: Vec<Instance>) -> Vec<Instance>;
}

/// Inputs to one selection
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectionCriteria {
    /// Hash key for hash-based balancers
    pub hash_key: u64,
}

/// Picks one instance from the routed, breaker-gated candidates
pub trait LoadBalancer: Send + Sync {
    fn name(&self) -> &str;

    fn load_balance_type(&self) -> LoadBalanceType;

    fn choose_instance(
        &self,
        criteria: &SelectionCriteria,
        instances: &[Instance],
    ) -> Option<Instance>;
}

/// Result classes a probe can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Success,
    Fail,
    Timeout,
}

/// One probe's verdict with its measured latency
#[derive(Debug, Clone, Copy)]
pub struct DetectResult {
    pub outcome: ProbeOutcome,
    pub latency: Duration,
}

/// Actively probes an instance for liveness
///
/// Probes block with a deadline; they run on the detection executor's own
/// thread, never on a caller's.
pub trait OutlierDetector: Send + Sync {
    fn name(&self) -> &str;

    fn init(&self, config: &Config) -> PolarisResult<()> {
        let _ = config;
        Ok(())
    }

    fn detect_instance(&self, host: &str, port: u16) -> DetectResult;
}

/// Rolling call statistics for one instance, as seen by trip strategies
#[derive(Debug, Clone, Copy)]
pub struct CallStats {
    pub consecutive_errors: u32,
    pub window_total: u32,
    pub window_errors: u32,
}

/// Decides when a closed instance trips open
///
/// The surrounding state machine (open → half-open → closed/open) is shared;
/// strategies only own the trip condition.
pub trait CircuitBreaker: Send + Sync {
    fn name(&self) -> &str;

    fn init(&self, config: &Config) -> PolarisResult<()> {
        let _ = config;
        Ok(())
    }

    fn should_trip(&self, stats: &CallStats) -> bool;
}

/// Rewrites effective instance weights before selection
pub trait WeightAdjuster: Send + Sync {
    fn name(&self) -> &str;

    /// Returns true when any weight changed
    fn adjust_weights(&self, instances: &mut [Instance]) -> bool;
}

/// Which API a stat record belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiKind {
    ProviderRegister,
    ProviderDeregister,
    ProviderHeartbeat,
    ConsumerGetOneInstance,
    ConsumerGetInstances,
}

impl std::fmt::Display for ApiKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ApiKind::ProviderRegister => "provider.register",
            ApiKind::ProviderDeregister => "provider.deregister",
            ApiKind::ProviderHeartbeat => "provider.heartbeat",
            ApiKind::ConsumerGetOneInstance => "consumer.getOneInstance",
            ApiKind::ConsumerGetInstances => "consumer.getInstances",
        })
    }
}

/// One finished API call
#[derive(Debug, Clone, Copy)]
pub struct ApiCallRecord {
    pub api: ApiKind,
    pub code: ReturnCode,
    pub latency: Duration,
}

/// Collects API call records; flushed periodically by the cache executor
pub trait StatReporter: Send + Sync {
    fn name(&self) -> &str;

    fn report(&self, record: ApiCallRecord);

    /// Emit and reset whatever has been aggregated
    fn flush(&self);
}

/// Receives out-of-band alerts (circuit transitions, probe storms)
pub trait AlertReporter: Send + Sync {
    fn name(&self) -> &str;

    fn alert(&self, service: &ServiceKey, message: &str);
}

/// Observer over `(old, new)` instance lists, dispatched before a publish
pub type InstancePreUpdateHandler = Arc<dyn Fn(&[Instance], &[Instance]) + Send + Sync>;

/// A built plugin, erased for transport out of the registry
pub enum PluginInstance {
    ServerConnector(Arc<dyn ServerConnector>),
    LocalRegistry(Arc<dyn LocalRegistry>),
    ServiceRouter(Arc<dyn ServiceRouter>),
    LoadBalancer(Arc<dyn LoadBalancer>),
    OutlierDetector(Arc<dyn OutlierDetector>),
    CircuitBreaker(Arc<dyn CircuitBreaker>),
    WeightAdjuster(Arc<dyn WeightAdjuster>),
    StatReporter(Arc<dyn StatReporter>),
    AlertReporter(Arc<dyn AlertReporter>),
}

/// Builds a fresh plugin instance. Function pointers compare by address,
/// which is what makes re-registration of the same factory idempotent.
pub type PluginFactory = fn() -> PluginInstance;

macro_rules! instance_accessor {
    ($fn_name:ident, $variant:ident, $trait_ty:ty) => {
        /// Unwrap into the kind-specific handle
        pub fn $fn_name(self) -> PolarisResult<Arc<$trait_ty>> {
            match self {
                PluginInstance::$variant(plugin) => Ok(plugin),
                other => Err(PolarisError::Plugin(format!(
                    "expected {} plugin, factory built {}",
                    PluginKind::$variant,
                    other.kind()
                ))),
            }
        }
    };
}

impl PluginInstance {
    /// The extension point this instance binds to
    pub fn kind(&self) -> PluginKind {
        match self {
            PluginInstance::ServerConnector(_) => PluginKind::ServerConnector,
            PluginInstance::LocalRegistry(_) => PluginKind::LocalRegistry,
            PluginInstance::ServiceRouter(_) => PluginKind::ServiceRouter,
            PluginInstance::LoadBalancer(_) => PluginKind::LoadBalancer,
            PluginInstance::OutlierDetector(_) => PluginKind::OutlierDetector,
            PluginInstance::CircuitBreaker(_) => PluginKind::CircuitBreaker,
            PluginInstance::WeightAdjuster(_) => PluginKind::WeightAdjuster,
            PluginInstance::StatReporter(_) => PluginKind::StatReporter,
            PluginInstance::AlertReporter(_) => PluginKind::AlertReporter,
        }
    }

    instance_accessor!(server_connector, ServerConnector, dyn ServerConnector);
    instance_accessor!(local_registry, LocalRegistry, dyn LocalRegistry);
    instance_accessor!(service_router, ServiceRouter, dyn ServiceRouter);
    instance_accessor!(load_balancer, LoadBalancer, dyn LoadBalancer);
    instance_accessor!(outlier_detector, OutlierDetector, dyn OutlierDetector);
    instance_accessor!(circuit_breaker, CircuitBreaker, dyn CircuitBreaker);
    instance_accessor!(weight_adjuster, WeightAdjuster, dyn WeightAdjuster);
    instance_accessor!(stat_reporter, StatReporter, dyn StatReporter);
    instance_accessor!(alert_reporter, AlertReporter, dyn AlertReporter);
}

impl std::fmt::Debug for PluginInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PluginInstance").field(&self.kind()).finish()
    }
}

macro_rules! impl_plugin_debug {
    ($($trait_ty:ident),* $(,)?) => {
        $(
            impl std::fmt::Debug for dyn $trait_ty {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    f.debug_tuple(stringify!($trait_ty)).field(&self.name()).finish()
                }
            }
        )*
    };
}

impl_plugin_debug!(
    ServerConnector,
    LocalRegistry,
    ServiceRouter,
    LoadBalancer,
    OutlierDetector,
    CircuitBreaker,
    WeightAdjuster,
    StatReporter,
    AlertReporter,
);

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    struct NoopAdjuster;

    impl WeightAdjuster for NoopAdjuster {
        fn name(&self) -> &str {
            "noop"
        }
        fn adjust_weights(&self, _instances: &mut [Instance]) -> bool {
            false
        }
    }

    #[test]
    fn instance_accessor_matches_kind() {
        let instance = PluginInstance::WeightAdjuster(Arc::new(NoopAdjuster));
        assert_eq!(instance.kind(), PluginKind::WeightAdjuster);
        assert!(instance.weight_adjuster().is_ok());
    }

    #[test]
    fn instance_accessor_rejects_wrong_kind() {
        let instance = PluginInstance::WeightAdjuster(Arc::new(NoopAdjuster));
        let err = instance.load_balancer().unwrap_err();
        assert_eq!(err.code(), ReturnCode::PluginError);
    }

    struct OtherAdjuster;

    impl WeightAdjuster for OtherAdjuster {
        fn name(&self) -> &str {
            "other"
        }
        fn adjust_weights(&self, _instances: &mut [Instance]) -> bool {
            false
        }
    }

    #[test]
    fn factory_pointers_compare_by_address() {
        fn factory_a() -> PluginInstance {
            PluginInstance::WeightAdjuster(Arc::new(NoopAdjuster))
        }
        fn factory_b() -> PluginInstance {
            PluginInstance::WeightAdjuster(Arc::new(OtherAdjuster))
        }
        let a: PluginFactory = factory_a;
        let b: PluginFactory = factory_b;
        assert!(a == a);
        assert!(a != b);
    }
}
