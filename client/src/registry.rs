//! Plugin registry
//!
//! Maps `(kind, name)` to a factory and builds plugin instances on demand.
//! Factories are plain function pointers, so registering the same factory
//! twice is an idempotent no-op while binding a different factory to a
//! taken key is an error. Load balancers additionally declare their
//! [`LoadBalanceType`] at registration, populating a second index used by
//! services that configure a balancer by algorithm rather than by name;
//! the first registration per algorithm wins, later claims are warned and
//! ignored.
//!
//! The process-wide instance behind [`PluginRegistry::global`] carries all
//! built-ins and never tears down. Tests and embedders that want isolation
//! construct their own registry and hand it to the context builder.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use polaris_core::{
    InstancePreUpdateHandler, LoadBalanceType, PluginFactory, PluginInstance, PluginKind,
    PolarisError, PolarisResult, ServiceData,
};

use crate::balancer::{
    MaglevBalancer, RingHashBalancer, SimpleHashBalancer, WeightedRandomBalancer,
};
use crate::breaker::{ErrorCountBreaker, ErrorRateBreaker};
use crate::connector::GrpcServerConnector;
use crate::detector::{HttpDetector, TcpDetector, UdpDetector};
use crate::local_registry::InMemoryRegistry;
use crate::router::{CanaryRouter, DstMetaRouter, NearbyRouter, RuleRouter, SetDivisionRouter};
use crate::stat::{LogAlertReporter, MonitorStatReporter};
use crate::weight::DefaultWeightAdjuster;

#[derive(Default)]
struct FactoryMaps {
    factories: HashMap<(PluginKind, String), PluginFactory>,
    balancers: HashMap<LoadBalanceType, PluginFactory>,
}

/// Name × kind → factory map plus the pre-update observer list
pub struct PluginRegistry {
    maps: Mutex<FactoryMaps>,
    observers: Mutex<Vec<InstancePreUpdateHandler>>,
}

static GLOBAL: LazyLock<Arc<PluginRegistry>> = LazyLock::new(|| {
    let registry = PluginRegistry::with_builtins();
    Arc::new(registry)
});

impl PluginRegistry {
    /// An empty registry with no built-ins
    pub fn new() -> Self {
        Self {
            maps: Mutex::new(FactoryMaps::default()),
            observers: Mutex::new(Vec::new()),
        }
    }

    /// A registry pre-loaded with every built-in plugin
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register_builtins();
        registry
    }

    /// The process-wide registry, constructed with built-ins on first use
    pub fn global() -> Arc<PluginRegistry> {
        Arc::clone(&GLOBAL)
    }

    /// Bind `factory` to `(kind, name)`
    ///
    /// Re-registering the identical factory succeeds; a different factory
    /// under a taken key is refused. Load balancers registered through here
    /// do not join the algorithm index — use [`register_load_balancer`].
    ///
    /// [`register_load_balancer`]: PluginRegistry::register_load_balancer
    pub fn register(
        &self,
        name: &str,
        kind: PluginKind,
        factory: PluginFactory,
    ) -> PolarisResult<()> {
        let mut maps = self.maps.lock();
        let key = (kind, name.to_string());
        if let Some(existing) = maps.factories.get(&key) {
            if *existing == factory {
                return Ok(());
            }
            error!(kind = %kind, name, "plugin already registered with a different factory");
            return Err(PolarisError::Plugin(format!(
                "{kind} plugin {name} already exists"
            )));
        }
        maps.factories.insert(key, factory);
        debug!(kind = %kind, name, "plugin registered");
        Ok(())
    }

    /// Bind a load balancer, declaring its algorithm for the enum index
    pub fn register_load_balancer(
        &self,
        name: &str,
        lb_type: LoadBalanceType,
        factory: PluginFactory,
    ) -> PolarisResult<()> {
        self.register(name, PluginKind::LoadBalancer, factory)?;
        let mut maps = self.maps.lock();
        if maps.balancers.contains_key(&lb_type) {
            warn!(
                name,
                lb_type = ?lb_type,
                "load balance type already registered, keeping the first binding"
            );
            return Ok(());
        }
        maps.balancers.insert(lb_type, factory);
        Ok(())
    }

    /// Build a fresh instance of the named plugin; the caller owns it
    pub fn get(&self, name: &str, kind: PluginKind) -> PolarisResult<PluginInstance> {
        let factory = {
            let maps = self.maps.lock();
            maps.factories
                .get(&(kind, name.to_string()))
                .copied()
                .ok_or_else(|| {
                    error!(kind = %kind, name, "plugin not registered");
                    PolarisError::Plugin(format!("{kind} plugin {name} not registered"))
                })?
        };
        Ok(factory())
    }

    /// Build a fresh load balancer by algorithm
    pub fn get_load_balancer(&self, lb_type: LoadBalanceType) -> PolarisResult<PluginInstance> {
        let factory = {
            let maps = self.maps.lock();
            maps.balancers.get(&lb_type).copied().ok_or_else(|| {
                error!(lb_type = ?lb_type, "load balance type not registered");
                PolarisError::Plugin(format!("load balance type {lb_type:?} not registered"))
            })?
        };
        Ok(factory())
    }

    /// Add an observer over `(old, new)` instance lists
    ///
    /// `front` observers run before the rest. The same handle (by pointer
    /// identity) registers at most once.
    pub fn register_instance_pre_update_handler(
        &self,
        handler: InstancePreUpdateHandler,
        front: bool,
    ) -> PolarisResult<()> {
        let mut observers = self.observers.lock();
        if observers.iter().any(|known| Arc::ptr_eq(known, &handler)) {
            return Err(PolarisError::ExistedResource(
                "pre-update handler already registered".into(),
            ));
        }
        if front {
            observers.insert(0, handler);
        } else {
            observers.push(handler);
        }
        Ok(())
    }

    /// Remove an observer; takes effect from the next dispatch
    pub fn deregister_instance_pre_update_handler(
        &self,
        handler: &InstancePreUpdateHandler,
    ) -> PolarisResult<()> {
        let mut observers = self.observers.lock();
        let before = observers.len();
        observers.retain(|known| !Arc::ptr_eq(known, handler));
        if observers.len() == before {
            return Err(PolarisError::Plugin(
                "pre-update handler not registered".into(),
            ));
        }
        Ok(())
    }

    /// Dispatch `(old, new)` to every observer registered at entry
    ///
    /// The list is snapshotted under the lock and invoked outside it, so
    /// observers may (de)register during dispatch without affecting the
    /// event in flight.
    pub fn on_pre_update_service_data(&self, old: &ServiceData, new: &ServiceData) {
        let snapshot: Vec<InstancePreUpdateHandler> = {
            let observers = self.observers.lock();
            observers.clone()
        };
        for observer in snapshot {
            observer(old.instance_list(), new.instance_list());
        }
    }

    fn register_builtins(&self) {
        // Built-ins use infallible fresh names; a failure here would be a
        // programming error, so it only gets logged.
        let results = [
            self.register("grpc", PluginKind::ServerConnector, grpc_connector),
            self.register("inmemory", PluginKind::LocalRegistry, inmemory_registry),
            self.register("monitor", PluginKind::StatReporter, monitor_stat_reporter),
            self.register("logAlert", PluginKind::AlertReporter, log_alert_reporter),
            self.register_load_balancer(
                "weightedRandom",
                LoadBalanceType::WeightedRandom,
                weighted_random_balancer,
            ),
            self.register_load_balancer("ringHash", LoadBalanceType::RingHash, ring_hash_balancer),
            self.register_load_balancer("maglev", LoadBalanceType::Maglev, maglev_balancer),
            self.register_load_balancer("l5cst", LoadBalanceType::L5CstHash, l5cst_balancer),
            self.register_load_balancer(
                "simpleHash",
                LoadBalanceType::SimpleHash,
                simple_hash_balancer,
            ),
            self.register_load_balancer(
                "cMurmurHash",
                LoadBalanceType::CMurmurHash,
                cmurmur_balancer,
            ),
            self.register(
                "defaultWeightAdjuster",
                PluginKind::WeightAdjuster,
                default_weight_adjuster,
            ),
            self.register("ruleRouter", PluginKind::ServiceRouter, rule_router),
            self.register("nearbyRouter", PluginKind::ServiceRouter, nearby_router),
            self.register(
                "setDivisionRouter",
                PluginKind::ServiceRouter,
                set_division_router,
            ),
            self.register("canaryRouter", PluginKind::ServiceRouter, canary_router),
            self.register("dstMetaRouter", PluginKind::ServiceRouter, dst_meta_router),
            self.register("errorCount", PluginKind::CircuitBreaker, error_count_breaker),
            self.register("errorRate", PluginKind::CircuitBreaker, error_rate_breaker),
            self.register("http", PluginKind::OutlierDetector, http_detector),
            self.register("tcp", PluginKind::OutlierDetector, tcp_detector),
            self.register("udp", PluginKind::OutlierDetector, udp_detector),
        ];
        for result in results {
            if let Err(e) = result {
                error!(error = %e, "built-in plugin registration failed");
            }
        }
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// Built-in factories. Plain `fn` items so the registry's idempotency rule
// (pointer equality) holds across repeated registration.

fn grpc_connector() -> PluginInstance {
    PluginInstance::ServerConnector(Arc::new(GrpcServerConnector::new()))
}

fn inmemory_registry() -> PluginInstance {
    PluginInstance::LocalRegistry(Arc::new(InMemoryRegistry::new()))
}

fn monitor_stat_reporter() -> PluginInstance {
    PluginInstance::StatReporter(Arc::new(MonitorStatReporter::new()))
}

fn log_alert_reporter() -> PluginInstance {
    PluginInstance::AlertReporter(Arc::new(LogAlertReporter))
}

fn weighted_random_balancer() -> PluginInstance {
    PluginInstance::LoadBalancer(Arc::new(WeightedRandomBalancer::new()))
}

fn ring_hash_balancer() -> PluginInstance {
    PluginInstance::LoadBalancer(Arc::new(RingHashBalancer::ketama()))
}

fn maglev_balancer() -> PluginInstance {
    PluginInstance::LoadBalancer(Arc::new(MaglevBalancer::new()))
}

fn l5cst_balancer() -> PluginInstance {
    PluginInstance::LoadBalancer(Arc::new(RingHashBalancer::l5cst()))
}

fn simple_hash_balancer() -> PluginInstance {
    PluginInstance::LoadBalancer(Arc::new(SimpleHashBalancer))
}

fn cmurmur_balancer() -> PluginInstance {
    PluginInstance::LoadBalancer(Arc::new(RingHashBalancer::cmurmur()))
}

fn default_weight_adjuster() -> PluginInstance {
    PluginInstance::WeightAdjuster(Arc::new(DefaultWeightAdjuster))
}

fn rule_router() -> PluginInstance {
    PluginInstance::ServiceRouter(Arc::new(RuleRouter))
}

fn nearby_router() -> PluginInstance {
    PluginInstance::ServiceRouter(Arc::new(NearbyRouter::new()))
}

fn set_division_router() -> PluginInstance {
    PluginInstance::ServiceRouter(Arc::new(SetDivisionRouter))
}

fn canary_router() -> PluginInstance {
    PluginInstance::ServiceRouter(Arc::new(CanaryRouter))
}

fn dst_meta_router() -> PluginInstance {
    PluginInstance::ServiceRouter(Arc::new(DstMetaRouter))
}

fn error_count_breaker() -> PluginInstance {
    PluginInstance::CircuitBreaker(Arc::new(ErrorCountBreaker::new()))
}

fn error_rate_breaker() -> PluginInstance {
    PluginInstance::CircuitBreaker(Arc::new(ErrorRateBreaker::new()))
}

fn http_detector() -> PluginInstance {
    PluginInstance::OutlierDetector(Arc::new(HttpDetector::new()))
}

fn tcp_detector() -> PluginInstance {
    PluginInstance::OutlierDetector(Arc::new(TcpDetector::new()))
}

fn udp_detector() -> PluginInstance {
    PluginInstance::OutlierDetector(Arc::new(UdpDetector::new()))
}
