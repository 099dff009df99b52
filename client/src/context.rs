//! Context: the root object behind every API facade
//!
//! Owns the configuration, the server connector, the local registry, the
//! per-service contexts and the two engine reactors. Service contexts are
//! built lazily on first touch and shared through `Arc`; the cache
//! executor reaps the ones nothing has touched for the configured idle
//! window. The detection executor walks all live service contexts on its
//! own reactor thread, so probe latency never delays housekeeping.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use polaris_core::{
    AlertReporter, Config, DetectWhen, LocalRegistry, PluginKind, PolarisResult,
    PreUpdateDispatcher, ServerConnector, ServiceDataKind, ServiceKey, StatReporter,
};

use crate::breaker::CircuitBreakerChain;
use crate::detector::OutlierDetectorChain;
use crate::reactor::{Reactor, ReactorHandle};
use crate::registry::PluginRegistry;
use crate::retry::RetrySpec;
use crate::router::ServiceRouterChain;

/// How a context is owned
///
/// `Private` contexts belong to the facade that created them; `Share` and
/// `Limit` contexts are owned externally. `ShareWithoutEngine` carries
/// configuration only — no reactors run — and no provider or consumer
/// facade accepts it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextMode {
    Private,
    Share,
    Limit,
    ShareWithoutEngine,
}

impl ContextMode {
    /// Whether the engine executors run for this mode
    pub fn engine_enabled(self) -> bool {
        self != ContextMode::ShareWithoutEngine
    }

    /// Whether an API facade may be built on this mode
    pub fn usable_by_api(self) -> bool {
        matches!(
            self,
            ContextMode::Private | ContextMode::Share | ContextMode::Limit
        )
    }
}

/// Per-service state: chains, balancer and the breaker table
pub struct ServiceContext {
    key: ServiceKey,
    router_chain: ServiceRouterChain,
    load_balancer: Arc<dyn polaris_core::LoadBalancer>,
    weight_adjuster: Arc<dyn polaris_core::WeightAdjuster>,
    detector_chain: OutlierDetectorChain,
    breaker_chain: CircuitBreakerChain,
    last_access: Mutex<Instant>,
}

impl std::fmt::Debug for ServiceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContext")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl ServiceContext {
    pub fn key(&self) -> &ServiceKey {
        &self.key
    }

    pub fn router_chain(&self) -> &ServiceRouterChain {
        &self.router_chain
    }

    pub fn load_balancer(&self) -> &Arc<dyn polaris_core::LoadBalancer> {
        &self.load_balancer
    }

    pub fn weight_adjuster(&self) -> &Arc<dyn polaris_core::WeightAdjuster> {
        &self.weight_adjuster
    }

    pub fn detector_chain(&self) -> &OutlierDetectorChain {
        &self.detector_chain
    }

    pub fn breaker_chain(&self) -> &CircuitBreakerChain {
        &self.breaker_chain
    }

    fn touch(&self) {
        *self.last_access.lock() = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_access.lock().elapsed()
    }
}

/// Root object: configuration, plugins, engine and per-service state
pub struct Context {
    mode: ContextMode,
    config: Arc<Config>,
    plugins: Arc<PluginRegistry>,
    connector: Arc<dyn ServerConnector>,
    local_registry: Arc<dyn LocalRegistry>,
    stat_reporter: Arc<dyn StatReporter>,
    alert_reporter: Arc<dyn AlertReporter>,
    services: Mutex<HashMap<ServiceKey, Arc<ServiceContext>>>,
    detection_reactor: Reactor,
    cache_reactor: Reactor,
}

impl Context {
    /// Create a context with the global plugin registry
    pub fn create(config: Config, mode: ContextMode) -> PolarisResult<Arc<Context>> {
        Context::builder(config).mode(mode).build()
    }

    pub fn builder(config: Config) -> ContextBuilder {
        ContextBuilder {
            config,
            mode: ContextMode::Share,
            plugins: None,
            connector: None,
            local_registry: None,
        }
    }

    pub fn mode(&self) -> ContextMode {
        self.mode
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn server_connector(&self) -> Arc<dyn ServerConnector> {
        Arc::clone(&self.connector)
    }

    pub fn local_registry(&self) -> Arc<dyn LocalRegistry> {
        Arc::clone(&self.local_registry)
    }

    pub fn stat_reporter(&self) -> Arc<dyn StatReporter> {
        Arc::clone(&self.stat_reporter)
    }

    pub fn plugin_registry(&self) -> Arc<PluginRegistry> {
        Arc::clone(&self.plugins)
    }

    /// Retry envelope parameters for one call, honouring a per-request
    /// timeout when the caller set one
    pub fn retry_spec(&self, requested: Option<Duration>) -> RetrySpec {
        let api = &self.config.global.api;
        RetrySpec {
            budget: requested.unwrap_or_else(|| api.default_timeout()),
            max_tries: api.max_retry_times,
            interval: api.retry_interval(),
        }
    }

    /// The service context for `key`, built on first touch
    pub fn service_context(&self, key: &ServiceKey) -> PolarisResult<Arc<ServiceContext>> {
        {
            let services = self.services.lock();
            if let Some(service) = services.get(key) {
                service.touch();
                return Ok(Arc::clone(service));
            }
        }
        let built = Arc::new(self.build_service_context(key)?);
        let mut services = self.services.lock();
        let service = services.entry(key.clone()).or_insert(built);
        service.touch();
        Ok(Arc::clone(service))
    }

    /// Live service contexts, each with its own reference
    pub fn all_service_contexts(&self) -> Vec<Arc<ServiceContext>> {
        self.services.lock().values().cloned().collect()
    }

    fn build_service_context(&self, key: &ServiceKey) -> PolarisResult<ServiceContext> {
        let config = &*self.config;
        let consumer = &config.consumer;

        let mut routers = Vec::with_capacity(consumer.service_router.chain.len());
        for name in &consumer.service_router.chain {
            let router = self
                .plugins
                .get(name, PluginKind::ServiceRouter)?
                .service_router()?;
            router.init(config)?;
            routers.push(router);
        }

        let load_balancer = self
            .plugins
            .get(&consumer.load_balancer.balancer_type, PluginKind::LoadBalancer)?
            .load_balancer()?;

        let weight_adjuster = self
            .plugins
            .get("defaultWeightAdjuster", PluginKind::WeightAdjuster)?
            .weight_adjuster()?;

        let mut strategies = Vec::with_capacity(consumer.circuit_breaker.chain.len());
        for name in &consumer.circuit_breaker.chain {
            let strategy = self
                .plugins
                .get(name, PluginKind::CircuitBreaker)?
                .circuit_breaker()?;
            strategy.init(config)?;
            strategies.push(strategy);
        }
        let breaker_chain =
            CircuitBreakerChain::new(key.clone(), strategies, &consumer.circuit_breaker)
                .with_alert_reporter(Arc::clone(&self.alert_reporter));

        let mut detectors = Vec::new();
        if consumer.outlier_detection.when != DetectWhen::Never {
            for name in &consumer.outlier_detection.chain {
                let detector = self
                    .plugins
                    .get(name, PluginKind::OutlierDetector)?
                    .outlier_detector()?;
                detector.init(config)?;
                detectors.push(detector);
            }
        }
        let detector_chain = OutlierDetectorChain::new(
            detectors,
            consumer.outlier_detection.when,
            consumer.outlier_detection.sample_ratio,
        );

        debug!(service = %key, "service context created");
        Ok(ServiceContext {
            key: key.clone(),
            router_chain: ServiceRouterChain::new(routers),
            load_balancer,
            weight_adjuster,
            detector_chain,
            breaker_chain,
            last_access: Mutex::new(Instant::now()),
        })
    }

    fn arm_engine(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.detection_reactor
            .handle()
            .submit(Box::new(move |handle| detection_tick(weak, handle)));

        let weak = Arc::downgrade(self);
        self.cache_reactor
            .handle()
            .submit(Box::new(move |handle| reaper_tick(weak, handle)));

        let weak = Arc::downgrade(self);
        let interval = self.config.global.stat_reporter.report_interval();
        self.cache_reactor.handle().add_timer(
            Box::new(move |handle| stat_flush_tick(weak, handle)),
            interval,
        );
    }

    fn run_detection_sweep(&self) {
        if self.config.consumer.outlier_detection.when == DetectWhen::Never {
            return;
        }
        for service in self.all_service_contexts() {
            if service.detector_chain.is_empty() {
                continue;
            }
            let Some(data) = self
                .local_registry
                .peek_service_data(service.key(), ServiceDataKind::Instances)
            else {
                continue;
            };
            service
                .detector_chain
                .detect_instances(data.instance_list(), &service.breaker_chain);
        }
    }

    fn reap_idle_services(&self) {
        let window = self.config.global.service_expire_window();
        let mut services = self.services.lock();
        services.retain(|key, service| {
            let in_use = Arc::strong_count(service) > 1;
            let keep = in_use || service.idle_for() < window;
            if !keep {
                info!(service = %key, "idle service context unloaded");
            }
            keep
        });
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.detection_reactor.stop();
        self.cache_reactor.stop();
        self.stat_reporter.flush();
    }
}

fn detection_tick(context: Weak<Context>, handle: &ReactorHandle) {
    let Some(ctx) = context.upgrade() else {
        return;
    };
    ctx.run_detection_sweep();
    let period = ctx.config.consumer.outlier_detection.check_period();
    drop(ctx);
    handle.add_timer(
        Box::new(move |handle| detection_tick(context, handle)),
        period,
    );
}

fn reaper_tick(context: Weak<Context>, handle: &ReactorHandle) {
    let Some(ctx) = context.upgrade() else {
        return;
    };
    ctx.reap_idle_services();
    // Half the expire window keeps unload latency bounded without busy work
    let period = (ctx.config.global.service_expire_window() / 2).max(Duration::from_millis(100));
    drop(ctx);
    handle.add_timer(
        Box::new(move |handle| reaper_tick(context, handle)),
        period,
    );
}

fn stat_flush_tick(context: Weak<Context>, handle: &ReactorHandle) {
    let Some(ctx) = context.upgrade() else {
        return;
    };
    ctx.stat_reporter.flush();
    let period = ctx.config.global.stat_reporter.report_interval();
    drop(ctx);
    handle.add_timer(
        Box::new(move |handle| stat_flush_tick(context, handle)),
        period,
    );
}

/// Assembles a [`Context`], with override points for embedders and tests
pub struct ContextBuilder {
    config: Config,
    mode: ContextMode,
    plugins: Option<Arc<PluginRegistry>>,
    connector: Option<Arc<dyn ServerConnector>>,
    local_registry: Option<Arc<dyn LocalRegistry>>,
}

impl ContextBuilder {
    pub fn mode(mut self, mode: ContextMode) -> Self {
        self.mode = mode;
        self
    }

    /// Use an isolated plugin registry instead of the process-wide one
    pub fn plugin_registry(mut self, plugins: Arc<PluginRegistry>) -> Self {
        self.plugins = Some(plugins);
        self
    }

    /// Bring your own connector (stubs, alternative transports)
    pub fn server_connector(mut self, connector: Arc<dyn ServerConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn local_registry(mut self, local_registry: Arc<dyn LocalRegistry>) -> Self {
        self.local_registry = Some(local_registry);
        self
    }

    pub fn build(self) -> PolarisResult<Arc<Context>> {
        let config = Arc::new(self.config);
        let plugins = self.plugins.unwrap_or_else(PluginRegistry::global);

        let connector = match self.connector {
            Some(connector) => connector,
            None => plugins
                .get(
                    &config.global.server_connector.protocol,
                    PluginKind::ServerConnector,
                )?
                .server_connector()?,
        };
        connector.init(&config)?;

        let local_registry = match self.local_registry {
            Some(local_registry) => local_registry,
            None => plugins
                .get(&config.consumer.local_cache.cache_type, PluginKind::LocalRegistry)?
                .local_registry()?,
        };
        let dispatcher: PreUpdateDispatcher = {
            let plugins = Arc::clone(&plugins);
            Arc::new(move |old, new| plugins.on_pre_update_service_data(old, new))
        };
        local_registry.init(&config, Arc::clone(&connector), dispatcher)?;

        let stat_reporter = plugins
            .get(&config.global.stat_reporter.name, PluginKind::StatReporter)?
            .stat_reporter()?;
        let alert_reporter = plugins
            .get(&config.global.alert_reporter.name, PluginKind::AlertReporter)?
            .alert_reporter()?;

        if !self.mode.engine_enabled() {
            warn!("context created without engine, background work disabled");
        }

        let context = Arc::new(Context {
            mode: self.mode,
            config,
            plugins,
            connector,
            local_registry,
            stat_reporter,
            alert_reporter,
            services: Mutex::new(HashMap::new()),
            detection_reactor: Reactor::new("polaris-detect"),
            cache_reactor: Reactor::new("polaris-cache"),
        });
        if context.mode.engine_enabled() {
            context.arm_engine();
        }
        Ok(context)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::breaker::CircuitState;
    use async_trait::async_trait;
    use polaris_core::{
        Instance, InstanceDeregisterRequest, InstanceHeartbeatRequest, InstanceRegisterRequest,
        PolarisError, ServiceData, ServiceDataHandler,
    };

    /// Connector stub: provider calls fail, subscriptions are recorded
    struct StubConnector {
        handlers: Mutex<HashMap<(ServiceKey, ServiceDataKind), ServiceDataHandler>>,
    }

    impl StubConnector {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                handlers: Mutex::new(HashMap::new()),
            })
        }
    }

    #[async_trait]
    impl ServerConnector for StubConnector {
        fn name(&self) -> &str {
            "stub"
        }

        async fn register_instance(
            &self,
            _req: &InstanceRegisterRequest,
            _timeout: Duration,
        ) -> PolarisResult<String> {
            Err(PolarisError::NetworkFailed("stub".into()))
        }

        async fn deregister_instance(
            &self,
            _req: &InstanceDeregisterRequest,
            _timeout: Duration,
        ) -> PolarisResult<()> {
            Err(PolarisError::NetworkFailed("stub".into()))
        }

        async fn instance_heartbeat(
            &self,
            _req: &InstanceHeartbeatRequest,
            _timeout: Duration,
        ) -> PolarisResult<()> {
            Err(PolarisError::NetworkFailed("stub".into()))
        }

        fn subscribe_service_data(
            &self,
            key: ServiceKey,
            kind: ServiceDataKind,
            handler: ServiceDataHandler,
        ) -> PolarisResult<()> {
            self.handlers.lock().insert((key, kind), handler);
            Ok(())
        }

        fn unsubscribe(&self, key: &ServiceKey, kind: ServiceDataKind) -> PolarisResult<()> {
            self.handlers.lock().remove(&(key.clone(), kind));
            Ok(())
        }
    }

    fn context_with(yaml: &str) -> Arc<Context> {
        Context::builder(Config::from_yaml(yaml).unwrap())
            .mode(ContextMode::Private)
            .server_connector(StubConnector::new())
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn service_contexts_are_cached_per_key() {
        let context = context_with("{}");
        let key = ServiceKey::new("Test", "echo");
        let first = context.service_context(&key).unwrap();
        let second = context.service_context(&key).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(context.all_service_contexts().len(), 1);
    }

    #[tokio::test]
    async fn default_chains_are_assembled() {
        let context = context_with("{}");
        let service = context
            .service_context(&ServiceKey::new("Test", "echo"))
            .unwrap();
        assert_eq!(service.load_balancer().name(), "weightedRandom");
        assert_eq!(service.weight_adjuster().name(), "defaultWeightAdjuster");
        // Detection defaults to never, so the chain is inert
        assert!(service.detector_chain().is_empty());
    }

    #[tokio::test]
    async fn configured_balancer_is_honoured() {
        let context = context_with("consumer:\n  loadBalancer:\n    type: ringHash\n");
        let service = context
            .service_context(&ServiceKey::new("Test", "echo"))
            .unwrap();
        assert_eq!(service.load_balancer().name(), "ringHash");
    }

    #[tokio::test]
    async fn unknown_balancer_fails_service_context_creation() {
        let context = context_with("consumer:\n  loadBalancer:\n    type: nope\n");
        let err = context
            .service_context(&ServiceKey::new("Test", "echo"))
            .unwrap_err();
        assert_eq!(err.code(), polaris_core::ReturnCode::PluginError);
    }

    #[tokio::test]
    async fn share_without_engine_is_rejected_by_facades() {
        assert!(!ContextMode::ShareWithoutEngine.usable_by_api());
        assert!(ContextMode::Private.usable_by_api());
        assert!(ContextMode::Share.usable_by_api());
        assert!(ContextMode::Limit.usable_by_api());
    }

    #[tokio::test]
    async fn retry_spec_prefers_the_request_timeout() {
        let context = context_with("global:\n  api:\n    timeout: 900\n    maxRetryTimes: 4\n");
        let spec = context.retry_spec(None);
        assert_eq!(spec.budget, Duration::from_millis(900));
        assert_eq!(spec.max_tries, 4);
        let spec = context.retry_spec(Some(Duration::from_millis(77)));
        assert_eq!(spec.budget, Duration::from_millis(77));
    }

    #[tokio::test]
    async fn idle_service_contexts_are_reaped() {
        let context = context_with("global:\n  serviceExpireTime: 200\n");
        let key = ServiceKey::new("Test", "short-lived");
        {
            let _service = context.service_context(&key).unwrap();
        }
        assert_eq!(context.all_service_contexts().len(), 1);
        // Reaper runs every window/2 = 100ms on the cache reactor
        let deadline = Instant::now() + Duration::from_secs(3);
        while !context.all_service_contexts().is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(50));
        }
        assert!(
            context.all_service_contexts().is_empty(),
            "idle context survived the reaper"
        );
    }

    #[tokio::test]
    async fn touched_service_contexts_survive_the_reaper() {
        let context = context_with("global:\n  serviceExpireTime: 200\n");
        let key = ServiceKey::new("Test", "busy");
        for _ in 0..6 {
            let _ = context.service_context(&key).unwrap();
            std::thread::sleep(Duration::from_millis(60));
        }
        assert_eq!(context.all_service_contexts().len(), 1);
    }

    #[tokio::test]
    async fn detection_sweep_trips_breaker_on_dead_instance() {
        // Real tcp detector against a port with no listener; errorCount
        // threshold 1 opens the circuit on the first sweep.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let dead_port = listener.local_addr().unwrap().port();
        drop(listener);

        let context = context_with(
            r#"
global:
  serviceExpireTime: 60000
consumer:
  outlierDetection:
    when: always
    checkPeriod: 50
    sampleRatio: 1.0
    chain: [tcp]
    tcp:
      timeout: 100
  circuitBreaker:
    errorCount:
      continuousErrorThreshold: 1
"#,
        );
        let key = ServiceKey::new("Test", "dead");
        let service = context.service_context(&key).unwrap();
        context.local_registry().update_service_data(ServiceData::instances(
            key.clone(),
            "1",
            vec![Instance::new("i-dead", "127.0.0.1", dead_port)],
        ));

        let deadline = Instant::now() + Duration::from_secs(5);
        while service.breaker_chain().state("i-dead") != CircuitState::Open
            && Instant::now() < deadline
        {
            std::thread::sleep(Duration::from_millis(25));
        }
        assert_eq!(service.breaker_chain().state("i-dead"), CircuitState::Open);
    }
}
