//! Consumer API facade
//!
//! Discovery-side entry points: fetch a service's instances, select one
//! for a call, and report the call's outcome back into the circuit
//! breaker. Selection runs the service's router chain, lets the weight
//! adjuster touch the survivors, gates them through the breaker and hands
//! the rest to the configured load balancer.
//!
//! Recovery traffic is part of selection: an open instance whose sleep
//! window elapsed, or a half-open instance with a free probe slot, takes
//! the caller as its anointed probe before the healthy pool is consulted.

use std::path::Path;
use std::sync::Arc;

use tracing::{error, warn};

use polaris_core::{
    AllIsolatedFallback, ApiKind, Config, GetInstancesRequest, GetOneInstanceRequest, Instance,
    PolarisError, PolarisResult, RouteCriteria, SelectionCriteria, ServiceCallResult,
    ServiceDataKind,
};

use crate::breaker::CircuitState;
use crate::context::{Context, ContextMode};
use crate::stat::ApiStat;

/// Entry point for service consumers
pub struct ConsumerApi {
    context: Arc<Context>,
}

impl ConsumerApi {
    /// Wrap an existing context; `ShareWithoutEngine` contexts are refused
    pub fn create(context: Arc<Context>) -> PolarisResult<Self> {
        if !context.mode().usable_by_api() {
            error!(mode = ?context.mode(), "consumer api rejects this context mode");
            return Err(PolarisError::InvalidArgument(format!(
                "context mode {:?} not usable by the consumer api",
                context.mode()
            )));
        }
        Ok(Self { context })
    }

    /// Create a private context from `config` and wrap it
    pub fn create_from_config(config: Config) -> PolarisResult<Self> {
        Self::create(Context::create(config, ContextMode::Private)?)
    }

    pub fn create_from_file(path: impl AsRef<Path>) -> PolarisResult<Self> {
        Self::create_from_config(Config::from_file(path)?)
    }

    pub fn create_from_string(content: &str) -> PolarisResult<Self> {
        Self::create_from_config(Config::from_yaml(content)?)
    }

    pub fn create_with_default_file() -> PolarisResult<Self> {
        Self::create_from_config(Config::with_default_file()?)
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    /// Select one instance for an outgoing call
    pub async fn get_one_instance(&self, req: &GetOneInstanceRequest) -> PolarisResult<Instance> {
        let stat = ApiStat::new(self.context.stat_reporter(), ApiKind::ConsumerGetOneInstance);
        let result = self.select_instance(req).await;
        stat.finish(result)
    }

    /// The current instance snapshot, unrouted
    pub async fn get_instances(&self, req: &GetInstancesRequest) -> PolarisResult<Vec<Instance>> {
        let stat = ApiStat::new(self.context.stat_reporter(), ApiKind::ConsumerGetInstances);
        let result = async {
            let key = req.service_key();
            if key.is_empty() {
                return Err(PolarisError::InvalidArgument(
                    "get instances: namespace and service are required".into(),
                ));
            }
            // Touch the service context so the reaper sees the key in use
            self.context.service_context(&key)?;
            let timeout = self.context.retry_spec(req.timeout).budget;
            let data = self
                .context
                .local_registry()
                .get_service_data(&key, ServiceDataKind::Instances, timeout)
                .await?;
            Ok(data.instance_list().to_vec())
        }
        .await;
        stat.finish(result)
    }

    /// Feed a finished call's outcome into the circuit breaker
    pub fn update_call_result(&self, result: &ServiceCallResult) -> PolarisResult<()> {
        if result.key.is_empty() || result.instance_id.is_empty() {
            return Err(PolarisError::InvalidArgument(
                "call result: service key and instance id are required".into(),
            ));
        }
        let service = self.context.service_context(&result.key)?;
        service
            .breaker_chain()
            .on_call_result(&result.instance_id, result.success);
        Ok(())
    }

    async fn select_instance(&self, req: &GetOneInstanceRequest) -> PolarisResult<Instance> {
        let key = req.service_key();
        if key.is_empty() {
            return Err(PolarisError::InvalidArgument(
                "get one instance: namespace and service are required".into(),
            ));
        }
        let service = self.context.service_context(&key)?;
        let timeout = self.context.retry_spec(req.timeout).budget;
        let data = self
            .context
            .local_registry()
            .get_service_data(&key, ServiceDataKind::Instances, timeout)
            .await?;

        let criteria = RouteCriteria {
            source_metadata: req.source_metadata.clone(),
            ..Default::default()
        };
        let mut candidates = service
            .router_chain()
            .route(&criteria, data.instance_list().to_vec());
        if candidates.is_empty() {
            return Err(PolarisError::ServiceNotFound(format!(
                "{key}: no routable instances"
            )));
        }
        service.weight_adjuster().adjust_weights(&mut candidates);

        let breaker = service.breaker_chain();
        let mut healthy = Vec::with_capacity(candidates.len());
        let mut suspects = Vec::new();
        for instance in candidates.iter() {
            match breaker.state(&instance.id) {
                CircuitState::Closed => healthy.push(instance.clone()),
                _ => suspects.push(instance.clone()),
            }
        }

        // Recovery first: one caller may carry the half-open probe
        for suspect in &suspects {
            if breaker.acquire_selectable(&suspect.id) {
                return Ok(suspect.clone());
            }
        }

        if healthy.is_empty() {
            match self.context.config().consumer.all_isolated_fallback {
                AllIsolatedFallback::PickAnyway => {
                    warn!(service = %key, "all instances gated, picking anyway");
                    healthy = candidates;
                }
                AllIsolatedFallback::Fail => {
                    return Err(PolarisError::ServiceNotFound(format!(
                        "{key}: all instances are circuit-broken"
                    )));
                }
            }
        }

        let selection = SelectionCriteria {
            hash_key: req.hash_key,
        };
        service
            .load_balancer()
            .choose_instance(&selection, &healthy)
            .ok_or_else(|| PolarisError::ServiceNotFound(format!("{key}: selection came up empty")))
    }
}
