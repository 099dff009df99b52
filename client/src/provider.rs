//! Provider API facade
//!
//! Validates requests locally (invalid ones never reach the wire), opens
//! an ApiStat span per call and drives the retry envelope over the
//! context's server connector. Calls are async and budget-bounded: the
//! per-request timeout, or `global.api.timeout` when unset, caps retries
//! and sleeps alike.

use std::path::Path;
use std::sync::Arc;

use tracing::error;

use polaris_core::{
    ApiKind, Config, InstanceDeregisterRequest, InstanceHeartbeatRequest, InstanceRegisterRequest,
    PolarisError, PolarisResult,
};

use crate::context::{Context, ContextMode};
use crate::retry::retry_call;
use crate::stat::ApiStat;

/// Entry point for service providers: register, deregister, heartbeat
pub struct ProviderApi {
    context: Arc<Context>,
}

impl std::fmt::Debug for ProviderApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderApi").finish_non_exhaustive()
    }
}

impl ProviderApi {
    /// Wrap an existing context; `ShareWithoutEngine` contexts are refused
    pub fn create(context: Arc<Context>) -> PolarisResult<Self> {
        if !context.mode().usable_by_api() {
            error!(mode = ?context.mode(), "provider api rejects this context mode");
            return Err(PolarisError::InvalidArgument(format!(
                "context mode {:?} not usable by the provider api",
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

    /// Register one instance; returns the id minted by the control plane
    pub async fn register(&self, req: &InstanceRegisterRequest) -> PolarisResult<String> {
        let stat = ApiStat::new(self.context.stat_reporter(), ApiKind::ProviderRegister);
        if let Err(e) = check_register(req) {
            return stat.finish(Err(e));
        }
        let spec = self.context.retry_spec(req.timeout);
        let connector = self.context.server_connector();
        let result = retry_call(spec, |budget| connector.register_instance(req, budget)).await;
        stat.finish(result)
    }

    pub async fn deregister(&self, req: &InstanceDeregisterRequest) -> PolarisResult<()> {
        let stat = ApiStat::new(self.context.stat_reporter(), ApiKind::ProviderDeregister);
        if let Err(e) = check_addressing(
            "deregister",
            req.instance_id.as_deref(),
            &req.namespace,
            &req.service,
            &req.token,
            &req.host,
            req.port,
        ) {
            return stat.finish(Err(e));
        }
        let spec = self.context.retry_spec(req.timeout);
        let connector = self.context.server_connector();
        let result = retry_call(spec, |budget| connector.deregister_instance(req, budget)).await;
        stat.finish(result)
    }

    pub async fn heartbeat(&self, req: &InstanceHeartbeatRequest) -> PolarisResult<()> {
        let stat = ApiStat::new(self.context.stat_reporter(), ApiKind::ProviderHeartbeat);
        if let Err(e) = check_addressing(
            "heartbeat",
            req.instance_id.as_deref(),
            &req.namespace,
            &req.service,
            &req.token,
            &req.host,
            req.port,
        ) {
            return stat.finish(Err(e));
        }
        let spec = self.context.retry_spec(req.timeout);
        let connector = self.context.server_connector();
        let result = retry_call(spec, |budget| connector.instance_heartbeat(req, budget)).await;
        stat.finish(result)
    }
}

fn invalid(action: &str, what: &str) -> PolarisError {
    error!(action, "{what}");
    PolarisError::InvalidArgument(format!("{action}: {what}"))
}

fn check_register(req: &InstanceRegisterRequest) -> PolarisResult<()> {
    check_full_tuple(
        "register",
        &req.namespace,
        &req.service,
        &req.token,
        &req.host,
        req.port,
    )
}

fn check_full_tuple(
    action: &str,
    namespace: &str,
    service: &str,
    token: &str,
    host: &str,
    port: u32,
) -> PolarisResult<()> {
    if namespace.is_empty() {
        return Err(invalid(action, "service namespace is empty"));
    }
    if service.is_empty() {
        return Err(invalid(action, "service name is empty"));
    }
    if token.is_empty() {
        return Err(invalid(action, "service token is empty"));
    }
    if host.is_empty() {
        return Err(invalid(action, "instance host is empty"));
    }
    if port == 0 || port > 65535 {
        return Err(invalid(action, "port must be in [1, 65535]"));
    }
    Ok(())
}

/// Deregister and heartbeat accept either `(instance_id, token)` or the
/// full `(namespace, service, token, host, port)` tuple
fn check_addressing(
    action: &str,
    instance_id: Option<&str>,
    namespace: &str,
    service: &str,
    token: &str,
    host: &str,
    port: u32,
) -> PolarisResult<()> {
    match instance_id {
        Some(id) => {
            if id.is_empty() {
                return Err(invalid(action, "instance id is empty"));
            }
            if token.is_empty() {
                return Err(invalid(action, "service token is empty"));
            }
            Ok(())
        }
        None => check_full_tuple(action, namespace, service, token, host, port),
    }
}
