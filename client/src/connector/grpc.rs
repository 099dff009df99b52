//! gRPC server connector
//!
//! The built-in `grpc` realisation of [`ServerConnector`]. Unary calls
//! (register, deregister, heartbeat) run under the caller's remaining
//! budget as a hard deadline; transport failures drop the cached channel
//! so the next attempt reconnects. Service-data subscriptions each own a
//! background task that re-issues the discover stream with exponential
//! backoff and pushes every new revision to the handler.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Channel, Endpoint};
use tonic::Code;
use tracing::{debug, warn};

use polaris_core::{
    Config, HealthStatus, Instance, InstanceDeregisterRequest, InstanceHeartbeatRequest,
    InstanceRegisterRequest, PolarisError, PolarisResult, ServerConnector, ServiceData,
    ServiceDataHandler, ServiceDataKind, ServiceKey, DEFAULT_INSTANCE_WEIGHT,
};

use super::proto;

/// Backoff bounds for re-opening a discover stream
const SUBSCRIBE_BACKOFF_INITIAL: Duration = Duration::from_millis(500);
const SUBSCRIBE_BACKOFF_MAX: Duration = Duration::from_secs(30);

struct ConnectorShared {
    endpoint: RwLock<Option<String>>,
    connect_timeout: RwLock<Duration>,
    channel: tokio::sync::Mutex<Option<Channel>>,
}

impl ConnectorShared {
    async fn channel(&self) -> PolarisResult<Channel> {
        let mut cached = self.channel.lock().await;
        if let Some(channel) = cached.as_ref() {
            return Ok(channel.clone());
        }
        let address = self
            .endpoint
            .read()
            .clone()
            .ok_or_else(|| PolarisError::Plugin("grpc connector not initialised".into()))?;
        let endpoint = Endpoint::from_shared(address.clone())
            .map_err(|e| PolarisError::InvalidArgument(format!("bad cluster address: {e}")))?
            .connect_timeout(*self.connect_timeout.read());
        let channel = endpoint
            .connect()
            .await
            .map_err(|e| PolarisError::NetworkFailed(format!("connect {address}: {e}")))?;
        *cached = Some(channel.clone());
        Ok(channel)
    }

    /// Forget the channel after a transport failure
    async fn reset_channel(&self) {
        self.channel.lock().await.take();
    }

    async fn unary<Req, Resp>(
        &self,
        path: &'static str,
        message: Req,
        timeout: Duration,
    ) -> PolarisResult<Resp>
    where
        Req: prost::Message + 'static,
        Resp: prost::Message + Default + 'static,
    {
        if timeout.is_zero() {
            return Err(PolarisError::NetworkFailed("no budget left".into()));
        }
        let call = async {
            let channel = self.channel().await?;
            let mut grpc = tonic::client::Grpc::new(channel);
            grpc.ready()
                .await
                .map_err(|e| PolarisError::NetworkFailed(format!("channel not ready: {e}")))?;
            let codec = tonic::codec::ProstCodec::default();
            grpc.unary(
                tonic::Request::new(message),
                PathAndQuery::from_static(path),
                codec,
            )
            .await
            .map(|response| response.into_inner())
            .map_err(status_to_error)
        };
        let result = match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(PolarisError::NetworkFailed(format!(
                "{path} deadline of {}ms exceeded",
                timeout.as_millis()
            ))),
        };
        if matches!(&result, Err(PolarisError::NetworkFailed(_))) {
            self.reset_channel().await;
        }
        result
    }
}

/// The built-in `grpc` server connector
pub struct GrpcServerConnector {
    shared: Arc<ConnectorShared>,
    subscriptions: Mutex<HashMap<(ServiceKey, ServiceDataKind), JoinHandle<()>>>,
}

impl GrpcServerConnector {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(ConnectorShared {
                endpoint: RwLock::new(None),
                connect_timeout: RwLock::new(Duration::from_millis(500)),
                channel: tokio::sync::Mutex::new(None),
            }),
            subscriptions: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for GrpcServerConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for GrpcServerConnector {
    fn drop(&mut self) {
        for (_, task) in self.subscriptions.lock().drain() {
            task.abort();
        }
    }
}

#[async_trait]
impl ServerConnector for GrpcServerConnector {
    fn name(&self) -> &str {
        "grpc"
    }

    fn init(&self, config: &Config) -> PolarisResult<()> {
        let address = config.global.system.discover_cluster.clone();
        if address.is_empty() {
            return Err(PolarisError::InvalidArgument(
                "global.system.discoverCluster is empty".into(),
            ));
        }
        // Fail bad addresses at init, not on the first call
        Endpoint::from_shared(address.clone())
            .map_err(|e| PolarisError::InvalidArgument(format!("bad cluster address: {e}")))?;
        *self.shared.endpoint.write() = Some(address);
        *self.shared.connect_timeout.write() = config.global.server_connector.connect_timeout();
        Ok(())
    }

    async fn register_instance(
        &self,
        req: &InstanceRegisterRequest,
        timeout: Duration,
    ) -> PolarisResult<String> {
        let message = proto::RegisterRequest {
            namespace: req.namespace.clone(),
            service: req.service.clone(),
            service_token: req.token.clone(),
            host: req.host.clone(),
            port: req.port,
            weight: req.weight.unwrap_or(DEFAULT_INSTANCE_WEIGHT),
            metadata: req.metadata.clone(),
        };
        let response: proto::RegisterResponse = self
            .shared
            .unary(proto::REGISTER_PATH, message, timeout)
            .await?;
        map_server_code(response.code, &response.info)?;
        debug!(
            namespace = %req.namespace,
            service = %req.service,
            instance_id = %response.instance_id,
            "instance registered"
        );
        Ok(response.instance_id)
    }

    async fn deregister_instance(
        &self,
        req: &InstanceDeregisterRequest,
        timeout: Duration,
    ) -> PolarisResult<()> {
        let message = proto::DeregisterRequest {
            namespace: req.namespace.clone(),
            service: req.service.clone(),
            service_token: req.token.clone(),
            instance_id: req.instance_id.clone().unwrap_or_default(),
            host: req.host.clone(),
            port: req.port,
        };
        let response: proto::SimpleResponse = self
            .shared
            .unary(proto::DEREGISTER_PATH, message, timeout)
            .await?;
        map_server_code(response.code, &response.info)
    }

    async fn instance_heartbeat(
        &self,
        req: &InstanceHeartbeatRequest,
        timeout: Duration,
    ) -> PolarisResult<()> {
        let message = proto::HeartbeatRequest {
            namespace: req.namespace.clone(),
            service: req.service.clone(),
            service_token: req.token.clone(),
            instance_id: req.instance_id.clone().unwrap_or_default(),
            host: req.host.clone(),
            port: req.port,
        };
        let response: proto::SimpleResponse = self
            .shared
            .unary(proto::HEARTBEAT_PATH, message, timeout)
            .await?;
        map_server_code(response.code, &response.info)
    }

    fn subscribe_service_data(
        &self,
        key: ServiceKey,
        kind: ServiceDataKind,
        handler: ServiceDataHandler,
    ) -> PolarisResult<()> {
        let mut subscriptions = self.subscriptions.lock();
        if subscriptions.contains_key(&(key.clone(), kind)) {
            return Err(PolarisError::ExistedResource(format!(
                "already subscribed to {key} {kind}"
            )));
        }
        let shared = Arc::clone(&self.shared);
        let task_key = key.clone();
        let task = tokio::spawn(async move {
            discover_loop(shared, task_key, kind, handler).await;
        });
        subscriptions.insert((key, kind), task);
        Ok(())
    }

    fn unsubscribe(&self, key: &ServiceKey, kind: ServiceDataKind) -> PolarisResult<()> {
        match self.subscriptions.lock().remove(&(key.clone(), kind)) {
            Some(task) => {
                task.abort();
                debug!(service = %key, kind = %kind, "unsubscribed");
            }
            None => {
                warn!(service = %key, kind = %kind, "unsubscribe without subscription");
            }
        }
        Ok(())
    }
}

/// Keep one discover stream open, pushing each new revision to `handler`
async fn discover_loop(
    shared: Arc<ConnectorShared>,
    key: ServiceKey,
    kind: ServiceDataKind,
    handler: ServiceDataHandler,
) {
    let mut backoff = SUBSCRIBE_BACKOFF_INITIAL;
    let mut revision = String::new();
    loop {
        match open_discover_stream(&shared, &key, kind, &revision).await {
            Ok(mut stream) => {
                backoff = SUBSCRIBE_BACKOFF_INITIAL;
                loop {
                    match stream.message().await {
                        Ok(Some(response)) => {
                            if let Some(data) = convert_discover_response(&key, kind, response) {
                                revision = data.revision.clone();
                                handler(data);
                            }
                        }
                        Ok(None) => {
                            debug!(service = %key, kind = %kind, "discover stream closed");
                            break;
                        }
                        Err(status) => {
                            warn!(
                                service = %key,
                                kind = %kind,
                                error = %status,
                                "discover stream failed"
                            );
                            break;
                        }
                    }
                }
                shared.reset_channel().await;
            }
            Err(e) => {
                warn!(service = %key, kind = %kind, error = %e, "discover connect failed");
            }
        }
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(SUBSCRIBE_BACKOFF_MAX);
    }
}

async fn open_discover_stream(
    shared: &Arc<ConnectorShared>,
    key: &ServiceKey,
    kind: ServiceDataKind,
    revision: &str,
) -> PolarisResult<tonic::Streaming<proto::DiscoverResponse>> {
    let request = proto::DiscoverRequest {
        r#type: discover_type(kind) as i32,
        namespace: key.namespace.clone(),
        service: key.name.clone(),
        revision: revision.to_string(),
    };
    let channel = shared.channel().await?;
    let mut grpc = tonic::client::Grpc::new(channel);
    grpc.ready()
        .await
        .map_err(|e| PolarisError::NetworkFailed(format!("channel not ready: {e}")))?;
    let codec = tonic::codec::ProstCodec::default();
    grpc.server_streaming(
        tonic::Request::new(request),
        PathAndQuery::from_static(proto::DISCOVER_PATH),
        codec,
    )
    .await
    .map(|response| response.into_inner())
    .map_err(status_to_error)
}

fn discover_type(kind: ServiceDataKind) -> proto::DiscoverDataType {
    match kind {
        ServiceDataKind::Instances => proto::DiscoverDataType::Instance,
        ServiceDataKind::RouteRule => proto::DiscoverDataType::Routing,
    }
}

fn convert_discover_response(
    key: &ServiceKey,
    kind: ServiceDataKind,
    response: proto::DiscoverResponse,
) -> Option<ServiceData> {
    if let Err(e) = map_server_code(response.code, &response.info) {
        warn!(service = %key, kind = %kind, error = %e, "discover push rejected");
        return None;
    }
    let data = match kind {
        ServiceDataKind::Instances => ServiceData {
            key: key.clone(),
            kind,
            revision: response.revision,
            fetch_time: SystemTime::now(),
            value: polaris_core::ServiceDataValue::Instances(
                response.instances.into_iter().map(convert_instance).collect(),
            ),
        },
        ServiceDataKind::RouteRule => ServiceData {
            key: key.clone(),
            kind,
            revision: response.revision,
            fetch_time: SystemTime::now(),
            value: polaris_core::ServiceDataValue::RouteRule(Vec::new()),
        },
    };
    Some(data)
}

fn convert_instance(wire: proto::Instance) -> Instance {
    Instance {
        id: wire.id,
        host: wire.host,
        port: wire.port.min(u32::from(u16::MAX)) as u16,
        weight: wire.weight,
        metadata: wire.metadata,
        health: if wire.healthy {
            HealthStatus::Up
        } else {
            HealthStatus::Down
        },
        isolate: wire.isolate,
    }
}

/// Collapse a transport status into the closed taxonomy
fn status_to_error(status: tonic::Status) -> PolarisError {
    let detail = format!("{}: {}", status.code(), status.message());
    match status.code() {
        Code::Unavailable | Code::DeadlineExceeded | Code::Cancelled | Code::Aborted => {
            PolarisError::NetworkFailed(detail)
        }
        Code::Internal | Code::Unknown | Code::DataLoss => PolarisError::ServerError(detail),
        Code::InvalidArgument
        | Code::FailedPrecondition
        | Code::OutOfRange
        | Code::PermissionDenied
        | Code::Unauthenticated => PolarisError::InvalidArgument(detail),
        Code::NotFound => PolarisError::ServiceNotFound(detail),
        Code::AlreadyExists => PolarisError::ExistedResource(detail),
        Code::ResourceExhausted => PolarisError::RateLimited,
        _ => PolarisError::Unknown(detail),
    }
}

/// Collapse a control-plane application code into the closed taxonomy
fn map_server_code(code: u32, info: &str) -> PolarisResult<()> {
    match code {
        200000..=299999 => Ok(()),
        400201 => Err(PolarisError::ExistedResource(format!("{code}: {info}"))),
        400202 | 400301 => Err(PolarisError::ServiceNotFound(format!("{code}: {info}"))),
        429001 | 429002 => Err(PolarisError::RateLimited),
        400000..=499999 => Err(PolarisError::InvalidArgument(format!("{code}: {info}"))),
        500000..=599999 => Err(PolarisError::ServerError(format!("{code}: {info}"))),
        _ => Err(PolarisError::Unknown(format!("{code}: {info}"))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use polaris_core::ReturnCode;

    // ========================================================================
    // Code mapping
    // ========================================================================

    #[test]
    fn transport_codes_map_to_the_retryable_pair() {
        let err = status_to_error(tonic::Status::unavailable("down"));
        assert_eq!(err.code(), ReturnCode::NetworkFailed);
        let err = status_to_error(tonic::Status::deadline_exceeded("slow"));
        assert_eq!(err.code(), ReturnCode::NetworkFailed);
        let err = status_to_error(tonic::Status::internal("bug"));
        assert_eq!(err.code(), ReturnCode::ServerError);
    }

    #[test]
    fn terminal_codes_stay_terminal() {
        for (status, expected) in [
            (tonic::Status::invalid_argument("bad"), ReturnCode::InvalidArgument),
            (tonic::Status::not_found("gone"), ReturnCode::ServiceNotFound),
            (tonic::Status::already_exists("dup"), ReturnCode::ExistedResource),
            (tonic::Status::resource_exhausted("slow down"), ReturnCode::RateLimited),
            (tonic::Status::unauthenticated("no token"), ReturnCode::InvalidArgument),
        ] {
            assert_eq!(status_to_error(status).code(), expected);
        }
    }

    #[test]
    fn server_codes_partition_into_the_taxonomy() {
        assert!(map_server_code(200000, "ok").is_ok());
        assert!(map_server_code(200001, "no change").is_ok());
        assert_eq!(
            map_server_code(400201, "existed").unwrap_err().code(),
            ReturnCode::ExistedResource
        );
        assert_eq!(
            map_server_code(400301, "no service").unwrap_err().code(),
            ReturnCode::ServiceNotFound
        );
        assert_eq!(
            map_server_code(429001, "limited").unwrap_err().code(),
            ReturnCode::RateLimited
        );
        assert_eq!(
            map_server_code(400000, "bad").unwrap_err().code(),
            ReturnCode::InvalidArgument
        );
        assert_eq!(
            map_server_code(500003, "boom").unwrap_err().code(),
            ReturnCode::ServerError
        );
        assert_eq!(
            map_server_code(999999, "?").unwrap_err().code(),
            ReturnCode::Unknown
        );
    }

    // ========================================================================
    // Conversion and init
    // ========================================================================

    #[test]
    fn wire_instance_converts_to_model() {
        let wire = proto::Instance {
            id: "id-1".into(),
            namespace: "Test".into(),
            service: "echo".into(),
            host: "10.0.0.1".into(),
            port: 8080,
            weight: 50,
            metadata: HashMap::from([("zone".to_string(), "z1".to_string())]),
            healthy: true,
            isolate: false,
            revision: "3".into(),
        };
        let instance = convert_instance(wire);
        assert_eq!(instance.id, "id-1");
        assert_eq!(instance.port, 8080);
        assert_eq!(instance.health, HealthStatus::Up);
        assert_eq!(instance.metadata.get("zone").unwrap(), "z1");
    }

    #[test]
    fn rejected_discover_push_converts_to_none() {
        let key = ServiceKey::new("Test", "echo");
        let response = proto::DiscoverResponse {
            code: 500001,
            ..Default::default()
        };
        assert!(convert_discover_response(&key, ServiceDataKind::Instances, response).is_none());
    }

    #[test]
    fn accepted_discover_push_carries_instances_and_revision() {
        let key = ServiceKey::new("Test", "echo");
        let response = proto::DiscoverResponse {
            code: proto::SERVER_CODE_OK,
            revision: "42".into(),
            instances: vec![proto::Instance {
                id: "id-1".into(),
                host: "10.0.0.1".into(),
                port: 80,
                healthy: true,
                ..Default::default()
            }],
            ..Default::default()
        };
        let data = convert_discover_response(&key, ServiceDataKind::Instances, response).unwrap();
        assert_eq!(data.revision, "42");
        assert_eq!(data.instance_list().len(), 1);
    }

    #[test]
    fn init_rejects_an_empty_cluster_address() {
        let connector = GrpcServerConnector::new();
        let config =
            Config::from_yaml("global:\n  system:\n    discoverCluster: \"\"\n").unwrap();
        let err = connector.init(&config).unwrap_err();
        assert_eq!(err.code(), ReturnCode::InvalidArgument);
    }

    #[test]
    fn init_accepts_the_default_config() {
        let connector = GrpcServerConnector::new();
        connector.init(&Config::default()).unwrap();
        assert_eq!(
            connector.shared.endpoint.read().as_deref(),
            Some("http://127.0.0.1:8091")
        );
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    #[tokio::test]
    async fn duplicate_subscription_is_refused() {
        let connector = GrpcServerConnector::new();
        connector.init(&Config::default()).unwrap();
        let key = ServiceKey::new("Test", "echo");
        let handler: ServiceDataHandler = Arc::new(|_| {});
        connector
            .subscribe_service_data(key.clone(), ServiceDataKind::Instances, handler.clone())
            .unwrap();
        let err = connector
            .subscribe_service_data(key.clone(), ServiceDataKind::Instances, handler)
            .unwrap_err();
        assert_eq!(err.code(), ReturnCode::ExistedResource);
        connector.unsubscribe(&key, ServiceDataKind::Instances).unwrap();
    }

    #[tokio::test]
    async fn unsubscribe_without_subscription_is_harmless() {
        let connector = GrpcServerConnector::new();
        let key = ServiceKey::new("Test", "echo");
        assert!(connector.unsubscribe(&key, ServiceDataKind::Instances).is_ok());
    }

    #[tokio::test]
    async fn unary_with_zero_budget_fails_fast() {
        let connector = GrpcServerConnector::new();
        connector.init(&Config::default()).unwrap();
        let req = InstanceRegisterRequest::new("Test", "echo", "token", "1.2.3.4", 8080);
        let err = connector
            .register_instance(&req, Duration::ZERO)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ReturnCode::NetworkFailed);
    }
}
