//! polaris-client - Service discovery and traffic governance client
//!
//! Provider processes register, deregister and heartbeat their instances
//! against the Polaris control plane; consumer processes discover
//! instances and route traffic to them under policy.
//!
//! # Architecture
//!
//! ```text
//! ProviderApi ──► retry envelope ──► ServerConnector ──► control plane
//! ConsumerApi ──► routers ──► breaker gate ──► load balancer
//!                     ▲                ▲
//!               LocalRegistry    OutlierDetectorChain (reactor-driven)
//! ```
//!
//! Every strategy along those paths is a plugin: connectors, local
//! registries, routers, balancers, detectors, breaker strategies, weight
//! adjusters and reporters bind by name through the [`PluginRegistry`].
//! The [`Context`] wires a configuration to one connector, one local
//! registry and the engine reactors; facades share or own a context
//! depending on its [`ContextMode`].
//!
//! # Example
//!
//! ```ignore
//! let provider = ProviderApi::create_from_string("global:\n  system:\n    discoverCluster: http://polaris:8091\n")?;
//! let req = InstanceRegisterRequest::new("Test", "echo", "token", "10.1.2.3", 8080);
//! let instance_id = provider.register(&req).await?;
//! ```

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]

pub mod balancer;
pub mod breaker;
pub mod connector;
pub mod consumer;
pub mod context;
pub mod detector;
pub mod local_registry;
pub mod provider;
pub mod reactor;
pub mod registry;
pub mod retry;
pub mod router;
pub mod stat;
pub mod weight;

pub use breaker::{CircuitBreakerChain, CircuitState};
pub use connector::GrpcServerConnector;
pub use consumer::ConsumerApi;
pub use context::{Context, ContextBuilder, ContextMode, ServiceContext};
pub use detector::OutlierDetectorChain;
pub use local_registry::InMemoryRegistry;
pub use provider::ProviderApi;
pub use reactor::{Reactor, ReactorHandle, Task};
pub use registry::PluginRegistry;
pub use retry::{retry_call, RetrySpec};
pub use router::ServiceRouterChain;
pub use stat::ApiStat;

// The shared contracts, re-exported so most users depend on one crate
pub use polaris_core::{
    Config, GetInstancesRequest, GetOneInstanceRequest, Instance, InstanceDeregisterRequest,
    InstanceHeartbeatRequest, InstanceRegisterRequest, PolarisError, PolarisResult, ReturnCode,
    ServiceCallResult, ServiceData, ServiceKey,
};
