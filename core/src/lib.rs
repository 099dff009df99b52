//! polaris-core - Shared types for the Polaris client SDK
//!
//! This crate holds everything the client engine and external plugins need
//! to agree on:
//!
//! - [`ReturnCode`] / [`PolarisError`] - the closed result taxonomy
//! - [`ServiceKey`], [`Instance`], [`ServiceData`] - the data model
//! - request types for the provider and consumer facades
//! - [`Config`] - layered YAML configuration
//! - the plugin traits for every extension point, plus [`PluginInstance`]
//!   for transporting a built plugin out of the registry
//!
//! # Why this crate exists
//!
//! External plugins (a custom outlier detector, an in-house stat sink)
//! implement these traits and register factories with the client's plugin
//! registry. Keeping the contracts here means such plugins never depend on
//! the full `polaris-client` engine:
//!
//! ```text
//! polaris-core ◄── polaris-client
//!     ▲
//!     └──────────── third-party plugins
//! ```

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]

mod code;
/// Layered YAML configuration
pub mod config;
/// Service keys, instances and data snapshots
pub mod model;
/// Plugin contracts for the extension points
pub mod plugin;
/// Provider and consumer request types
pub mod request;

pub use code::{result_code, PolarisError, PolarisResult, ReturnCode};
pub use config::{AllIsolatedFallback, Config, DetectWhen};
pub use model::{
    revision_newer, HealthStatus, Instance, RouteRule, ServiceData, ServiceDataHandler,
    ServiceDataKind, ServiceDataValue, ServiceKey, DEFAULT_INSTANCE_WEIGHT,
};
pub use plugin::{
    AlertReporter, ApiCallRecord, ApiKind, CallStats, CircuitBreaker, DetectResult,
    InstancePreUpdateHandler, LoadBalanceType, LoadBalancer, LocalRegistry, OutlierDetector,
    PluginFactory, PluginInstance, PluginKind, PreUpdateDispatcher, ProbeOutcome, RouteCriteria,
    SelectionCriteria, ServerConnector, ServiceRouter, StatReporter, WeightAdjuster,
};
pub use request::{
    GetInstancesRequest, GetOneInstanceRequest, InstanceDeregisterRequest,
    InstanceHeartbeatRequest, InstanceRegisterRequest, ServiceCallResult,
};
