//! Control-plane connectivity
//!
//! The [`polaris_core::ServerConnector`] contract lives in `polaris-core`;
//! this module carries the built-in gRPC realisation and the wire message
//! definitions it speaks.

mod grpc;
pub mod proto;

pub use grpc::GrpcServerConnector;
