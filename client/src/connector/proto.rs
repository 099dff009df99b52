//! Wire messages for the control-plane naming service
//!
//! Hand-maintained prost definitions mirroring `polaris/v1/naming.proto`;
//! kept in-tree so builds need no protoc. Field numbers are part of the
//! wire contract — never renumber.

use std::collections::HashMap;

/// RPC paths on the control plane
pub const REGISTER_PATH: &str = "/v1.PolarisGRPC/RegisterInstance";
pub const DEREGISTER_PATH: &str = "/v1.PolarisGRPC/DeregisterInstance";
pub const HEARTBEAT_PATH: &str = "/v1.PolarisGRPC/Heartbeat";
pub const DISCOVER_PATH: &str = "/v1.PolarisGRPC/Discover";

/// Server success code window; everything in `2xxxxx` is success
pub const SERVER_CODE_OK: u32 = 200000;

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Instance {
    #[prost(string, tag = "1")]
    pub id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub namespace: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub service: ::prost::alloc::string::String,
    #[prost(string, tag = "4")]
    pub host: ::prost::alloc::string::String,
    #[prost(uint32, tag = "5")]
    pub port: u32,
    #[prost(uint32, tag = "6")]
    pub weight: u32,
    #[prost(map = "string, string", tag = "7")]
    pub metadata: HashMap<::prost::alloc::string::String, ::prost::alloc::string::String>,
    #[prost(bool, tag = "8")]
    pub healthy: bool,
    #[prost(bool, tag = "9")]
    pub isolate: bool,
    #[prost(string, tag = "10")]
    pub revision: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RegisterRequest {
    #[prost(string, tag = "1")]
    pub namespace: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub service: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub service_token: ::prost::alloc::string::String,
    #[prost(string, tag = "4")]
    pub host: ::prost::alloc::string::String,
    #[prost(uint32, tag = "5")]
    pub port: u32,
    #[prost(uint32, tag = "6")]
    pub weight: u32,
    #[prost(map = "string, string", tag = "7")]
    pub metadata: HashMap<::prost::alloc::string::String, ::prost::alloc::string::String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RegisterResponse {
    #[prost(uint32, tag = "1")]
    pub code: u32,
    #[prost(string, tag = "2")]
    pub info: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub instance_id: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeregisterRequest {
    #[prost(string, tag = "1")]
    pub namespace: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub service: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub service_token: ::prost::alloc::string::String,
    #[prost(string, tag = "4")]
    pub instance_id: ::prost::alloc::string::String,
    #[prost(string, tag = "5")]
    pub host: ::prost::alloc::string::String,
    #[prost(uint32, tag = "6")]
    pub port: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HeartbeatRequest {
    #[prost(string, tag = "1")]
    pub namespace: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub service: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub service_token: ::prost::alloc::string::String,
    #[prost(string, tag = "4")]
    pub instance_id: ::prost::alloc::string::String,
    #[prost(string, tag = "5")]
    pub host: ::prost::alloc::string::String,
    #[prost(uint32, tag = "6")]
    pub port: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SimpleResponse {
    #[prost(uint32, tag = "1")]
    pub code: u32,
    #[prost(string, tag = "2")]
    pub info: ::prost::alloc::string::String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum DiscoverDataType {
    Unknown = 0,
    Instance = 1,
    Routing = 2,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DiscoverRequest {
    #[prost(enumeration = "DiscoverDataType", tag = "1")]
    pub r#type: i32,
    #[prost(string, tag = "2")]
    pub namespace: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub service: ::prost::alloc::string::String,
    /// Revision the client already holds; the server skips no-op pushes
    #[prost(string, tag = "4")]
    pub revision: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DiscoverResponse {
    #[prost(uint32, tag = "1")]
    pub code: u32,
    #[prost(string, tag = "2")]
    pub info: ::prost::alloc::string::String,
    #[prost(enumeration = "DiscoverDataType", tag = "3")]
    pub r#type: i32,
    #[prost(string, tag = "4")]
    pub namespace: ::prost::alloc::string::String,
    #[prost(string, tag = "5")]
    pub service: ::prost::alloc::string::String,
    #[prost(string, tag = "6")]
    pub revision: ::prost::alloc::string::String,
    #[prost(message, repeated, tag = "7")]
    pub instances: ::prost::alloc::vec::Vec<Instance>,
}
