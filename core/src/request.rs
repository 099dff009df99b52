//! Request types for the provider and consumer API facades
//!
//! Builder-style setters so call sites read the same way whether they set
//! two fields or ten. Timeouts are optional everywhere: `None` means "use
//! `global.api.timeout` from the context's configuration".

use std::collections::HashMap;
use std::time::Duration;

use crate::model::ServiceKey;

/// Registration of one provider instance
#[derive(Debug, Clone, Default)]
pub struct InstanceRegisterRequest {
    pub namespace: String,
    pub service: String,
    pub token: String,
    pub host: String,
    pub port: u32,
    pub weight: Option<u32>,
    pub metadata: HashMap<String, String>,
    pub timeout: Option<Duration>,
}

impl InstanceRegisterRequest {
    pub fn new(
        namespace: impl Into<String>,
        service: impl Into<String>,
        token: impl Into<String>,
        host: impl Into<String>,
        port: u32,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            service: service.into(),
            token: token.into(),
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = Some(weight);
        self
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn service_key(&self) -> ServiceKey {
        ServiceKey::new(self.namespace.clone(), self.service.clone())
    }
}

/// Removal of a provider instance, addressed either by id or by full tuple
#[derive(Debug, Clone, Default)]
pub struct InstanceDeregisterRequest {
    pub namespace: String,
    pub service: String,
    pub token: String,
    pub host: String,
    pub port: u32,
    pub instance_id: Option<String>,
    pub timeout: Option<Duration>,
}

impl InstanceDeregisterRequest {
    /// Address the instance by the id the control plane assigned
    pub fn with_id(token: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            instance_id: Some(instance_id.into()),
            ..Default::default()
        }
    }

    /// Address the instance by its full `(namespace, service, host, port)` tuple
    pub fn with_tuple(
        namespace: impl Into<String>,
        service: impl Into<String>,
        token: impl Into<String>,
        host: impl Into<String>,
        port: u32,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            service: service.into(),
            token: token.into(),
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Heartbeat for a registered instance; same addressing rules as deregister
#[derive(Debug, Clone, Default)]
pub struct InstanceHeartbeatRequest {
    pub namespace: String,
    pub service: String,
    pub token: String,
    pub host: String,
    pub port: u32,
    pub instance_id: Option<String>,
    pub timeout: Option<Duration>,
}

impl InstanceHeartbeatRequest {
    pub fn with_id(token: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            instance_id: Some(instance_id.into()),
            ..Default::default()
        }
    }

    pub fn with_tuple(
        namespace: impl Into<String>,
        service: impl Into<String>,
        token: impl Into<String>,
        host: impl Into<String>,
        port: u32,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            service: service.into(),
            token: token.into(),
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Selection of a single instance for one outgoing call
#[derive(Debug, Clone, Default)]
pub struct GetOneInstanceRequest {
    pub namespace: String,
    pub service: String,
    /// Hash key for hash-based balancers; ignored by the others
    pub hash_key: u64,
    /// Caller metadata consulted by metadata-aware routers
    pub source_metadata: HashMap<String, String>,
    pub timeout: Option<Duration>,
}

impl GetOneInstanceRequest {
    pub fn new(namespace: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            service: service.into(),
            ..Default::default()
        }
    }

    pub fn with_hash_key(mut self, hash_key: u64) -> Self {
        self.hash_key = hash_key;
        self
    }

    pub fn with_source_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.source_metadata = metadata;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn service_key(&self) -> ServiceKey {
        ServiceKey::new(self.namespace.clone(), self.service.clone())
    }
}

/// Full instance-list fetch
#[derive(Debug, Clone, Default)]
pub struct GetInstancesRequest {
    pub namespace: String,
    pub service: String,
    pub timeout: Option<Duration>,
}

impl GetInstancesRequest {
    pub fn new(namespace: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            service: service.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn service_key(&self) -> ServiceKey {
        ServiceKey::new(self.namespace.clone(), self.service.clone())
    }
}

/// Outcome of one consumer call, fed back into the circuit breaker
#[derive(Debug, Clone)]
pub struct ServiceCallResult {
    pub key: ServiceKey,
    pub instance_id: String,
    pub success: bool,
    pub delay: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_builder_round_trip() {
        let req = InstanceRegisterRequest::new("Test", "echo", "token", "1.2.3.4", 8080)
            .with_weight(50)
            .with_timeout(Duration::from_millis(200));
        assert_eq!(req.service_key(), ServiceKey::new("Test", "echo"));
        assert_eq!(req.weight, Some(50));
        assert_eq!(req.timeout, Some(Duration::from_millis(200)));
    }

    #[test]
    fn deregister_by_id_leaves_tuple_empty() {
        let req = InstanceDeregisterRequest::with_id("token", "id-7");
        assert_eq!(req.instance_id.as_deref(), Some("id-7"));
        assert!(req.namespace.is_empty());
        assert!(req.host.is_empty());
    }
}
